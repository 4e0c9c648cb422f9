use core::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::{Condvar, Mutex};

use crate::error::{self, OperationKind, TlsControlError};

type Listener<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

/// 单次赋值的完成单元。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 控制通道的写操作可能在调用栈内同步完成，也可能稍后由传输回调完成；调用方需要一个统一的句柄，
///   既能阻塞等待（`end_*`），也能登记通知或直接 `.await`；
/// - “只能完成一次”是写通道单写者不变量的最后一道防线：重复完成意味着同一消息被报告了两次结果。
///
/// ## 逻辑（How）
/// - `parking_lot::Mutex` 保护结果与等待者列表，`Condvar` 唤醒阻塞等待者，`Waker` 列表唤醒异步等待者；
/// - 通知回调在锁外执行，避免回调内再次访问本单元导致自锁。
///
/// ## 契约（What）
/// - [`complete`](Self::complete)/[`complete_with_error`](Self::complete_with_error) 总计只能调用一次，
///   第二次调用直接 panic（编程错误，快速失败）；
/// - [`wait`](Self::wait) 与 `Future` 实现返回结果的克隆，可被多个等待者重复读取。
///
/// ## 风险与权衡（Trade-offs）
/// - 结果按值克隆给每个等待者，`T`/`E` 应为廉价可克隆类型（控制通道使用 `()` 与 `Arc<io::Error>`）。
pub struct AsyncOperation<T, E> {
    cell: Arc<Cell<T, E>>,
}

struct Cell<T, E> {
    state: Mutex<CellState<T, E>>,
    ready: Condvar,
}

struct CellState<T, E> {
    outcome: Option<Result<T, E>>,
    wakers: Vec<Waker>,
    listeners: Vec<Listener<T, E>>,
}

impl<T, E> Clone for AsyncOperation<T, E> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone, E: Clone> Default for AsyncOperation<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone, E: Clone> AsyncOperation<T, E> {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Cell {
                state: Mutex::new(CellState {
                    outcome: None,
                    wakers: Vec::new(),
                    listeners: Vec::new(),
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// 构造一个已成功完成的操作。
    pub fn completed(value: T) -> Self {
        let operation = Self::new();
        operation.complete(value);
        operation
    }

    /// 以成功结果完成。重复完成会 panic。
    #[track_caller]
    pub fn complete(&self, value: T) {
        self.settle(Ok(value));
    }

    /// 以错误完成。重复完成会 panic。
    #[track_caller]
    pub fn complete_with_error(&self, error: E) {
        self.settle(Err(error));
    }

    pub fn is_completed(&self) -> bool {
        self.cell.state.lock().outcome.is_some()
    }

    /// 非阻塞读取结果。
    pub fn try_result(&self) -> Option<Result<T, E>> {
        self.cell.state.lock().outcome.clone()
    }

    /// 阻塞当前线程直到完成。
    pub fn wait(&self) -> Result<T, E> {
        let mut state = self.cell.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.cell.ready.wait(&mut state);
        }
    }

    /// 登记完成通知；若已完成则在当前线程立即调用。
    pub fn on_complete<F>(&self, listener: F)
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        let mut state = self.cell.state.lock();
        match &state.outcome {
            Some(outcome) => {
                let outcome = outcome.clone();
                drop(state);
                listener(outcome);
            }
            None => state.listeners.push(Box::new(listener)),
        }
    }

    #[track_caller]
    fn settle(&self, outcome: Result<T, E>) {
        let mut state = self.cell.state.lock();
        if state.outcome.is_some() {
            drop(state);
            panic!("AsyncOperation completed more than once");
        }
        let listeners = core::mem::take(&mut state.listeners);
        let wakers = core::mem::take(&mut state.wakers);
        state.outcome = Some(outcome.clone());
        drop(state);

        self.cell.ready.notify_all();
        wakers.into_iter().for_each(Waker::wake);
        for listener in listeners {
            listener(outcome.clone());
        }
    }
}

impl<T: Clone, E: Clone> Future for AsyncOperation<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.cell.state.lock();
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.clone());
        }
        if !state.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T, E> fmt::Debug for AsyncOperation<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.cell.state.lock();
        let status = match &state.outcome {
            None => "pending",
            Some(Ok(_)) => "succeeded",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("AsyncOperation")
            .field("status", &status)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

/// 控制操作的种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlOperationKind {
    Shutdown,
    Renegotiate,
}

impl ControlOperationKind {
    pub(crate) fn error_kind(self) -> OperationKind {
        match self {
            Self::Shutdown => error::SHUTDOWN,
            Self::Renegotiate => error::RENEGOTIATE,
        }
    }

    pub fn name(self) -> &'static str {
        self.error_kind().message
    }
}

/// `begin_shutdown`/`begin_renegotiate` 返回的操作句柄。
///
/// 句柄记录所属通道与操作种类，`end_*` 据此拒绝不匹配的句柄；每个句柄只能被 `end_*`
/// 消费一次。`completed_synchronously` 标识写入是否在 `begin_*` 返回之前就已完成。
pub struct ControlOperation {
    channel_id: u64,
    kind: ControlOperationKind,
    consumed: AtomicBool,
    completed_synchronously: AtomicBool,
    completion: AsyncOperation<(), Arc<io::Error>>,
}

impl ControlOperation {
    pub(crate) fn pending(channel_id: u64, kind: ControlOperationKind) -> Self {
        Self {
            channel_id,
            kind,
            consumed: AtomicBool::new(false),
            completed_synchronously: AtomicBool::new(false),
            completion: AsyncOperation::new(),
        }
    }

    /// 无需写入即告完成的操作（例如关闭已发送）。
    pub(crate) fn already_completed(channel_id: u64, kind: ControlOperationKind) -> Self {
        Self {
            channel_id,
            kind,
            consumed: AtomicBool::new(false),
            completed_synchronously: AtomicBool::new(true),
            completion: AsyncOperation::completed(()),
        }
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    pub fn kind(&self) -> ControlOperationKind {
        self.kind
    }

    pub fn is_completed(&self) -> bool {
        self.completion.is_completed()
    }

    pub fn completed_synchronously(&self) -> bool {
        self.completed_synchronously.load(Ordering::Acquire)
    }

    /// 底层完成单元，可用于登记通知或 `.await`。
    pub fn completion(&self) -> &AsyncOperation<(), Arc<io::Error>> {
        &self.completion
    }

    pub(crate) fn succeed(&self, inline: bool) {
        self.completed_synchronously.store(inline, Ordering::Release);
        self.completion.complete(());
    }

    pub(crate) fn fail(&self, error: Arc<io::Error>, inline: bool) {
        self.completed_synchronously.store(inline, Ordering::Release);
        self.completion.complete_with_error(error);
    }

    /// 校验句柄归属并标记为已消费。
    pub(crate) fn claim(
        &self,
        channel_id: u64,
        kind: ControlOperationKind,
    ) -> Result<(), TlsControlError> {
        if self.channel_id != channel_id || self.kind != kind {
            return Err(TlsControlError::invalid_argument(
                kind.name(),
                "operation handle does not belong to this channel and operation",
            ));
        }
        if self.consumed.swap(true, Ordering::AcqRel) {
            return Err(TlsControlError::invalid_argument(
                kind.name(),
                "operation handle has already been consumed",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ControlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlOperation")
            .field("channel_id", &self.channel_id)
            .field("kind", &self.kind)
            .field("consumed", &self.consumed.load(Ordering::Relaxed))
            .field("completed_synchronously", &self.completed_synchronously())
            .field("completion", &self.completion)
            .finish()
    }
}
