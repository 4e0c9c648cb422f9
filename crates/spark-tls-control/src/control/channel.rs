use core::fmt;
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::TlsControlError;

use super::{
    ControlOperation, ControlOperationKind, ControlTransport, LaneAdmission, ProtocolControlMessage,
    SessionContext, WriteCompletion, WriteLane, WriteProgress,
};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

const IDLE: u8 = 0;
const SHUTDOWN_QUEUED: u8 = 1;
const SHUTDOWN_IN_FLIGHT: u8 = 2;
const RENEGOTIATE_QUEUED: u8 = 3;
const RENEGOTIATE_IN_FLIGHT: u8 = 4;

/// 本端在 TLS 会话中的角色。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    /// 发起方，不允许主动请求重协商。
    Client,
    /// 响应方，可发送 `hello_request` 触发重协商。
    Server,
}

/// 控制通道的可观测状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlChannelState {
    Idle,
    /// 控制消息已生成，正在等待写通道。
    WriteQueued,
    /// 关闭通知正在写出。
    WriteInFlight,
    /// 关闭通知已发送（或已尝试发送），后续关闭请求直接完成。
    ShutdownSent,
    /// `hello_request` 正在写出，完成后回到 `Idle`；关闭发送后不再进入此状态。
    RenegotiationInFlight,
}

/// TLS 会话控制通道：在共享传输上串行化关闭与重协商消息。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 关闭与重协商是带外控制消息，必须与应用数据共享同一条写路径，且任意两条控制消息不得在线上交错；
/// - 关闭是单次操作：无论被请求多少次，线上只出现一次 `close_notify`。
///
/// ## 逻辑（How）
/// - 两个相互独立的原子量守护状态转换，而非全局锁：
///   1. `phase`（写进行中）：`Idle → *_QUEUED → *_IN_FLIGHT → Idle`，`begin_*` 以 CAS 占用，
///      占用失败即报告 [`TlsControlError::NestedOperation`]；
///   2. `shutdown_sent`：以 CAS 置位恰好一次，胜出者执行写入，其余调用方得到已完成的操作；
/// - 消息由 [`SessionContext`] 生成后经 [`WriteLane`] 排队；传输层同步完成时在当前调用栈内完成操作，
///   异步完成时由传输回调完成；
/// - 无论成功失败，收尾时总是先清除 `phase`、再释放写通道、最后完成操作。
///
/// ## 契约（What）
/// - `begin_shutdown`：关闭已发送时返回已完成操作；该检查先于嵌套检测，因此关闭进行中再次请求关闭
///   同样直接完成；
/// - `begin_renegotiate`：仅服务端角色可用，写进行中时报告嵌套错误且不写任何字节；
/// - `end_*`：阻塞直到操作完成，传输错误包装为 [`TlsControlError::Io`]；不属于本通道或已被消费的
///   句柄报告 [`TlsControlError::InvalidArgument`]；
/// - 关闭写入失败不会回滚 `shutdown_sent`，失败只报告给最初的调用方。
///
/// ## 风险与权衡（Trade-offs）
/// - 不支持取消：写入一旦开始就运行到完成或失败；
/// - `end_*` 会阻塞线程，异步上下文应使用 [`shutdown`](Self::shutdown)/[`renegotiate`](Self::renegotiate)。
#[derive(Clone)]
pub struct TlsControlChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    id: u64,
    role: ConnectionRole,
    transport: Arc<dyn ControlTransport>,
    session: Arc<dyn SessionContext>,
    lane: Arc<WriteLane>,
    phase: AtomicU8,
    shutdown_sent: AtomicBool,
    last_error: Mutex<Option<Arc<io::Error>>>,
}

/// [`TlsControlChannel`] 构造器。
pub struct TlsControlChannelBuilder {
    transport: Arc<dyn ControlTransport>,
    session: Arc<dyn SessionContext>,
    role: ConnectionRole,
    lane: Option<Arc<WriteLane>>,
}

impl TlsControlChannelBuilder {
    pub fn role(mut self, role: ConnectionRole) -> Self {
        self.role = role;
        self
    }

    /// 与应用数据写者共享的写通道；未指定时通道独占一条新写通道。
    pub fn write_lane(mut self, lane: Arc<WriteLane>) -> Self {
        self.lane = Some(lane);
        self
    }

    pub fn build(self) -> TlsControlChannel {
        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        debug!(channel = id, role = ?self.role, "tls control channel created");
        TlsControlChannel {
            inner: Arc::new(ChannelInner {
                id,
                role: self.role,
                transport: self.transport,
                session: self.session,
                lane: self.lane.unwrap_or_default(),
                phase: AtomicU8::new(IDLE),
                shutdown_sent: AtomicBool::new(false),
                last_error: Mutex::new(None),
            }),
        }
    }
}

impl TlsControlChannel {
    pub fn builder(
        transport: Arc<dyn ControlTransport>,
        session: Arc<dyn SessionContext>,
    ) -> TlsControlChannelBuilder {
        TlsControlChannelBuilder {
            transport,
            session,
            role: ConnectionRole::Client,
            lane: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn role(&self) -> ConnectionRole {
        self.inner.role
    }

    pub fn write_lane(&self) -> &Arc<WriteLane> {
        &self.inner.lane
    }

    pub fn state(&self) -> ControlChannelState {
        match self.inner.phase.load(Ordering::Acquire) {
            SHUTDOWN_QUEUED | RENEGOTIATE_QUEUED => ControlChannelState::WriteQueued,
            SHUTDOWN_IN_FLIGHT => ControlChannelState::WriteInFlight,
            RENEGOTIATE_IN_FLIGHT => ControlChannelState::RenegotiationInFlight,
            _ if self.inner.shutdown_sent.load(Ordering::Acquire) => {
                ControlChannelState::ShutdownSent
            }
            _ => ControlChannelState::Idle,
        }
    }

    /// 关闭通知已发送，或会话已被握手引擎关闭。
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown_sent.load(Ordering::Acquire) || self.inner.session.is_closed()
    }

    /// 最近一次控制写入失败的传输错误。
    pub fn last_error(&self) -> Option<Arc<io::Error>> {
        self.inner.last_error.lock().clone()
    }

    /// 发起关闭通知写入。
    pub fn begin_shutdown(&self) -> Result<Arc<ControlOperation>, TlsControlError> {
        let inner = &self.inner;
        let kind = ControlOperationKind::Shutdown;

        if inner.shutdown_sent.load(Ordering::Acquire) {
            return Ok(inner.already_shut_down());
        }
        if let Err(current) = inner.phase.compare_exchange(
            IDLE,
            SHUTDOWN_QUEUED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            // 另一个关闭已占用写进行中标志但可能尚未置位 `shutdown_sent`。
            if matches!(current, SHUTDOWN_QUEUED | SHUTDOWN_IN_FLIGHT)
                || inner.shutdown_sent.load(Ordering::Acquire)
            {
                return Ok(inner.already_shut_down());
            }
            return Err(TlsControlError::nested(
                kind.name(),
                "another control operation is outstanding on this channel",
            ));
        }
        if inner
            .shutdown_sent
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            inner.phase.store(IDLE, Ordering::Release);
            return Ok(inner.already_shut_down());
        }

        let operation = Arc::new(ControlOperation::pending(inner.id, kind));
        inner.dispatch(
            &operation,
            inner.session.create_shutdown_message(),
            SHUTDOWN_IN_FLIGHT,
        );
        Ok(operation)
    }

    /// 等待关闭完成并取回结果。
    pub fn end_shutdown(&self, operation: &ControlOperation) -> Result<(), TlsControlError> {
        self.end(operation, ControlOperationKind::Shutdown)
    }

    /// 发起重协商请求写入。
    pub fn begin_renegotiate(&self) -> Result<Arc<ControlOperation>, TlsControlError> {
        let inner = &self.inner;
        let kind = ControlOperationKind::Renegotiate;

        if inner.role != ConnectionRole::Server {
            return Err(TlsControlError::nested(
                kind.name(),
                "only the server role may request renegotiation",
            ));
        }
        if inner.shutdown_sent.load(Ordering::Acquire) {
            return Err(TlsControlError::nested(
                kind.name(),
                "session shutdown already sent",
            ));
        }
        if inner
            .phase
            .compare_exchange(IDLE, RENEGOTIATE_QUEUED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TlsControlError::nested(
                kind.name(),
                "a control write is already in flight on this channel",
            ));
        }
        // 关闭可能在首次检查与 CAS 之间完成。
        if inner.shutdown_sent.load(Ordering::Acquire) {
            inner.phase.store(IDLE, Ordering::Release);
            return Err(TlsControlError::nested(
                kind.name(),
                "session shutdown already sent",
            ));
        }

        let operation = Arc::new(ControlOperation::pending(inner.id, kind));
        inner.dispatch(
            &operation,
            inner.session.create_hello_request(),
            RENEGOTIATE_IN_FLIGHT,
        );
        Ok(operation)
    }

    /// 等待重协商请求写出并取回结果。
    pub fn end_renegotiate(&self, operation: &ControlOperation) -> Result<(), TlsControlError> {
        self.end(operation, ControlOperationKind::Renegotiate)
    }

    /// `begin_shutdown` + 异步等待，不阻塞运行时线程。
    pub async fn shutdown(&self) -> Result<(), TlsControlError> {
        let operation = self.begin_shutdown()?;
        self.finish_async(&operation, ControlOperationKind::Shutdown).await
    }

    /// `begin_renegotiate` + 异步等待。
    pub async fn renegotiate(&self) -> Result<(), TlsControlError> {
        let operation = self.begin_renegotiate()?;
        self.finish_async(&operation, ControlOperationKind::Renegotiate).await
    }

    fn end(
        &self,
        operation: &ControlOperation,
        kind: ControlOperationKind,
    ) -> Result<(), TlsControlError> {
        operation.claim(self.inner.id, kind)?;
        operation
            .completion()
            .wait()
            .map_err(|source| TlsControlError::io(kind.error_kind(), source))
    }

    async fn finish_async(
        &self,
        operation: &ControlOperation,
        kind: ControlOperationKind,
    ) -> Result<(), TlsControlError> {
        operation.claim(self.inner.id, kind)?;
        operation
            .completion()
            .clone()
            .await
            .map_err(|source| TlsControlError::io(kind.error_kind(), source))
    }
}

impl ChannelInner {
    fn already_shut_down(&self) -> Arc<ControlOperation> {
        debug!(channel = self.id, "shutdown already sent; completing without write");
        Arc::new(ControlOperation::already_completed(
            self.id,
            ControlOperationKind::Shutdown,
        ))
    }

    /// 已占用 `phase` 的操作：排队等待写通道，获得后写出。
    fn dispatch(
        self: &Arc<Self>,
        operation: &Arc<ControlOperation>,
        message: io::Result<ProtocolControlMessage>,
        in_flight: u8,
    ) {
        let payload = match message {
            Ok(message) => message.into_payload(),
            Err(err) => {
                self.finish(operation, Err(err), true, false);
                return;
            }
        };

        let resume = {
            let inner = Arc::clone(self);
            let operation = Arc::clone(operation);
            let payload = payload.clone();
            move || inner.write(&operation, payload, in_flight, false)
        };
        match self.lane.acquire(resume) {
            LaneAdmission::Granted => self.write(operation, payload, in_flight, true),
            LaneAdmission::Queued => {
                debug!(
                    channel = self.id,
                    kind = ?operation.kind(),
                    "control write queued behind write lane"
                );
            }
        }
    }

    fn write(
        self: &Arc<Self>,
        operation: &Arc<ControlOperation>,
        payload: Bytes,
        in_flight: u8,
        inline: bool,
    ) {
        self.phase.store(in_flight, Ordering::Release);
        let callback: WriteCompletion = {
            let inner = Arc::clone(self);
            let operation = Arc::clone(operation);
            Box::new(move |result| inner.finish(&operation, result, false, true))
        };
        match self.transport.write(payload, callback) {
            WriteProgress::Completed(result) => self.finish(operation, result, inline, true),
            WriteProgress::Pending => {
                debug!(
                    channel = self.id,
                    kind = ?operation.kind(),
                    "control write pending on transport"
                );
            }
        }
    }

    fn finish(
        &self,
        operation: &ControlOperation,
        result: io::Result<()>,
        inline: bool,
        lane_held: bool,
    ) {
        self.phase.store(IDLE, Ordering::Release);
        if lane_held {
            self.lane.release();
        }
        match result {
            Ok(()) => {
                debug!(
                    channel = self.id,
                    kind = ?operation.kind(),
                    completed_synchronously = inline,
                    "control write completed"
                );
                operation.succeed(inline);
            }
            Err(err) => {
                let err = Arc::new(err);
                warn!(
                    channel = self.id,
                    kind = ?operation.kind(),
                    error = %err,
                    "control write failed"
                );
                *self.last_error.lock() = Some(Arc::clone(&err));
                operation.fail(err, inline);
            }
        }
    }
}

impl fmt::Debug for TlsControlChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsControlChannel")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .field("lane", &self.inner.lane)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::control::PlaintextRecordSession;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Deferred {
        writes: AtomicUsize,
        pending: Mutex<Vec<WriteCompletion>>,
    }

    impl Deferred {
        fn fire(&self, result: io::Result<()>) {
            let callback = self.pending.lock().pop().expect("存在挂起写入");
            callback(result);
        }
    }

    impl ControlTransport for Deferred {
        fn write(&self, _: Bytes, on_complete: WriteCompletion) -> WriteProgress {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.pending.lock().push(on_complete);
            WriteProgress::Pending
        }
    }

    fn server(transport: Arc<Deferred>) -> TlsControlChannel {
        TlsControlChannel::builder(transport, Arc::new(PlaintextRecordSession::default()))
            .role(ConnectionRole::Server)
            .build()
    }

    #[test]
    fn state_follows_write_lifecycle() {
        let transport = Arc::new(Deferred::default());
        let channel = server(Arc::clone(&transport));
        assert_eq!(channel.state(), ControlChannelState::Idle);

        let renegotiate = channel.begin_renegotiate().expect("服务端可发起重协商");
        assert_eq!(channel.state(), ControlChannelState::RenegotiationInFlight);
        transport.fire(Ok(()));
        channel.end_renegotiate(&renegotiate).expect("写入成功");
        assert!(!renegotiate.completed_synchronously());
        assert_eq!(channel.state(), ControlChannelState::Idle);

        let shutdown = channel.begin_shutdown().expect("可发起关闭");
        assert_eq!(channel.state(), ControlChannelState::WriteInFlight);
        transport.fire(Ok(()));
        channel.end_shutdown(&shutdown).expect("写入成功");
        assert_eq!(channel.state(), ControlChannelState::ShutdownSent);
        assert!(channel.is_closed());
        assert_eq!(transport.writes.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[traced_test]
    fn transport_failure_is_reported_and_recorded() {
        let transport = Arc::new(Deferred::default());
        let channel = server(Arc::clone(&transport));

        let operation = channel.begin_renegotiate().expect("服务端可发起重协商");
        transport.fire(Err(io::Error::new(io::ErrorKind::BrokenPipe, "reset")));
        let err = channel
            .end_renegotiate(&operation)
            .expect_err("传输错误必须上报");
        assert_eq!(err.code(), "spark.tls.control.renegotiate_failed");
        assert_eq!(
            err.io_error().map(io::Error::kind),
            Some(io::ErrorKind::BrokenPipe)
        );
        assert_eq!(
            channel.last_error().map(|err| err.kind()),
            Some(io::ErrorKind::BrokenPipe)
        );
        assert_eq!(channel.state(), ControlChannelState::Idle);
        assert!(logs_contain("control write failed"));
    }

    /// 握手引擎已在别处关闭会话，拒绝生成任何控制消息。
    struct ClosedSession;

    impl SessionContext for ClosedSession {
        fn create_shutdown_message(&self) -> io::Result<ProtocolControlMessage> {
            Err(io::Error::new(io::ErrorKind::NotConnected, "session torn down"))
        }

        fn create_hello_request(&self) -> io::Result<ProtocolControlMessage> {
            Err(io::Error::new(io::ErrorKind::NotConnected, "session torn down"))
        }

        fn is_closed(&self) -> bool {
            true
        }
    }

    #[test]
    fn session_error_fails_operation_without_touching_transport() {
        let transport = Arc::new(Deferred::default());
        let channel = TlsControlChannel::builder(
            Arc::clone(&transport) as Arc<dyn ControlTransport>,
            Arc::new(ClosedSession),
        )
        .role(ConnectionRole::Server)
        .build();

        let renegotiate = channel.begin_renegotiate().expect("写进行中标志空闲");
        assert!(renegotiate.completed_synchronously());
        let err = channel
            .end_renegotiate(&renegotiate)
            .expect_err("会话已关闭");
        assert_eq!(
            err.io_error().map(io::Error::kind),
            Some(io::ErrorKind::NotConnected)
        );
        assert_eq!(channel.state(), ControlChannelState::Idle);
        assert_eq!(transport.writes.load(Ordering::SeqCst), 0);
        assert!(!channel.write_lane().is_busy());
        assert!(channel.is_closed());
    }

    #[test]
    fn renegotiation_is_refused_once_shutdown_was_sent() {
        let transport = Arc::new(Deferred::default());
        let channel = server(Arc::clone(&transport));

        let shutdown = channel.begin_shutdown().expect("可发起关闭");
        transport.fire(Ok(()));
        channel.end_shutdown(&shutdown).expect("写入成功");

        let err = channel
            .begin_renegotiate()
            .expect_err("关闭已发送");
        assert!(matches!(err, TlsControlError::NestedOperation { .. }));
        assert_eq!(channel.state(), ControlChannelState::ShutdownSent);
        assert_eq!(transport.writes.load(Ordering::SeqCst), 1);
    }
}
