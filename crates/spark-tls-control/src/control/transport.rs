use std::io;

use bytes::Bytes;

/// 传输层写完成回调。
pub type WriteCompletion = Box<dyn FnOnce(io::Result<()>) + Send + 'static>;

/// 一次写入的推进情况。
#[derive(Debug)]
pub enum WriteProgress {
    /// 写入已在调用栈内完成；随附的回调被丢弃且永远不会被调用。
    Completed(io::Result<()>),
    /// 写入仍在进行；回调稍后（可能在其他线程上）恰好被调用一次。
    Pending,
}

/// 控制通道依赖的传输层写能力。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 控制通道以组合方式包裹传输层，而不是把自身嵌入某个具体流类型；任何能“写出一段字节并报告结果”
///   的实现都可以接入；
/// - 同步完成与异步完成都是合法路径：同步完成时控制通道在当前调用栈内完成操作，避免额外的调度跳转
///   与回调递归。
///
/// ## 契约（What）
/// - 返回 [`WriteProgress::Completed`] 时不得调用 `on_complete`；
/// - 返回 [`WriteProgress::Pending`] 时必须在之后恰好调用一次 `on_complete`；
/// - 实现必须写出完整载荷，部分写入由实现内部处理。
pub trait ControlTransport: Send + Sync + 'static {
    fn write(&self, payload: Bytes, on_complete: WriteCompletion) -> WriteProgress;
}

#[cfg(feature = "runtime-tokio")]
pub use self::tokio_adapter::TokioWriteTransport;

#[cfg(feature = "runtime-tokio")]
mod tokio_adapter {
    use std::{fmt, io, sync::Arc};

    use bytes::Bytes;
    use tokio::{
        io::{AsyncWrite, AsyncWriteExt},
        runtime::Handle,
        sync::Mutex as AsyncMutex,
    };
    use tracing::{debug, warn};

    use super::{ControlTransport, WriteCompletion, WriteProgress};

    /// 将任意 `AsyncWrite` 接入控制通道的 Tokio 适配器。
    ///
    /// 每次写入在给定运行时上派生一个任务，持有写端互斥锁完成 `write_all + flush` 后回调，
    /// 因此总是以 [`WriteProgress::Pending`] 返回。写端以 `tokio::sync::Mutex` 共享，
    /// 应用数据写者可通过 [`TokioWriteTransport::writer`] 取得同一写端。
    pub struct TokioWriteTransport<W> {
        writer: Arc<AsyncMutex<W>>,
        handle: Handle,
    }

    impl<W> TokioWriteTransport<W>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        pub fn new(writer: W, handle: Handle) -> Self {
            Self {
                writer: Arc::new(AsyncMutex::new(writer)),
                handle,
            }
        }

        /// 使用当前线程所在的 Tokio 运行时；在运行时之外调用时返回错误。
        pub fn current(writer: W) -> io::Result<Self> {
            let handle = Handle::try_current().map_err(io::Error::other)?;
            Ok(Self::new(writer, handle))
        }

        pub fn writer(&self) -> &Arc<AsyncMutex<W>> {
            &self.writer
        }
    }

    impl<W> ControlTransport for TokioWriteTransport<W>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        fn write(&self, payload: Bytes, on_complete: WriteCompletion) -> WriteProgress {
            let writer = Arc::clone(&self.writer);
            let completion = CompletionGuard(Some(on_complete));
            self.handle.spawn(async move {
                let mut writer = writer.lock().await;
                let result = match writer.write_all(&payload).await {
                    Ok(()) => writer.flush().await,
                    Err(err) => Err(err),
                };
                drop(writer);
                debug!(
                    len = payload.len(),
                    ok = result.is_ok(),
                    "tokio control write finished"
                );
                completion.complete(result);
            });
            WriteProgress::Pending
        }
    }

    /// 保证挂起写入的回调恰好被调用一次：运行时关闭会直接丢弃尚未完成的任务，
    /// 此时由 `Drop` 以错误补发回调，避免操作永远挂起、写通道永远被占用。
    struct CompletionGuard(Option<WriteCompletion>);

    impl CompletionGuard {
        fn complete(mut self, result: io::Result<()>) {
            if let Some(on_complete) = self.0.take() {
                on_complete(result);
            }
        }
    }

    impl Drop for CompletionGuard {
        fn drop(&mut self) {
            if let Some(on_complete) = self.0.take() {
                warn!("tokio runtime dropped a pending control write");
                on_complete(Err(io::Error::other(
                    "tokio runtime shut down before control write completed",
                )));
            }
        }
    }

    impl<W> fmt::Debug for TokioWriteTransport<W> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("TokioWriteTransport").finish_non_exhaustive()
        }
    }
}
