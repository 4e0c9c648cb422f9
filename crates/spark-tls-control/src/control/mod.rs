//! 会话控制通道。
//!
//! [`TlsControlChannel`] 在共享传输上串行化关闭与重协商消息；消息由 [`SessionContext`] 生成，
//! 经 [`WriteLane`] 写入 [`ControlTransport`]，结果通过 [`ControlOperation`] 交付。

mod channel;
mod lane;
mod message;
mod operation;
mod transport;

pub use channel::{ConnectionRole, ControlChannelState, TlsControlChannel, TlsControlChannelBuilder};
pub use lane::{LaneAdmission, WriteLane};
pub use message::{
    ControlMessageKind, PlaintextRecordSession, ProtocolControlMessage, SessionContext,
};
pub use operation::{AsyncOperation, ControlOperation, ControlOperationKind};
#[cfg(feature = "runtime-tokio")]
pub use transport::TokioWriteTransport;
pub use transport::{ControlTransport, WriteCompletion, WriteProgress};
