use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;

/// 控制消息的种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlMessageKind {
    /// 会话关闭通知（`close_notify` 告警）。
    ShutdownNotify,
    /// 服务端发起的重协商请求（`hello_request`）。
    HelloRequest,
}

/// 由握手引擎产出、交给写通道一次性消费的控制消息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolControlMessage {
    kind: ControlMessageKind,
    payload: Bytes,
}

impl ProtocolControlMessage {
    pub fn new(kind: ControlMessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> ControlMessageKind {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// 握手引擎边界：依据当前会话状态生成控制消息。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 记录层加密、密钥状态都属于握手引擎；控制通道只需要“给我一条可直接写出的消息”，
///   因此以 trait 表达该边界，由嵌入方注入实现。
///
/// ## 契约（What）
/// - 两个构造方法可能在任意线程上被调用，但同一通道同一时刻至多一个调用在进行；
/// - 返回的载荷必须可原样写入传输层；失败以 `io::Error` 表达，并作为操作的 I/O 失败上报。
pub trait SessionContext: Send + Sync + 'static {
    fn create_shutdown_message(&self) -> io::Result<ProtocolControlMessage>;

    fn create_hello_request(&self) -> io::Result<ProtocolControlMessage>;

    /// 会话是否已被本端关闭。
    fn is_closed(&self) -> bool;
}

const CONTENT_TYPE_ALERT: u8 = 0x15;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const ALERT_LEVEL_WARNING: u8 = 0x01;
const ALERT_CLOSE_NOTIFY: u8 = 0x00;
const HANDSHAKE_HELLO_REQUEST: u8 = 0x00;

/// 以明文记录编码控制消息的参考实现。
///
/// 适用于握手尚未启用记录保护的场景以及测试：`close_notify` 编码为 7 字节告警记录，
/// `hello_request` 编码为 9 字节握手记录。生成关闭通知后会话即视为关闭，之后的重协商请求以
/// `NotConnected` 失败。
#[derive(Debug)]
pub struct PlaintextRecordSession {
    version: [u8; 2],
    closed: AtomicBool,
}

impl Default for PlaintextRecordSession {
    fn default() -> Self {
        Self::new([0x03, 0x03])
    }
}

impl PlaintextRecordSession {
    /// `version` 为记录头中的协议版本，例如 TLS 1.2 为 `[0x03, 0x03]`。
    pub fn new(version: [u8; 2]) -> Self {
        Self {
            version,
            closed: AtomicBool::new(false),
        }
    }

    fn record(&self, content_type: u8, body: &[u8]) -> io::Result<Bytes> {
        let length = u16::try_from(body.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "record body exceeds the 16-bit length field",
            )
        })?;
        let mut record = Vec::with_capacity(5 + body.len());
        record.push(content_type);
        record.extend_from_slice(&self.version);
        record.extend_from_slice(&length.to_be_bytes());
        record.extend_from_slice(body);
        Ok(Bytes::from(record))
    }
}

impl SessionContext for PlaintextRecordSession {
    fn create_shutdown_message(&self) -> io::Result<ProtocolControlMessage> {
        self.closed.store(true, Ordering::Release);
        Ok(ProtocolControlMessage::new(
            ControlMessageKind::ShutdownNotify,
            self.record(
                CONTENT_TYPE_ALERT,
                &[ALERT_LEVEL_WARNING, ALERT_CLOSE_NOTIFY],
            )?,
        ))
    }

    fn create_hello_request(&self) -> io::Result<ProtocolControlMessage> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "session already closed; cannot request renegotiation",
            ));
        }
        Ok(ProtocolControlMessage::new(
            ControlMessageKind::HelloRequest,
            self.record(CONTENT_TYPE_HANDSHAKE, &[HANDSHAKE_HELLO_REQUEST, 0, 0, 0])?,
        ))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_records_match_wire_layout() {
        let session = PlaintextRecordSession::default();

        let hello = session.create_hello_request().expect("会话未关闭");
        assert_eq!(hello.kind(), ControlMessageKind::HelloRequest);
        assert_eq!(
            hello.payload().as_ref(),
            &[0x16, 0x03, 0x03, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00]
        );

        let close = session.create_shutdown_message().expect("关闭通知总能生成");
        assert_eq!(close.kind(), ControlMessageKind::ShutdownNotify);
        assert_eq!(
            close.into_payload().as_ref(),
            &[0x15, 0x03, 0x03, 0x00, 0x02, 0x01, 0x00]
        );
        assert!(session.is_closed());

        let err = session
            .create_hello_request()
            .expect_err("关闭后不得再请求重协商");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn oversized_record_body_is_rejected() {
        let session = PlaintextRecordSession::default();
        let body = vec![0u8; usize::from(u16::MAX) + 1];
        let err = session
            .record(CONTENT_TYPE_HANDSHAKE, &body)
            .expect_err("长度字段只有 16 位");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let fits = session
            .record(CONTENT_TYPE_HANDSHAKE, &body[..usize::from(u16::MAX)])
            .expect("恰好填满长度字段");
        assert_eq!(&fits[3..5], &[0xff, 0xff]);
    }
}
