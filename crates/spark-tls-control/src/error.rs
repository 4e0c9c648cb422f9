use std::{borrow::Cow, error::Error as StdError, io, sync::Arc};

use thiserror::Error;

/// 用户回调返回的错误类型。
///
/// 回调运行在握手线程上，任何失败都必须被视作“信任无法确认”，因此这里只要求满足
/// `Send + Sync`，不约束具体错误结构。
pub type CallbackError = Box<dyn StdError + Send + Sync + 'static>;

/// 描述一次控制操作的错误码及默认文案。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 控制通道上只有两类写操作（关闭、重协商），二者共享同一条写路径；
///   通过 `OperationKind` 把“哪一种操作失败”编码进错误，调用方无需解析文案。
///
/// ## 契约（What）
/// - `code`：稳定错误码，可供运维脚本与测试断言；
/// - `message`：默认文案，同时作为 `tracing` 事件中的操作名。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const SHUTDOWN: OperationKind = OperationKind {
    code: "spark.tls.control.shutdown_failed",
    message: "tls shutdown",
};

pub const RENEGOTIATE: OperationKind = OperationKind {
    code: "spark.tls.control.renegotiate_failed",
    message: "tls renegotiate",
};

/// 信任决策与控制通道的统一错误类型。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将“证书不可信”与“流程失败”严格区分：前者是正常的 [`TrustDecision`](crate::trust::TrustDecision)
///   返回值，后者才进入本枚举；
/// - 每个变体都附带稳定错误码（见 [`TlsControlError::code`]），与传输层
///   `spark.transport.tls.*` 的命名方式保持一致。
///
/// ## 契约（What）
/// - `Configuration`：校验器构造失败，不会被缓存，下一次调用会重新构造；
/// - `ValidationCallback`：用户回调失败，握手引擎必须将其视作致命握手错误；
/// - `NestedOperation`：同一通道上已有控制操作未完成，或当前角色不支持该操作；
/// - `InvalidArgument`：`end_*` 收到不匹配或已被消费的操作句柄；
/// - `Io`：底层传输写失败，包装原始 `io::Error` 并交给等待者。
///
/// ## 风险与权衡（Trade-offs）
/// - `Io` 以 `Arc<io::Error>` 持有源错误，使同一失败可经由可克隆的完成单元多处读取；
///   代价是无法再按值取回原始 `io::Error`。
#[derive(Debug, Error)]
pub enum TlsControlError {
    #[error("validator configuration failed: {reason}")]
    Configuration { reason: Cow<'static, str> },

    #[error("certificate validation callback failed for `{host}`: {source}")]
    ValidationCallback {
        host: String,
        #[source]
        source: CallbackError,
    },

    #[error("`{operation}` rejected: {reason}")]
    NestedOperation {
        operation: &'static str,
        reason: &'static str,
    },

    #[error("invalid argument for `{operation}`: {reason}")]
    InvalidArgument {
        operation: &'static str,
        reason: &'static str,
    },

    #[error("{}: {source}", .kind.message)]
    Io {
        kind: OperationKind,
        #[source]
        source: Arc<io::Error>,
    },
}

impl TlsControlError {
    /// 构造配置错误。
    pub fn configuration(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn nested(operation: &'static str, reason: &'static str) -> Self {
        Self::NestedOperation { operation, reason }
    }

    pub(crate) fn invalid_argument(operation: &'static str, reason: &'static str) -> Self {
        Self::InvalidArgument { operation, reason }
    }

    pub(crate) fn io(kind: OperationKind, source: Arc<io::Error>) -> Self {
        Self::Io { kind, source }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "spark.tls.trust.configuration_failed",
            Self::ValidationCallback { .. } => "spark.tls.trust.callback_failed",
            Self::NestedOperation { .. } => "spark.tls.control.nested_operation",
            Self::InvalidArgument { .. } => "spark.tls.control.invalid_argument",
            Self::Io { kind, .. } => kind.code,
        }
    }

    /// 底层传输错误（若有）。
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Io { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
