//! 证书链信任决策路径。
//!
//! 自叶向根：[`TrustDecision`] 是单次判定结果；[`ValidationSettings`] 是连接上下文的只读设置；
//! [`ActiveValidator`] 由 [`ValidatorRegistry`] 以“先发布者胜出”方式惰性创建；
//! [`CertificateValidationCoordinator`] 把校验器、用户回调与角色修正折叠成一个结论，
//! 并在 `rustls-bridge` 特性下通过 [`rustls_bridge`] 接入 rustls 握手。

mod certificate;
mod coordinator;
mod decision;
pub mod external;
mod registry;
#[cfg(feature = "rustls-bridge")]
pub mod rustls_bridge;
mod settings;
mod validator;

pub use certificate::Certificate;
pub use coordinator::{CertificateValidationCoordinator, ValidationRole};
pub use decision::{PolicyErrorFlag, PolicyErrors, TrustDecision, codes};
pub use registry::ValidatorRegistry;
pub use settings::{
    ClientCertificateContext, ClientCertificateSelector, ServerCertificateCallback,
    ServerCertificateContext, ValidationSettings, ValidationSettingsBuilder,
};
pub use validator::{
    ActiveValidator, PinnedTrustStore, PinnedValidator, PinnedValidatorFactory, ValidatorFactory,
};
