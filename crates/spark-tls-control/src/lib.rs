#![doc = r#"
# spark-tls-control

## 设计动机（Why）
- **信任漏斗**：握手引擎只关心“这条证书链能否信任”，而答案可能来自平台校验器、用户回调、进程级默认策略以及
  角色相关的修正；本 crate 把这些输入折叠成唯一的 [`TrustDecision`](trust::TrustDecision)；
- **控制通道**：关闭（`close_notify`）与重协商（`hello_request`）是与应用数据共享同一条流的带外消息，必须
  保证线上不交错、关闭只发送一次。

## 核心契约（What）
- [`ValidatorRegistry`](trust::ValidatorRegistry)：每个连接上下文恰好发布一个活跃校验器，构造允许并发、发布以
  “先发布者胜出”裁决，构造失败不缓存；
- [`CertificateValidationCoordinator`](trust::CertificateValidationCoordinator)：`validate_chain` 与
  `select_client_certificate` 两个入口，“不可信”是正常返回值，回调失败才是错误；
- [`TlsControlChannel`](control::TlsControlChannel)：`begin_*/end_*` 成对的关闭与重协商操作，结果经
  [`AsyncOperation`](control::AsyncOperation) 交付；
- 所有流程错误统一为 [`TlsControlError`]，附带稳定错误码。

## 实现策略（How）
- 校验器发布依托 `arc-swap` 的 `compare_and_swap`，读路径无锁；
- 控制通道以两个独立原子量（写进行中、关闭已发送）守护状态机，不使用全局锁；
- `rustls-bridge` 特性把协调器接入 rustls 的 `ServerCertVerifier`/`ClientCertVerifier`；`runtime-tokio` 特性提供
  基于 `AsyncWrite` 的传输适配。

## 风险与考量（Trade-offs）
- 本 crate 不解析证书，也不做记录层加密；内置的 [`PinnedValidator`](trust::PinnedValidator) 仅比对 SHA-256 指纹；
- 控制写入不可取消，`end_*` 会阻塞调用线程；异步环境应使用 `shutdown().await`/`renegotiate().await`。
"#]
#![deny(unsafe_code)]

pub mod config;
pub mod control;
pub mod error;
pub mod trust;

pub use config::{PinnedTrustConfig, TrustConfig, ValidationProfile};
pub use control::{
    AsyncOperation, ConnectionRole, ControlChannelState, ControlOperation, ControlTransport,
    SessionContext, TlsControlChannel, WriteLane,
};
pub use error::{CallbackError, TlsControlError};
pub use trust::{
    ActiveValidator, CertificateValidationCoordinator, TrustDecision, ValidationRole,
    ValidationSettings, ValidatorRegistry,
};
