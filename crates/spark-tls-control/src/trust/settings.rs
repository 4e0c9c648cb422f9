use core::fmt;
use std::{any::Any, sync::Arc};

use crate::error::CallbackError;

use super::{Certificate, PolicyErrors};

/// 服务端证书回调的入参。
///
/// `chain` 仅在 [`ValidationSettings::callback_needs_full_chain`] 为 `true` 时携带完整链
/// （叶子在前），否则为 `None`，回调只能依据叶子证书与策略错误作出判断。
#[derive(Debug)]
pub struct ServerCertificateContext<'a> {
    pub target_host: &'a str,
    pub certificate: Option<&'a Certificate>,
    pub chain: Option<&'a [Certificate]>,
    pub policy_errors: PolicyErrors,
    pub user_data: Option<&'a (dyn Any + Send + Sync)>,
}

/// 客户端证书选择回调的入参。
#[derive(Debug)]
pub struct ClientCertificateContext<'a> {
    pub target_host: &'a str,
    pub local_certificates: &'a [Certificate],
    pub remote_certificate: Option<&'a Certificate>,
    pub acceptable_issuers: &'a [String],
}

/// 服务端证书回调：返回最终是否信任。
///
/// 回调在校验调用所在线程上同步执行，也就是握手线程本身；不得无限期阻塞。
pub type ServerCertificateCallback =
    Arc<dyn Fn(&ServerCertificateContext<'_>) -> Result<bool, CallbackError> + Send + Sync>;

/// 客户端证书选择回调。
pub type ClientCertificateSelector = Arc<
    dyn Fn(&ClientCertificateContext<'_>) -> Result<Option<Certificate>, CallbackError>
        + Send
        + Sync,
>;

/// 单个连接上下文的证书校验设置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 由嵌入方在连接上下文建立之前构造，交给校验器工厂与协调器后即视为只读；
/// - 只读性由类型保证：本结构体没有任何 setter，唯一的构造入口是
///   [`ValidationSettingsBuilder::build`]，产出 `Arc<ValidationSettings>` 供多方共享。
///
/// ## 契约（What）
/// - 默认值：`check_certificate_name = true`、`check_revocation = false`、
///   `use_external_default_policy = false`、`skip_system_validators = false`、
///   `callback_needs_full_chain = true`，回调与用户数据为空；
/// - 生命周期长于连接上下文，可被多个上下文复用。
#[derive(Clone)]
pub struct ValidationSettings {
    check_certificate_name: bool,
    check_revocation: bool,
    use_external_default_policy: bool,
    skip_system_validators: bool,
    callback_needs_full_chain: bool,
    server_callback: Option<ServerCertificateCallback>,
    client_cert_selector: Option<ClientCertificateSelector>,
    user_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl ValidationSettings {
    pub fn builder() -> ValidationSettingsBuilder {
        ValidationSettingsBuilder::default()
    }

    pub fn check_certificate_name(&self) -> bool {
        self.check_certificate_name
    }

    pub fn check_revocation(&self) -> bool {
        self.check_revocation
    }

    pub fn use_external_default_policy(&self) -> bool {
        self.use_external_default_policy
    }

    pub fn skip_system_validators(&self) -> bool {
        self.skip_system_validators
    }

    pub fn callback_needs_full_chain(&self) -> bool {
        self.callback_needs_full_chain
    }

    pub fn server_callback(&self) -> Option<&ServerCertificateCallback> {
        self.server_callback.as_ref()
    }

    pub fn client_cert_selector(&self) -> Option<&ClientCertificateSelector> {
        self.client_cert_selector.as_ref()
    }

    /// 嵌入方附带的不透明数据，原样转交给回调。
    pub fn user_data(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.user_data.as_deref()
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            check_certificate_name: true,
            check_revocation: false,
            use_external_default_policy: false,
            skip_system_validators: false,
            callback_needs_full_chain: true,
            server_callback: None,
            client_cert_selector: None,
            user_data: None,
        }
    }
}

impl fmt::Debug for ValidationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationSettings")
            .field("check_certificate_name", &self.check_certificate_name)
            .field("check_revocation", &self.check_revocation)
            .field(
                "use_external_default_policy",
                &self.use_external_default_policy,
            )
            .field("skip_system_validators", &self.skip_system_validators)
            .field("callback_needs_full_chain", &self.callback_needs_full_chain)
            .field("server_callback", &self.server_callback.is_some())
            .field("client_cert_selector", &self.client_cert_selector.is_some())
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

/// [`ValidationSettings`] 的建造器。
#[derive(Default)]
pub struct ValidationSettingsBuilder {
    settings: ValidationSettings,
}

impl ValidationSettingsBuilder {
    pub fn check_certificate_name(mut self, enabled: bool) -> Self {
        self.settings.check_certificate_name = enabled;
        self
    }

    pub fn check_revocation(mut self, enabled: bool) -> Self {
        self.settings.check_revocation = enabled;
        self
    }

    pub fn use_external_default_policy(mut self, enabled: bool) -> Self {
        self.settings.use_external_default_policy = enabled;
        self
    }

    pub fn skip_system_validators(mut self, enabled: bool) -> Self {
        self.settings.skip_system_validators = enabled;
        self
    }

    pub fn callback_needs_full_chain(mut self, enabled: bool) -> Self {
        self.settings.callback_needs_full_chain = enabled;
        self
    }

    pub fn server_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ServerCertificateContext<'_>) -> Result<bool, CallbackError> + Send + Sync + 'static,
    {
        self.settings.server_callback = Some(Arc::new(callback));
        self
    }

    pub fn client_cert_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&ClientCertificateContext<'_>) -> Result<Option<Certificate>, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        self.settings.client_cert_selector = Some(Arc::new(selector));
        self
    }

    pub fn user_data<T: Any + Send + Sync>(mut self, data: T) -> Self {
        self.settings.user_data = Some(Arc::new(data));
        self
    }

    /// 冻结设置；之后只能通过共享引用读取。
    pub fn build(self) -> Arc<ValidationSettings> {
        Arc::new(self.settings)
    }
}
