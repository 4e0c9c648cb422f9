use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::TlsControlError;

use super::{
    ActiveValidator, Certificate, ClientCertificateContext, PolicyErrorFlag,
    ServerCertificateContext, TrustDecision, ValidationSettings, ValidatorRegistry,
    decision::codes, external, validator::first_local_certificate,
};

/// 本端在连接中的角色，决定对端证书是否必需。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationRole {
    /// 发起方：校验服务端证书链，对端证书总是必需。
    Client,
    /// 响应方：校验客户端证书链。
    Server { client_certificate_required: bool },
}

impl ValidationRole {
    pub fn requires_remote_certificate(self) -> bool {
        match self {
            ValidationRole::Client => true,
            ValidationRole::Server {
                client_certificate_required,
            } => client_certificate_required,
        }
    }
}

/// 握手引擎使用的信任决策门面。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 握手引擎只需要一个“给我一条链，告诉我信不信”的钩子；用户回调、进程级默认策略、角色相关的
///   策略修正都收敛在这里，引擎无需感知；
/// - 多个、可能冲突的策略输入最终折叠成一个 [`TrustDecision`]。
///
/// ## 逻辑（How）
/// 1. 委托活跃校验器得到基线判定；
/// 2. 若存在服务端回调（设置自带，或在 `use_external_default_policy` 下取进程级默认回调），以回调
///    结论为准，并在“基线放行而回调拒绝”时标记 `user_denied`；
/// 3. 无回调时沿用基线，但若当前角色不要求对端证书，先从错误集合中剔除
///    `RemoteCertificateNotAvailable` 再计算 `trusted`。
///
/// ## 契约（What）
/// - “链不可信”是正常返回值，永远不会以 `Err` 表达；
/// - 回调失败返回 [`TlsControlError::ValidationCallback`]，握手引擎必须视作致命握手失败；
/// - 未安装校验器时 `validate_chain` 返回配置错误，`select_client_certificate` 回退到默认策略。
///
/// ## 风险与权衡（Trade-offs）
/// - 回调在调用线程上同步执行，也就是握手线程本身；长时间阻塞的回调会直接拖慢握手。
#[derive(Clone, Debug)]
pub struct CertificateValidationCoordinator {
    settings: Arc<ValidationSettings>,
    validator: Option<Arc<dyn ActiveValidator>>,
    role: ValidationRole,
}

impl CertificateValidationCoordinator {
    pub fn new(
        settings: Arc<ValidationSettings>,
        validator: Arc<dyn ActiveValidator>,
        role: ValidationRole,
    ) -> Self {
        Self {
            settings,
            validator: Some(validator),
            role,
        }
    }

    /// 未安装校验器的协调器，仅用于客户端证书选择等不需要链校验的场景。
    pub fn without_validator(settings: Arc<ValidationSettings>, role: ValidationRole) -> Self {
        Self {
            settings,
            validator: None,
            role,
        }
    }

    /// 从注册表取得（必要时创建）活跃校验器并构造协调器。
    pub fn from_registry(
        registry: &ValidatorRegistry,
        role: ValidationRole,
    ) -> Result<Self, TlsControlError> {
        let validator = registry.get_or_create()?;
        Ok(Self::new(Arc::clone(registry.settings()), validator, role))
    }

    pub fn settings(&self) -> &Arc<ValidationSettings> {
        &self.settings
    }

    pub fn role(&self) -> ValidationRole {
        self.role
    }

    pub fn validator(&self) -> Option<&Arc<dyn ActiveValidator>> {
        self.validator.as_ref()
    }

    /// 校验证书链（叶子在前）并给出最终信任决策。
    pub fn validate_chain(
        &self,
        target_host: &str,
        chain: &[Certificate],
    ) -> Result<TrustDecision, TlsControlError> {
        let validator = self
            .validator
            .as_ref()
            .ok_or_else(|| TlsControlError::configuration("no active validator installed"))?;
        let baseline = validator.validate_chain(target_host, chain);

        let callback = self.settings.server_callback().cloned().or_else(|| {
            self.settings
                .use_external_default_policy()
                .then(external::default_server_callback)
                .flatten()
        });

        let decision = match callback {
            Some(callback) => {
                let context = ServerCertificateContext {
                    target_host,
                    certificate: chain.first(),
                    chain: self.settings.callback_needs_full_chain().then_some(chain),
                    policy_errors: baseline.policy_errors(),
                    user_data: self.settings.user_data(),
                };
                let verdict = callback(&context).map_err(|source| {
                    warn!(host = target_host, error = %source, "server certificate callback failed");
                    TlsControlError::ValidationCallback {
                        host: target_host.to_owned(),
                        source,
                    }
                })?;
                TrustDecision::from_user_verdict(
                    verdict,
                    baseline.policy_errors(),
                    baseline.error_code(),
                )
            }
            None => {
                let mut errors = baseline.policy_errors();
                if !self.role.requires_remote_certificate() {
                    errors = errors.without(PolicyErrorFlag::RemoteCertificateNotAvailable);
                }
                let code = if errors.is_empty() {
                    codes::NONE
                } else {
                    baseline.error_code()
                };
                TrustDecision::from_policy(errors, code)
            }
        };

        debug!(
            host = target_host,
            chain_len = chain.len(),
            trusted = decision.is_trusted(),
            user_denied = decision.user_denied(),
            policy_errors = ?decision.policy_errors(),
            "certificate chain decision"
        );
        Ok(decision)
    }

    /// 选择本端要出示的客户端证书。
    ///
    /// 优先级：设置中的选择回调 → 活跃校验器 → 默认策略（第一张本地证书）。
    pub fn select_client_certificate(
        &self,
        target_host: &str,
        local_certificates: &[Certificate],
        remote_certificate: Option<&Certificate>,
        acceptable_issuers: &[String],
    ) -> Result<Option<Certificate>, TlsControlError> {
        if let Some(selector) = self.settings.client_cert_selector() {
            let context = ClientCertificateContext {
                target_host,
                local_certificates,
                remote_certificate,
                acceptable_issuers,
            };
            return selector(&context).map_err(|source| {
                warn!(host = target_host, error = %source, "client certificate selector failed");
                TlsControlError::ValidationCallback {
                    host: target_host.to_owned(),
                    source,
                }
            });
        }

        Ok(match &self.validator {
            Some(validator) => validator.select_client_certificate(
                target_host,
                local_certificates,
                remote_certificate,
                acceptable_issuers,
            ),
            None => first_local_certificate(local_certificates),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::{PolicyErrors, TrustDecision};
    use tracing_test::traced_test;

    #[derive(Debug)]
    struct Fixed(TrustDecision);

    impl ActiveValidator for Fixed {
        fn validate_chain(&self, _: &str, _: &[Certificate]) -> TrustDecision {
            self.0
        }
    }

    fn missing_certificate() -> Arc<dyn ActiveValidator> {
        Arc::new(Fixed(TrustDecision::from_policy(
            PolicyErrorFlag::RemoteCertificateNotAvailable.into(),
            codes::NO_CERTIFICATE,
        )))
    }

    #[test]
    fn missing_certificate_is_masked_only_when_not_required() {
        let settings = ValidationSettings::builder().build();

        let optional = CertificateValidationCoordinator::new(
            Arc::clone(&settings),
            missing_certificate(),
            ValidationRole::Server {
                client_certificate_required: false,
            },
        );
        let decision = optional.validate_chain("", &[]).expect("无回调时不应出错");
        assert!(decision.is_trusted());
        assert_eq!(decision.policy_errors(), PolicyErrors::NONE);
        assert_eq!(decision.error_code(), codes::NONE);

        let required = CertificateValidationCoordinator::new(
            settings,
            missing_certificate(),
            ValidationRole::Server {
                client_certificate_required: true,
            },
        );
        assert!(!required.validate_chain("", &[]).expect("无回调").is_trusted());
    }

    #[test]
    fn callback_sees_leaf_only_when_full_chain_not_needed() {
        let settings = ValidationSettings::builder()
            .callback_needs_full_chain(false)
            .server_callback(|ctx| Ok(ctx.chain.is_none() && ctx.certificate.is_some()))
            .build();
        let coordinator = CertificateValidationCoordinator::new(
            settings,
            Arc::new(Fixed(TrustDecision::trusted())),
            ValidationRole::Client,
        );
        let chain = [Certificate::from_der(&b"leaf"[..])];
        let decision = coordinator
            .validate_chain("svc.internal", &chain)
            .expect("回调成功");
        assert!(decision.is_trusted());
    }

    #[test]
    #[traced_test]
    fn failing_callback_is_surfaced_as_callback_error() {
        let settings = ValidationSettings::builder()
            .server_callback(|_| Err("policy service unreachable".into()))
            .build();
        let coordinator = CertificateValidationCoordinator::new(
            settings,
            Arc::new(Fixed(TrustDecision::trusted())),
            ValidationRole::Client,
        );
        let err = coordinator
            .validate_chain("svc.internal", &[])
            .expect_err("回调失败必须上抛");
        assert!(matches!(
            err,
            TlsControlError::ValidationCallback { ref host, .. } if host == "svc.internal"
        ));
        assert!(logs_contain("server certificate callback failed"));
    }

    #[test]
    fn validation_without_validator_is_a_configuration_error() {
        let coordinator = CertificateValidationCoordinator::without_validator(
            ValidationSettings::builder().build(),
            ValidationRole::Client,
        );
        let err = coordinator
            .validate_chain("svc.internal", &[])
            .expect_err("缺少校验器");
        assert_eq!(err.code(), "spark.tls.trust.configuration_failed");
    }

    #[test]
    fn client_selection_prefers_selector_then_falls_back_to_first() {
        let local = [
            Certificate::from_der(&b"a"[..]),
            Certificate::from_der(&b"b"[..]),
        ];

        let fallback = CertificateValidationCoordinator::without_validator(
            ValidationSettings::builder().build(),
            ValidationRole::Client,
        );
        assert_eq!(
            fallback
                .select_client_certificate("svc.internal", &local, None, &[])
                .expect("默认策略不会失败"),
            Some(local[0].clone())
        );
        assert_eq!(
            fallback
                .select_client_certificate("svc.internal", &[], None, &[])
                .expect("默认策略不会失败"),
            None
        );

        let custom = CertificateValidationCoordinator::without_validator(
            ValidationSettings::builder()
                .client_cert_selector(|ctx| Ok(ctx.local_certificates.last().cloned()))
                .build(),
            ValidationRole::Client,
        );
        assert_eq!(
            custom
                .select_client_certificate("svc.internal", &local, None, &[])
                .expect("选择回调成功"),
            Some(local[1].clone())
        );
    }
}
