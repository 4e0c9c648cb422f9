use core::fmt;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::error::TlsControlError;

use super::{
    Certificate, PolicyErrorFlag, PolicyErrors, TrustDecision, ValidationSettings, decision::codes,
};

/// 活跃校验器：对证书链给出基线判定，并可参与客户端证书选择。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 具体的信任策略（系统证书库、固定指纹、企业策略……）由外部提供，协调器只依赖这一能力接口，
///   通过依赖注入在上下文构造时确定实现，而非运行期类型查找；
///
/// ## 契约（What）
/// - 实现必须可在任意多个线程上并发调用，且不得持有按调用变化的可变状态；
/// - `validate_chain` 对“不可信”返回正常的 [`TrustDecision`]，不得把它表达为错误；
/// - `chain` 按握手引擎提供的顺序排列，叶子证书在前。
pub trait ActiveValidator: Send + Sync + fmt::Debug {
    fn validate_chain(&self, target_host: &str, chain: &[Certificate]) -> TrustDecision;

    /// 默认策略：有本地证书时返回第一张，否则不出示证书。
    fn select_client_certificate(
        &self,
        target_host: &str,
        local_certificates: &[Certificate],
        remote_certificate: Option<&Certificate>,
        acceptable_issuers: &[String],
    ) -> Option<Certificate> {
        let _ = (target_host, remote_certificate, acceptable_issuers);
        first_local_certificate(local_certificates)
    }
}

pub(crate) fn first_local_certificate(local_certificates: &[Certificate]) -> Option<Certificate> {
    local_certificates.first().cloned()
}

/// 校验器工厂，由 [`ValidatorRegistry`](super::ValidatorRegistry) 在首次使用时调用。
///
/// 构造可能代价高昂（探测平台证书库等）；失败时返回
/// [`TlsControlError::Configuration`]，注册表不会缓存失败结果。
pub trait ValidatorFactory: Send + Sync {
    fn create(
        &self,
        settings: &Arc<ValidationSettings>,
    ) -> Result<Arc<dyn ActiveValidator>, TlsControlError>;
}

impl<F> ValidatorFactory for F
where
    F: Fn(&Arc<ValidationSettings>) -> Result<Arc<dyn ActiveValidator>, TlsControlError>
        + Send
        + Sync,
{
    fn create(
        &self,
        settings: &Arc<ValidationSettings>,
    ) -> Result<Arc<dyn ActiveValidator>, TlsControlError> {
        self(settings)
    }
}

/// 以 SHA-256 指纹表达的信任材料。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PinnedTrustStore {
    pub anchors: HashSet<[u8; 32]>,
    pub host_pins: HashMap<String, HashSet<[u8; 32]>>,
    pub revoked: HashSet<[u8; 32]>,
}

impl PinnedTrustStore {
    pub fn with_anchor(mut self, certificate: &Certificate) -> Self {
        self.anchors.insert(certificate.fingerprint());
        self
    }

    pub fn with_host_pin(mut self, host: impl Into<String>, certificate: &Certificate) -> Self {
        self.host_pins
            .entry(host.into().to_ascii_lowercase())
            .or_default()
            .insert(certificate.fingerprint());
        self
    }

    pub fn with_revoked(mut self, certificate: &Certificate) -> Self {
        self.revoked.insert(certificate.fingerprint());
        self
    }
}

/// 基于指纹固定的内置校验器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 提供一个无需解析证书的具体实现，既可用于测试与演示，也适用于只信任少量已知证书的内网部署；
///
/// ## 逻辑（How）
/// 1. 空链 → `RemoteCertificateNotAvailable`；
/// 2. 链中没有任何证书命中信任锚点 → `ChainErrors`；
/// 3. 开启吊销检查且链中存在被吊销证书 → `ChainErrors`；
/// 4. 开启名称检查、目标主机配置了叶子指纹且叶子未命中 → `NameMismatch`。
///
/// ## 风险与权衡（Trade-offs）
/// - 未配置 pin 的主机不做名称检查：指纹固定无法从 DER 中读出主体名称，宁可放宽也不误报；
/// - 错误码取最后一个命中的原因，多原因并存时以 `policy_errors` 为准。
#[derive(Debug)]
pub struct PinnedValidator {
    store: PinnedTrustStore,
    check_certificate_name: bool,
    check_revocation: bool,
}

impl PinnedValidator {
    pub fn new(store: PinnedTrustStore, settings: &ValidationSettings) -> Self {
        Self {
            store,
            check_certificate_name: settings.check_certificate_name(),
            check_revocation: settings.check_revocation(),
        }
    }
}

impl ActiveValidator for PinnedValidator {
    fn validate_chain(&self, target_host: &str, chain: &[Certificate]) -> TrustDecision {
        let Some(leaf) = chain.first() else {
            return TrustDecision::from_policy(
                PolicyErrorFlag::RemoteCertificateNotAvailable.into(),
                codes::NO_CERTIFICATE,
            );
        };

        let fingerprints: Vec<[u8; 32]> = chain.iter().map(Certificate::fingerprint).collect();
        let mut errors = PolicyErrors::NONE;
        let mut code = codes::NONE;

        if !fingerprints
            .iter()
            .any(|print| self.store.anchors.contains(print))
        {
            errors = errors.with(PolicyErrorFlag::ChainErrors);
            code = codes::UNTRUSTED_ROOT;
        }

        if self.check_revocation
            && fingerprints
                .iter()
                .any(|print| self.store.revoked.contains(print))
        {
            errors = errors.with(PolicyErrorFlag::ChainErrors);
            code = codes::REVOKED;
        }

        if self.check_certificate_name
            && let Some(pins) = self.store.host_pins.get(&target_host.to_ascii_lowercase())
            && !pins.contains(&leaf.fingerprint())
        {
            errors = errors.with(PolicyErrorFlag::NameMismatch);
            code = codes::CN_NO_MATCH;
        }

        TrustDecision::from_policy(errors, code)
    }
}

/// [`PinnedValidator`] 的工厂。
///
/// 当 `skip_system_validators == false` 且没有配置任何信任锚点时，视为平台上不存在默认信任策略，
/// 构造以配置错误失败。
#[derive(Clone, Debug, Default)]
pub struct PinnedValidatorFactory {
    store: PinnedTrustStore,
}

impl PinnedValidatorFactory {
    pub fn new(store: PinnedTrustStore) -> Self {
        Self { store }
    }
}

impl ValidatorFactory for PinnedValidatorFactory {
    fn create(
        &self,
        settings: &Arc<ValidationSettings>,
    ) -> Result<Arc<dyn ActiveValidator>, TlsControlError> {
        if self.store.anchors.is_empty() && !settings.skip_system_validators() {
            return Err(TlsControlError::configuration(
                "no default trust policy available: pinned store has no anchors",
            ));
        }
        Ok(Arc::new(PinnedValidator::new(self.store.clone(), settings)))
    }
}
