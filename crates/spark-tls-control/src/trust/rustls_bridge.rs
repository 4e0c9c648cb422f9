//! rustls 握手钩子。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 握手引擎（rustls）在认证阶段通过 `ServerCertVerifier`/`ClientCertVerifier` 询问“这条链能否信任”；
//!   本模块把这两个回调接到 [`CertificateValidationCoordinator`]，使用户回调、角色修正等策略
//!   对引擎透明。
//!
//! ## 逻辑（How）
//! - 将 `end_entity + intermediates` 拼成叶子在前的链交给协调器；
//! - `trusted == false` 映射为 `rustls::Error::InvalidCertificate`，按策略错误挑选最贴切的
//!   `CertificateError`；回调失败映射为 `rustls::Error::General`，握手随之终止；
//! - 握手签名校验与协商方案直接委托给调用方提供的 [`CryptoProvider`]。
//!
//! ## 风险与权衡（Trade-offs）
//! - 协调器只看证书字节，不替代签名校验；若校验器本身也不做链签名验证（例如指纹固定），
//!   信任完全取决于指纹材料的可靠性。

use std::sync::Arc;

use rustls::{
    CertificateError, DigitallySignedStruct, DistinguishedName, Error as RustlsError,
    SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature},
    pki_types::{CertificateDer, ServerName, UnixTime},
    server::danger::{ClientCertVerified, ClientCertVerifier},
};

use super::{
    Certificate, CertificateValidationCoordinator, PolicyErrorFlag, TrustDecision, ValidationRole,
};

fn collect_chain(
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
) -> Vec<Certificate> {
    core::iter::once(end_entity)
        .chain(intermediates)
        .map(Certificate::from)
        .collect()
}

fn decide(
    coordinator: &CertificateValidationCoordinator,
    target_host: &str,
    chain: &[Certificate],
) -> Result<(), RustlsError> {
    let decision = coordinator
        .validate_chain(target_host, chain)
        .map_err(|err| RustlsError::General(err.to_string()))?;
    if decision.is_trusted() {
        Ok(())
    } else {
        Err(RustlsError::InvalidCertificate(certificate_error(&decision)))
    }
}

fn certificate_error(decision: &TrustDecision) -> CertificateError {
    let errors = decision.policy_errors();
    if decision.user_denied() {
        CertificateError::ApplicationVerificationFailure
    } else if errors.contains(PolicyErrorFlag::NameMismatch) {
        CertificateError::NotValidForName
    } else if errors.contains(PolicyErrorFlag::ChainErrors) {
        CertificateError::UnknownIssuer
    } else {
        CertificateError::ApplicationVerificationFailure
    }
}

/// 客户端角色：校验服务端证书链。
#[derive(Debug)]
pub struct CoordinatedServerVerifier {
    coordinator: Arc<CertificateValidationCoordinator>,
    provider: Arc<CryptoProvider>,
}

impl CoordinatedServerVerifier {
    pub fn new(
        coordinator: Arc<CertificateValidationCoordinator>,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self {
            coordinator,
            provider,
        }
    }
}

impl ServerCertVerifier for CoordinatedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        let chain = collect_chain(end_entity, intermediates);
        decide(&self.coordinator, &server_name.to_str(), &chain)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// 服务端角色：校验客户端证书链。
///
/// 是否强制客户端出示证书取自协调器的 [`ValidationRole`](super::ValidationRole)。
#[derive(Debug)]
pub struct CoordinatedClientVerifier {
    coordinator: Arc<CertificateValidationCoordinator>,
    provider: Arc<CryptoProvider>,
    root_hints: Vec<DistinguishedName>,
}

impl CoordinatedClientVerifier {
    pub fn new(
        coordinator: Arc<CertificateValidationCoordinator>,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self {
            coordinator,
            provider,
            root_hints: Vec::new(),
        }
    }

    /// 在 CertificateRequest 中向客户端提示可接受的颁发者。
    pub fn with_root_hints(mut self, hints: Vec<DistinguishedName>) -> Self {
        self.root_hints = hints;
        self
    }
}

impl ClientCertVerifier for CoordinatedClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    /// 只有响应方角色描述客户端证书是否必需；以发起方角色构造的协调器不强制客户端认证。
    fn client_auth_mandatory(&self) -> bool {
        match self.coordinator.role() {
            ValidationRole::Server {
                client_certificate_required,
            } => client_certificate_required,
            ValidationRole::Client => false,
        }
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &self.root_hints
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, RustlsError> {
        let chain = collect_chain(end_entity, intermediates);
        decide(&self.coordinator, "", &chain)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
