use core::fmt;

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// DER 编码的 X.509 证书。
///
/// 本 crate 不解析证书内容，只以字节与 SHA-256 指纹识别证书；解析与签名校验由外部握手引擎
/// 或具体校验器负责。内部使用 [`Bytes`]，克隆为引用计数操作。
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Certificate {
    der: Bytes,
}

impl Certificate {
    pub fn from_der(der: impl Into<Bytes>) -> Self {
        Self { der: der.into() }
    }

    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// 证书 DER 字节的 SHA-256 指纹。
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(&self.der).into()
    }

    /// 小写十六进制指纹，用于日志与配置文件比对。
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint())
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("len", &self.der.len())
            .field("sha256", &self.fingerprint_hex())
            .finish()
    }
}

#[cfg(feature = "rustls-bridge")]
impl From<&rustls::pki_types::CertificateDer<'_>> for Certificate {
    fn from(der: &rustls::pki_types::CertificateDer<'_>) -> Self {
        Certificate::from_der(Bytes::copy_from_slice(der.as_ref()))
    }
}
