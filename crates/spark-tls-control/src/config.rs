//! 以 TOML 描述的信任配置。
//!
//! ```toml
//! [validation]
//! check_revocation = true
//! callback_needs_full_chain = false
//!
//! [pinned]
//! anchors = ["ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"]
//! revoked = []
//!
//! [pinned.host_pins]
//! "svc.internal" = ["ba:78:16:bf:..."]
//! ```
//!
//! 指纹为证书 DER 的 SHA-256，十六进制书写，允许 `:` 分隔与大小写混用。

use std::{collections::BTreeMap, sync::Arc};

use serde::Deserialize;

use crate::{
    error::TlsControlError,
    trust::{PinnedTrustStore, ValidationSettings, ValidationSettingsBuilder},
};

/// [`ValidationSettings`] 中可由配置文件表达的开关，缺省字段沿用内置默认值。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationProfile {
    pub check_certificate_name: Option<bool>,
    pub check_revocation: Option<bool>,
    pub use_external_default_policy: Option<bool>,
    pub skip_system_validators: Option<bool>,
    pub callback_needs_full_chain: Option<bool>,
}

impl ValidationProfile {
    pub fn from_toml_str(text: &str) -> Result<Self, TlsControlError> {
        toml::from_str(text).map_err(|err| {
            TlsControlError::configuration(format!("invalid validation profile: {err}"))
        })
    }

    /// 把已配置的开关写入构造器；回调与用户数据仍由代码提供。
    pub fn apply(&self, mut builder: ValidationSettingsBuilder) -> ValidationSettingsBuilder {
        if let Some(enabled) = self.check_certificate_name {
            builder = builder.check_certificate_name(enabled);
        }
        if let Some(enabled) = self.check_revocation {
            builder = builder.check_revocation(enabled);
        }
        if let Some(enabled) = self.use_external_default_policy {
            builder = builder.use_external_default_policy(enabled);
        }
        if let Some(enabled) = self.skip_system_validators {
            builder = builder.skip_system_validators(enabled);
        }
        if let Some(enabled) = self.callback_needs_full_chain {
            builder = builder.callback_needs_full_chain(enabled);
        }
        builder
    }

    pub fn to_settings(&self) -> Arc<ValidationSettings> {
        self.apply(ValidationSettings::builder()).build()
    }
}

/// 内置指纹校验器的信任材料。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PinnedTrustConfig {
    pub anchors: Vec<String>,
    pub host_pins: BTreeMap<String, Vec<String>>,
    pub revoked: Vec<String>,
}

impl PinnedTrustConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, TlsControlError> {
        toml::from_str(text).map_err(|err| {
            TlsControlError::configuration(format!("invalid pinned trust config: {err}"))
        })
    }

    /// 解码全部指纹；任一指纹格式错误即整体失败。
    pub fn to_store(&self) -> Result<PinnedTrustStore, TlsControlError> {
        let mut store = PinnedTrustStore::default();
        for anchor in &self.anchors {
            store.anchors.insert(parse_fingerprint(anchor)?);
        }
        for (host, pins) in &self.host_pins {
            let entry = store.host_pins.entry(host.to_ascii_lowercase()).or_default();
            for pin in pins {
                entry.insert(parse_fingerprint(pin)?);
            }
        }
        for revoked in &self.revoked {
            store.revoked.insert(parse_fingerprint(revoked)?);
        }
        Ok(store)
    }
}

/// 完整的信任配置文件：`[validation]` 与 `[pinned]` 两节均可省略。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TrustConfig {
    pub validation: ValidationProfile,
    pub pinned: PinnedTrustConfig,
}

impl TrustConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, TlsControlError> {
        toml::from_str(text)
            .map_err(|err| TlsControlError::configuration(format!("invalid trust config: {err}")))
    }
}

fn parse_fingerprint(text: &str) -> Result<[u8; 32], TlsControlError> {
    let digits: String = text.chars().filter(|c| *c != ':').collect();
    let bytes = hex::decode(digits.trim()).map_err(|err| {
        TlsControlError::configuration(format!("invalid fingerprint `{text}`: {err}"))
    })?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        TlsControlError::configuration(format!(
            "invalid fingerprint `{text}`: expected 32 bytes, got {}",
            bytes.len()
        ))
    })
}
