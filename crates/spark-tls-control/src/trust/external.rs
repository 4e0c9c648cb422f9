//! 进程级默认服务端证书回调。
//!
//! 当 [`ValidationSettings::use_external_default_policy`](super::ValidationSettings::use_external_default_policy)
//! 为 `true` 且设置本身未携带回调时，协调器会读取这里安装的回调。读路径无锁（`ArcSwapOption`），
//! 安装/卸载对之后开始的校验立即可见，进行中的校验继续使用已取到的快照。

use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;

use super::ServerCertificateCallback;

struct Installed(ServerCertificateCallback);

fn slot() -> &'static ArcSwapOption<Installed> {
    static SLOT: OnceLock<ArcSwapOption<Installed>> = OnceLock::new();
    SLOT.get_or_init(|| ArcSwapOption::empty())
}

/// 安装进程级默认回调，替换之前的回调。
pub fn install_default_server_callback(callback: ServerCertificateCallback) {
    slot().store(Some(Arc::new(Installed(callback))));
}

/// 卸载进程级默认回调。
pub fn clear_default_server_callback() {
    slot().store(None);
}

pub(crate) fn default_server_callback() -> Option<ServerCertificateCallback> {
    slot()
        .load_full()
        .map(|installed| Arc::clone(&installed.0))
}
