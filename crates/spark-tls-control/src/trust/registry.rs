use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, warn};

use crate::error::TlsControlError;

use super::{ActiveValidator, ValidationSettings, ValidatorFactory};

/// `ArcSwapOption` 只能承载定长类型，这里包一层以发布 trait 对象。
#[derive(Debug)]
struct Published(Arc<dyn ActiveValidator>);

/// 单个连接上下文内唯一的活跃校验器持有者。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 多个握手线程可能同时首次请求校验器；必须保证最终只有一个实例被发布并被所有调用方共享；
/// - 构造期间不阻塞其他调用方：并发构造是允许的（且预期罕见），竞争通过“先发布者胜出”解决，
///   而非互斥。
///
/// ## 逻辑（How）
/// 1. `load` 命中已发布实例时直接返回；
/// 2. 否则调用工厂在旁路构造候选实例；
/// 3. 以 `compare_and_swap(None → candidate)` 尝试发布：若期间已有其他线程发布，丢弃候选，
///    返回胜出者。
///
/// ## 契约（What）
/// - 工厂失败时返回 [`TlsControlError::Configuration`]，槽位保持为空，下一次调用重新构造；
/// - 被丢弃的候选实例仅随 `Arc` 正常析构，不要求额外清理。
///
/// ## 风险与权衡（Trade-offs）
/// - 极端竞争下工厂可能被调用多次，代价是额外的构造开销；换来的是读路径无锁、构造路径无阻塞。
pub struct ValidatorRegistry {
    settings: Arc<ValidationSettings>,
    factory: Arc<dyn ValidatorFactory>,
    slot: ArcSwapOption<Published>,
}

impl ValidatorRegistry {
    pub fn new(settings: Arc<ValidationSettings>, factory: Arc<dyn ValidatorFactory>) -> Self {
        Self {
            settings,
            factory,
            slot: ArcSwapOption::empty(),
        }
    }

    pub fn settings(&self) -> &Arc<ValidationSettings> {
        &self.settings
    }

    /// 获取（必要时创建）活跃校验器。
    pub fn get_or_create(&self) -> Result<Arc<dyn ActiveValidator>, TlsControlError> {
        let current = self.slot.load();
        if let Some(published) = &*current {
            return Ok(Arc::clone(&published.0));
        }

        let candidate = match self.factory.create(&self.settings) {
            Ok(validator) => Arc::new(Published(validator)),
            Err(err) => {
                warn!(error = %err, code = err.code(), "validator construction failed");
                return Err(err);
            }
        };

        let previous = self
            .slot
            .compare_and_swap(&*current, Some(Arc::clone(&candidate)));
        match &*previous {
            Some(winner) => {
                warn!("concurrent validator published first; discarding local candidate");
                Ok(Arc::clone(&winner.0))
            }
            None => {
                debug!("active validator published");
                Ok(Arc::clone(&candidate.0))
            }
        }
    }

    /// 已发布的校验器（若有），不会触发构造。
    pub fn published(&self) -> Option<Arc<dyn ActiveValidator>> {
        self.slot
            .load_full()
            .map(|published| Arc::clone(&published.0))
    }
}

impl core::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("settings", &self.settings)
            .field("published", &self.slot.load().is_some())
            .finish()
    }
}
