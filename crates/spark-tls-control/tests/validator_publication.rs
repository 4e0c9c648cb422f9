//! 活跃校验器发布的并发测试。
//!
//! # 教案级导览
//!
//! - **Why**：多个握手线程可能同时首次请求校验器，注册表必须保证所有调用方拿到同一实例；
//! - **How**：`Barrier` 让全部线程同时起跑，工厂内部让出时间片以放大“并发构造”窗口；
//! - **What**：工厂可能被调用多次，但发布的实例唯一，且所有线程返回的指针相同。

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use spark_tls_control::{
    ActiveValidator, TlsControlError, ValidationSettings, ValidatorRegistry,
    trust::{
        Certificate, CertificateValidationCoordinator, PinnedTrustStore, PinnedValidatorFactory,
        PolicyErrorFlag, TrustDecision, ValidationRole,
    },
};

const CALLERS: usize = 8;

#[derive(Debug)]
struct Tagged;

impl ActiveValidator for Tagged {
    fn validate_chain(&self, _: &str, _: &[Certificate]) -> TrustDecision {
        TrustDecision::trusted()
    }
}

/// ## 测试一：竞争发布只产生一个实例
///
/// - **意图 (Why)**：验证“先发布者胜出”：失败者丢弃自己的候选并返回胜出者；
/// - **契约 (What)**：`CALLERS` 个线程返回的 `Arc` 全部指向注册表中已发布的实例。
#[test]
fn concurrent_callers_share_one_published_validator() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Barrier::new(CALLERS));

    let factory = {
        let constructed = Arc::clone(&constructed);
        move |_: &Arc<ValidationSettings>| -> Result<Arc<dyn ActiveValidator>, TlsControlError> {
            constructed.fetch_add(1, Ordering::SeqCst);
            thread::yield_now();
            Ok(Arc::new(Tagged))
        }
    };
    let registry = Arc::new(ValidatorRegistry::new(
        ValidationSettings::builder().build(),
        Arc::new(factory),
    ));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.wait();
                registry.get_or_create().expect("工厂总是成功")
            })
        })
        .collect();

    let validators: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("调用线程不应 panic"))
        .collect();

    let published = registry.published().expect("竞争结束后必须已发布");
    for validator in &validators {
        assert!(Arc::ptr_eq(validator, &published));
    }
    assert!(constructed.load(Ordering::SeqCst) >= 1);

    let again = registry.get_or_create().expect("已发布");
    assert!(Arc::ptr_eq(&again, &published));
}

/// ## 测试二：内置工厂经由注册表驱动协调器
///
/// - **意图 (Why)**：覆盖“平台无默认策略 → 配置错误 → 补齐锚点后成功”的完整路径。
#[test]
fn pinned_factory_reports_missing_policy_then_validates() {
    let settings = ValidationSettings::builder().build();
    let empty = ValidatorRegistry::new(
        Arc::clone(&settings),
        Arc::new(PinnedValidatorFactory::default()),
    );
    let err = CertificateValidationCoordinator::from_registry(&empty, ValidationRole::Client)
        .expect_err("没有锚点时不存在默认信任策略");
    assert!(matches!(err, TlsControlError::Configuration { .. }));
    assert!(empty.published().is_none());

    let root = Certificate::from_der(&b"corp-root"[..]);
    let registry = ValidatorRegistry::new(
        settings,
        Arc::new(PinnedValidatorFactory::new(
            PinnedTrustStore::default().with_anchor(&root),
        )),
    );
    let coordinator =
        CertificateValidationCoordinator::from_registry(&registry, ValidationRole::Client)
            .expect("锚点存在");

    let leaf = Certificate::from_der(&b"leaf"[..]);
    let trusted = coordinator
        .validate_chain("svc.internal", &[leaf.clone(), root])
        .expect("无回调");
    assert!(trusted.is_trusted());

    let untrusted = coordinator
        .validate_chain("svc.internal", &[leaf])
        .expect("无回调");
    assert!(!untrusted.is_trusted());
    assert!(
        untrusted
            .policy_errors()
            .contains(PolicyErrorFlag::ChainErrors)
    );
}
