use core::{fmt, ops};

/// 证书链校验失败的单个原因。
///
/// 取值集合是调用方可见的封闭枚举；位值与 [`PolicyErrors::bits`] 一一对应，
/// 持久化或跨语言传递时可直接使用位表示。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyErrorFlag {
    /// 对端未出示证书。
    RemoteCertificateNotAvailable,
    /// 证书主体与目标主机名不匹配。
    NameMismatch,
    /// 证书链无法构造到受信任锚点，或链中存在吊销/过期证书。
    ChainErrors,
    /// 校验器缺少判定所需的信任材料，无法给出结论。
    NotAvailable,
}

impl PolicyErrorFlag {
    /// 全部取值，按位值升序排列。
    pub const ALL: [PolicyErrorFlag; 4] = [
        PolicyErrorFlag::RemoteCertificateNotAvailable,
        PolicyErrorFlag::NameMismatch,
        PolicyErrorFlag::ChainErrors,
        PolicyErrorFlag::NotAvailable,
    ];

    /// 对应的位值。
    pub const fn bit(self) -> u8 {
        match self {
            PolicyErrorFlag::RemoteCertificateNotAvailable => 0b0001,
            PolicyErrorFlag::NameMismatch => 0b0010,
            PolicyErrorFlag::ChainErrors => 0b0100,
            PolicyErrorFlag::NotAvailable => 0b1000,
        }
    }
}

/// 策略错误集合，基于位集实现的不可变值类型。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 信任判定需要同时携带多个失败原因（例如“名称不匹配 + 链错误”），位集比 `Vec` 更适合作为
///   跨线程传递的 `Copy` 值；
/// - 集合为空即代表基线策略通过，这是 [`TrustDecision`] 不变量的唯一依据。
///
/// ## 契约（What）
/// - `with`/`without` 返回新集合，不修改自身；
/// - `from_bits_truncate` 丢弃未定义的位，保证集合始终落在封闭枚举内。
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PolicyErrors(u8);

impl PolicyErrors {
    /// 空集合。
    pub const NONE: PolicyErrors = PolicyErrors(0);

    const MASK: u8 = 0b1111;

    /// 由单个原因构造集合。
    pub const fn only(flag: PolicyErrorFlag) -> Self {
        PolicyErrors(flag.bit())
    }

    /// 从位表示恢复集合，未定义的位会被丢弃。
    pub const fn from_bits_truncate(bits: u8) -> Self {
        PolicyErrors(bits & Self::MASK)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, flag: PolicyErrorFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    #[must_use]
    pub const fn with(self, flag: PolicyErrorFlag) -> Self {
        PolicyErrors(self.0 | flag.bit())
    }

    #[must_use]
    pub const fn without(self, flag: PolicyErrorFlag) -> Self {
        PolicyErrors(self.0 & !flag.bit())
    }

    /// 按位值升序遍历集合中的原因。
    pub fn iter(self) -> impl Iterator<Item = PolicyErrorFlag> {
        PolicyErrorFlag::ALL
            .into_iter()
            .filter(move |flag| self.contains(*flag))
    }
}

impl From<PolicyErrorFlag> for PolicyErrors {
    fn from(flag: PolicyErrorFlag) -> Self {
        PolicyErrors::only(flag)
    }
}

impl FromIterator<PolicyErrorFlag> for PolicyErrors {
    fn from_iter<I: IntoIterator<Item = PolicyErrorFlag>>(iter: I) -> Self {
        iter.into_iter().fold(PolicyErrors::NONE, PolicyErrors::with)
    }
}

impl ops::BitOr for PolicyErrors {
    type Output = PolicyErrors;

    fn bitor(self, rhs: Self) -> Self::Output {
        PolicyErrors(self.0 | rhs.0)
    }
}

impl ops::BitOr<PolicyErrorFlag> for PolicyErrors {
    type Output = PolicyErrors;

    fn bitor(self, rhs: PolicyErrorFlag) -> Self::Output {
        self.with(rhs)
    }
}

impl fmt::Debug for PolicyErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// 校验器可附带的底层错误码。
///
/// 数值沿用 X.509 链校验的通用状态码，便于与系统证书库的诊断信息对照。
pub mod codes {
    pub const NONE: u32 = 0;
    pub const UNTRUSTED_ROOT: u32 = 0x800B_0109;
    pub const CHAINING: u32 = 0x800B_010A;
    pub const CN_NO_MATCH: u32 = 0x800B_010F;
    pub const REVOKED: u32 = 0x8009_2010;
    pub const NO_CERTIFICATE: u32 = 0x8009_030E;
}

/// 一次证书链校验的最终结论。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“谁做出了决定、为什么”与布尔结论一起返回：握手引擎只看 `trusted`，审计与日志则需要
///   `user_denied` 与 `policy_errors` 区分“策略拒绝”与“用户拒绝”。
///
/// ## 契约（What）
/// - 字段构造后不可变；
/// - [`TrustDecision::from_policy`] 保证 `trusted == policy_errors.is_empty()`；
/// - [`TrustDecision::from_user_verdict`] 记录用户回调的覆盖：当回调返回 `false` 而基线
///   策略本会放行时，`user_denied == true`。
///
/// ## 风险与权衡（Trade-offs）
/// - 不提供任意组合字段的公开构造器，避免调用方构造出违反不变量的值。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrustDecision {
    trusted: bool,
    user_denied: bool,
    error_code: u32,
    policy_errors: PolicyErrors,
}

impl TrustDecision {
    /// 依据策略错误集合给出判定，`trusted` 等价于集合为空。
    pub const fn from_policy(policy_errors: PolicyErrors, error_code: u32) -> Self {
        Self {
            trusted: policy_errors.is_empty(),
            user_denied: false,
            error_code,
            policy_errors,
        }
    }

    /// 无任何策略错误的放行判定。
    pub const fn trusted() -> Self {
        Self::from_policy(PolicyErrors::NONE, codes::NONE)
    }

    /// 以用户回调的结论覆盖基线判定。
    ///
    /// `policy_errors` 原样保留以便诊断；仅当回调拒绝且基线集合为空时标记 `user_denied`。
    pub const fn from_user_verdict(
        verdict: bool,
        policy_errors: PolicyErrors,
        error_code: u32,
    ) -> Self {
        Self {
            trusted: verdict,
            user_denied: !verdict && policy_errors.is_empty(),
            error_code,
            policy_errors,
        }
    }

    pub const fn is_trusted(&self) -> bool {
        self.trusted
    }

    pub const fn user_denied(&self) -> bool {
        self.user_denied
    }

    pub const fn error_code(&self) -> u32 {
        self.error_code
    }

    pub const fn policy_errors(&self) -> PolicyErrors {
        self.policy_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn set_algebra_is_closed_over_flags() {
        let errors =
            PolicyErrors::only(PolicyErrorFlag::NameMismatch) | PolicyErrorFlag::ChainErrors;
        assert!(errors.contains(PolicyErrorFlag::NameMismatch));
        assert!(errors.contains(PolicyErrorFlag::ChainErrors));
        assert!(!errors.contains(PolicyErrorFlag::RemoteCertificateNotAvailable));
        assert_eq!(
            errors.iter().collect::<Vec<_>>(),
            vec![PolicyErrorFlag::NameMismatch, PolicyErrorFlag::ChainErrors]
        );
        assert!(
            errors
                .without(PolicyErrorFlag::NameMismatch)
                .without(PolicyErrorFlag::ChainErrors)
                .is_empty()
        );
        assert_eq!(PolicyErrors::from_bits_truncate(0xff).bits(), 0b1111);
    }

    #[test]
    fn user_rejection_over_clean_baseline_is_recorded() {
        let decision = TrustDecision::from_user_verdict(false, PolicyErrors::NONE, codes::NONE);
        assert!(!decision.is_trusted());
        assert!(decision.user_denied());

        let decision = TrustDecision::from_user_verdict(
            false,
            PolicyErrorFlag::ChainErrors.into(),
            codes::UNTRUSTED_ROOT,
        );
        assert!(!decision.is_trusted());
        assert!(!decision.user_denied(), "基线已拒绝时不应归咎于用户");
    }

    proptest! {
        #[test]
        fn policy_decision_trusted_iff_errors_empty(bits in any::<u8>(), code in any::<u32>()) {
            let errors = PolicyErrors::from_bits_truncate(bits);
            let decision = TrustDecision::from_policy(errors, code);
            prop_assert_eq!(decision.is_trusted(), errors.is_empty());
            prop_assert_eq!(decision.policy_errors(), errors);
            prop_assert_eq!(decision.error_code(), code);
            prop_assert!(!decision.user_denied());
        }

        #[test]
        fn collecting_flags_matches_bit_union(mask in 0u8..16) {
            let flags: Vec<_> = PolicyErrorFlag::ALL
                .into_iter()
                .filter(|flag| mask & flag.bit() != 0)
                .collect();
            let collected: PolicyErrors = flags.iter().copied().collect();
            prop_assert_eq!(collected.bits(), mask);
            prop_assert_eq!(collected.iter().collect::<Vec<_>>(), flags);
        }
    }
}
