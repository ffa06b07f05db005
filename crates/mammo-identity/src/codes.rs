//! 一次性验证码策略

use chrono::{DateTime, Duration, Utc};
use mammo_core::utils::generate_numeric_code;
use mammo_core::OneTimeCode;
use serde::{Deserialize, Serialize};

/// 验证码种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeKind {
    Verification,
    PasswordReset,
}

/// 比对结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeOutcome {
    /// 匹配，验证码已被取走
    Accepted,
    /// 不匹配，失败次数已累加
    Mismatch,
    /// 超过有效期或失败次数用尽
    Expired,
    /// 没有待校验的验证码
    Missing,
}

/// 有效期与失败次数上限
#[derive(Debug, Clone, Copy)]
pub struct CodePolicy {
    pub ttl: Duration,
    pub max_attempts: u32,
}

impl Default for CodePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(15),
            max_attempts: 5,
        }
    }
}

impl CodePolicy {
    pub fn new(ttl: Duration, max_attempts: u32) -> Self {
        Self { ttl, max_attempts }
    }

    /// 签发新验证码
    pub fn issue(&self, now: DateTime<Utc>) -> OneTimeCode {
        OneTimeCode::new(generate_numeric_code(), now)
    }

    pub fn is_usable(&self, code: &OneTimeCode, now: DateTime<Utc>) -> bool {
        now - code.issued_at <= self.ttl && code.attempts < self.max_attempts
    }

    /// 比对候选验证码
    ///
    /// 匹配时从 `slot` 中取走验证码；不匹配时累加失败次数。
    /// 过期的验证码保留原样，便于重发时判断是否需要换新。
    pub fn check(
        &self,
        slot: &mut Option<OneTimeCode>,
        candidate: &str,
        now: DateTime<Utc>,
    ) -> CodeOutcome {
        let Some(stored) = slot.as_mut() else {
            return CodeOutcome::Missing;
        };
        if !self.is_usable(stored, now) {
            return CodeOutcome::Expired;
        }
        if stored.code != candidate.trim() {
            stored.attempts += 1;
            return CodeOutcome::Mismatch;
        }
        *slot = None;
        CodeOutcome::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued(policy: &CodePolicy, now: DateTime<Utc>) -> Option<OneTimeCode> {
        Some(policy.issue(now))
    }

    #[test]
    fn test_issue_six_digits() {
        let code = CodePolicy::default().issue(Utc::now());
        assert_eq!(code.code.len(), 6);
        assert!(code.code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(code.attempts, 0);
    }

    #[test]
    fn test_accept_clears_slot() {
        let policy = CodePolicy::default();
        let now = Utc::now();
        let mut slot = issued(&policy, now);
        let code = slot.as_ref().unwrap().code.clone();

        assert_eq!(policy.check(&mut slot, &format!(" {} ", code), now), CodeOutcome::Accepted);
        assert!(slot.is_none());
        assert_eq!(policy.check(&mut slot, &code, now), CodeOutcome::Missing);
    }

    #[test]
    fn test_expiry() {
        let policy = CodePolicy::default();
        let now = Utc::now();
        let mut slot = issued(&policy, now);
        let code = slot.as_ref().unwrap().code.clone();

        let later = now + Duration::minutes(16);
        assert_eq!(policy.check(&mut slot, &code, later), CodeOutcome::Expired);
        assert!(slot.is_some());
    }

    #[test]
    fn test_attempt_limit() {
        let policy = CodePolicy::new(Duration::minutes(15), 3);
        let now = Utc::now();
        let mut slot = issued(&policy, now);
        let code = slot.as_ref().unwrap().code.clone();

        for _ in 0..3 {
            assert_eq!(policy.check(&mut slot, "000000", now), CodeOutcome::Mismatch);
        }
        assert_eq!(slot.as_ref().unwrap().attempts, 3);
        assert_eq!(policy.check(&mut slot, &code, now), CodeOutcome::Expired);
    }
}
