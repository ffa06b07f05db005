//! 身份服务
//!
//! 持有内存中的用户集合，每次变更后立即写回存储。

use crate::account_state::{AccountEvent, AccountStateMachine};
use crate::codes::{CodeKind, CodeOutcome, CodePolicy};
use crate::session::SessionContext;
use mammo_core::password::{hash_password, verify_password, DEFAULT_ITERATIONS};
use mammo_core::utils::{generate_user_id, normalize_email};
use mammo_core::{
    Clock, MammoError, NewUser, Result, SystemClock, User, UserRole, UserStatus, UserUpdate,
};
use mammo_integration::{CodeMessage, CodePurpose, NotificationSender};
use mammo_storage::RecordStore;
use regex::Regex;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 自助注册未填写专业方向时的默认值
pub const DEFAULT_SPECIALIZATION: &str = "Oncology";

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// 身份服务
pub struct IdentityService {
    store: Arc<RecordStore>,
    users: Vec<User>,
    notifier: Arc<dyn NotificationSender>,
    policy: CodePolicy,
    clock: Arc<dyn Clock>,
    hash_iterations: u32,
    state_machine: AccountStateMachine,
    email_pattern: Regex,
}

impl IdentityService {
    /// 从存储加载用户集合
    pub fn new(store: Arc<RecordStore>, notifier: Arc<dyn NotificationSender>) -> Result<Self> {
        let users = store.load_users()?;
        let email_pattern = Regex::new(EMAIL_PATTERN)
            .map_err(|e| MammoError::Config(format!("email pattern: {}", e)))?;

        info!("Identity service loaded {} users", users.len());
        Ok(Self {
            store,
            users,
            notifier,
            policy: CodePolicy::default(),
            clock: Arc::new(SystemClock),
            hash_iterations: DEFAULT_ITERATIONS,
            state_machine: AccountStateMachine::new(),
            email_pattern,
        })
    }

    pub fn with_policy(mut self, policy: CodePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_hash_iterations(mut self, iterations: u32) -> Self {
        self.hash_iterations = iterations.max(1);
        self
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// 按邮箱查找，大小写不敏感
    pub fn find_by_email(&self, email: &str) -> Option<&User> {
        let email = normalize_email(email);
        self.users.iter().find(|u| u.email == email)
    }

    /// 自助注册
    ///
    /// 验证码邮件发送成功后才写入新账户，返回待验证的邮箱。
    pub async fn register(
        &mut self,
        name: &str,
        email: &str,
        password: &str,
        role: UserRole,
        specialization: &str,
    ) -> Result<String> {
        let email = self.validate_account_fields(name, email, password)?;
        if self.find_by_email(&email).is_some() {
            warn!("Registration rejected, email already in use: {}", email);
            return Err(MammoError::DuplicateEmail(email));
        }

        let now = self.clock.now();
        let code = self.policy.issue(now);
        let specialization = match specialization.trim() {
            "" => DEFAULT_SPECIALIZATION.to_string(),
            s => s.to_string(),
        };

        let user = User {
            id: generate_user_id(),
            name: name.trim().to_string(),
            email: email.clone(),
            credential: hash_password(password, self.hash_iterations),
            role,
            specialization,
            status: UserStatus::Unverified,
            joined_at: now.date_naive(),
            verification_code: Some(code.clone()),
            reset_code: None,
        };

        let message = CodeMessage::new(CodePurpose::Verification, &email, &user.name, &code.code);
        if !self.notifier.send_code(&message).await {
            warn!("Verification code dispatch failed for {}", email);
            return Err(MammoError::NotificationFailure(format!(
                "could not deliver verification code to {}",
                email
            )));
        }

        self.commit_new_user(user)?;
        info!("Registered {} as {}, awaiting verification", email, role);
        Ok(email)
    }

    /// 登录并写入当前会话
    pub fn login(
        &mut self,
        session: &mut SessionContext,
        email: &str,
        password: &str,
    ) -> Result<User> {
        let email = normalize_email(email);
        let user = self
            .users
            .iter()
            .find(|u| u.email == email && verify_password(password, &u.credential))
            .cloned()
            .ok_or_else(|| {
                warn!("Failed login attempt for {}", email);
                MammoError::InvalidCredentials
            })?;

        match user.status {
            UserStatus::Unverified => {
                return Err(MammoError::VerificationRequired { email: user.email })
            }
            UserStatus::Pending | UserStatus::Blocked => {
                warn!("Login refused for {} account {}", user.status, email);
                return Err(MammoError::AccessRestricted(format!(
                    "account is {}",
                    user.status
                )));
            }
            UserStatus::Active => {}
        }

        self.store.save_session(Some(&user))?;
        session.set(user.clone());
        info!("{} signed in as {}", user.email, user.role);
        Ok(user)
    }

    pub fn logout(&self, session: &mut SessionContext) -> Result<()> {
        self.store.save_session(None)?;
        if let Some(user) = session.user() {
            info!("{} signed out", user.email);
        }
        session.clear();
        Ok(())
    }

    /// 从持久化的会话恢复
    ///
    /// 会话中的用户以用户集合中的最新记录为准，已不再是 Active 的账户得到空会话。
    pub fn restore_session(&self) -> Result<SessionContext> {
        let Some(saved) = self.store.load_session()? else {
            return Ok(SessionContext::anonymous());
        };

        match self.users.iter().find(|u| u.id == saved.id) {
            Some(user) if user.is_active() => Ok(SessionContext::signed_in(user.clone())),
            _ => {
                self.store.save_session(None)?;
                Ok(SessionContext::anonymous())
            }
        }
    }

    /// 校验注册验证码
    pub fn verify(&mut self, email: &str, code: &str) -> Result<User> {
        let now = self.clock.now();
        let index = self.index_by_email(email).ok_or(MammoError::InvalidCode)?;

        let mut user = self.users[index].clone();
        match self.policy.check(&mut user.verification_code, code, now) {
            CodeOutcome::Accepted => {
                user.status = self
                    .state_machine
                    .transition(user.status, AccountEvent::CodeVerified)?;
                let verified = self.commit_user(index, user)?;
                info!("{} verified", verified.email);
                Ok(verified)
            }
            CodeOutcome::Mismatch => {
                self.commit_user(index, user)?;
                warn!("Verification code mismatch for {}", normalize_email(email));
                Err(MammoError::InvalidCode)
            }
            CodeOutcome::Expired | CodeOutcome::Missing => Err(MammoError::InvalidCode),
        }
    }

    /// 申请重置密码
    ///
    /// 重置码先写入再发送，发送失败时仍可通过重发补救。
    pub async fn request_password_reset(&mut self, email: &str) -> Result<()> {
        let index = self
            .index_by_email(email)
            .ok_or_else(|| MammoError::UnknownAccount(normalize_email(email)))?;

        let code = self.policy.issue(self.clock.now());
        let mut user = self.users[index].clone();
        user.reset_code = Some(code.clone());
        let user = self.commit_user(index, user)?;

        let message =
            CodeMessage::new(CodePurpose::PasswordReset, &user.email, &user.name, &code.code);
        if !self.notifier.send_code(&message).await {
            warn!("Reset code dispatch failed for {}", user.email);
            return Err(MammoError::NotificationFailure(format!(
                "could not deliver reset code to {}",
                user.email
            )));
        }
        info!("Password reset requested for {}", user.email);
        Ok(())
    }

    /// 凭重置码设置新密码，失败时密码保持不变
    pub fn reset_password(&mut self, email: &str, code: &str, new_password: &str) -> Result<()> {
        if new_password.is_empty() {
            return Err(MammoError::Validation("password must not be empty".to_string()));
        }
        let now = self.clock.now();
        let index = self.index_by_email(email).ok_or(MammoError::InvalidCode)?;

        let mut user = self.users[index].clone();
        match self.policy.check(&mut user.reset_code, code, now) {
            CodeOutcome::Accepted => {
                user.credential = hash_password(new_password, self.hash_iterations);
                let user = self.commit_user(index, user)?;
                info!("Password reset completed for {}", user.email);
                Ok(())
            }
            CodeOutcome::Mismatch => {
                self.commit_user(index, user)?;
                warn!("Reset code mismatch for {}", normalize_email(email));
                Err(MammoError::InvalidCode)
            }
            CodeOutcome::Expired | CodeOutcome::Missing => Err(MammoError::InvalidCode),
        }
    }

    /// 重发当前待校验的验证码
    ///
    /// 已过期或失败次数用尽的验证码会先换新。
    pub async fn resend_code(&mut self, email: &str, kind: CodeKind) -> Result<()> {
        let index = self
            .index_by_email(email)
            .ok_or_else(|| MammoError::UnknownAccount(normalize_email(email)))?;

        let now = self.clock.now();
        let mut user = self.users[index].clone();
        let slot = match kind {
            CodeKind::Verification => &mut user.verification_code,
            CodeKind::PasswordReset => &mut user.reset_code,
        };

        let mut refreshed = false;
        let code = match slot {
            None => return Err(MammoError::NoPendingCode(user.email.clone())),
            Some(existing) => {
                if !self.policy.is_usable(existing, now) {
                    *existing = self.policy.issue(now);
                    refreshed = true;
                }
                existing.code.clone()
            }
        };
        if refreshed {
            user = self.commit_user(index, user)?;
        }

        let message = CodeMessage::new(CodePurpose::Resend, &user.email, &user.name, &code);
        if !self.notifier.send_code(&message).await {
            return Err(MammoError::NotificationFailure(format!(
                "could not resend code to {}",
                user.email
            )));
        }
        info!("Resent {:?} code to {}", kind, user.email);
        Ok(())
    }

    /// 管理员部分更新账户
    pub fn update_user(
        &mut self,
        session: &mut SessionContext,
        user_id: &str,
        update: UserUpdate,
    ) -> Result<User> {
        let admin = session.require_admin()?.email.clone();
        let index = self
            .users
            .iter()
            .position(|u| u.id == user_id)
            .ok_or_else(|| MammoError::NotFound(format!("user {}", user_id)))?;

        let mut user = self.users[index].clone();
        if let Some(name) = update.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(MammoError::Validation("name must not be empty".to_string()));
            }
            user.name = name.to_string();
        }
        if let Some(specialization) = update.specialization {
            user.specialization = specialization.trim().to_string();
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        let mut status_change = None;
        if let Some(target) = update.status {
            if target != user.status {
                let event = AccountEvent::for_target(target).ok_or_else(|| {
                    MammoError::InvalidStateTransition {
                        from: user.status.to_string(),
                        event: format!("set {}", target),
                    }
                })?;
                let previous = user.status;
                user.status = self.state_machine.transition(previous, event)?;
                if previous == UserStatus::Unverified {
                    user.verification_code = None;
                }
                status_change = Some((previous, user.status));
            }
        }

        let user = self.commit_user(index, user)?;
        if let Some((from, to)) = status_change {
            info!("{} changed {} from {} to {}", admin, user.email, from, to);
        }

        if session.user().map(|u| u.id.as_str()) == Some(user.id.as_str()) {
            self.store.save_session(Some(&user))?;
            session.set(user.clone());
        }
        Ok(user)
    }

    /// 管理员直接创建 Active 账户，不走邮箱验证
    pub fn add_user(&mut self, session: &SessionContext, new_user: NewUser) -> Result<User> {
        let admin = session.require_admin()?.email.clone();
        let email =
            self.validate_account_fields(&new_user.name, &new_user.email, &new_user.password)?;
        if self.find_by_email(&email).is_some() {
            return Err(MammoError::DuplicateEmail(email));
        }

        let user = User {
            id: generate_user_id(),
            name: new_user.name.trim().to_string(),
            email,
            credential: hash_password(&new_user.password, self.hash_iterations),
            role: new_user.role,
            specialization: new_user.specialization.trim().to_string(),
            status: UserStatus::Active,
            joined_at: self.clock.now().date_naive(),
            verification_code: None,
            reset_code: None,
        };

        let user = self.commit_new_user(user)?;
        info!("{} provisioned {} as {}", admin, user.email, user.role);
        Ok(user)
    }

    fn validate_account_fields(&self, name: &str, email: &str, password: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(MammoError::Validation("name must not be empty".to_string()));
        }
        let email = normalize_email(email);
        if !self.email_pattern.is_match(&email) {
            return Err(MammoError::Validation(format!("invalid email address: {}", email)));
        }
        if password.is_empty() {
            return Err(MammoError::Validation("password must not be empty".to_string()));
        }
        Ok(email)
    }

    fn index_by_email(&self, email: &str) -> Option<usize> {
        let email = normalize_email(email);
        self.users.iter().position(|u| u.email == email)
    }

    /// 替换一条记录并写回，写入失败时恢复原记录
    fn commit_user(&mut self, index: usize, user: User) -> Result<User> {
        let previous = std::mem::replace(&mut self.users[index], user);
        if let Err(e) = self.store.save_users(&self.users) {
            self.users[index] = previous;
            error!("Failed to persist user update: {}", e);
            return Err(e);
        }
        Ok(self.users[index].clone())
    }

    /// 追加新账户并写回，写入失败时撤销
    fn commit_new_user(&mut self, user: User) -> Result<User> {
        self.users.push(user.clone());
        if let Err(e) = self.store.save_users(&self.users) {
            self.users.pop();
            error!("Failed to persist new user {}: {}", user.email, e);
            return Err(e);
        }
        Ok(user)
    }
}
