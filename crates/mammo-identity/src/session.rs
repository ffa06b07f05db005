//! 会话上下文

use mammo_core::{MammoError, Result, User, UserRole};

/// 当前登录用户
///
/// 由调用方持有并显式传入各项操作。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionContext {
    user: Option<User>,
}

impl SessionContext {
    /// 未登录的会话
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user: User) -> Self {
        Self { user: Some(user) }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn require_user(&self) -> Result<&User> {
        self.user
            .as_ref()
            .ok_or_else(|| MammoError::Permission("sign-in required".to_string()))
    }

    /// 要求当前用户具有指定角色
    pub fn require_role(&self, role: UserRole) -> Result<&User> {
        let user = self.require_user()?;
        if user.role != role {
            return Err(MammoError::Permission(format!(
                "{} role required, signed in as {}",
                role, user.role
            )));
        }
        Ok(user)
    }

    pub fn require_admin(&self) -> Result<&User> {
        self.require_role(UserRole::Admin)
    }

    pub(crate) fn set(&mut self, user: User) {
        self.user = Some(user);
    }

    pub(crate) fn clear(&mut self) {
        self.user = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mammo_storage::seed::initial_users;

    #[test]
    fn test_role_checks() {
        let users = initial_users(1);
        let doctor = users.iter().find(|u| u.role == UserRole::Doctor).unwrap();

        let anonymous = SessionContext::anonymous();
        assert!(matches!(
            anonymous.require_user(),
            Err(MammoError::Permission(_))
        ));

        let session = SessionContext::signed_in(doctor.clone());
        assert!(session.require_role(UserRole::Doctor).is_ok());
        assert!(matches!(
            session.require_admin(),
            Err(MammoError::Permission(_))
        ));
    }
}
