//! 账户状态机
//!
//! 自助注册的账户从 Unverified 开始，验证码校验通过后进入 Active；
//! 之后管理员可以在 Active、Pending、Blocked 之间任意调整。
//! 任何事件都不会把账户带回 Unverified。

use mammo_core::{MammoError, Result, UserStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 账户状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AccountEvent {
    CodeVerified,
    Activate,
    Suspend,
    Block,
}

impl AccountEvent {
    /// 管理员把账户设置为目标状态时对应的事件
    pub fn for_target(target: UserStatus) -> Option<Self> {
        match target {
            UserStatus::Active => Some(AccountEvent::Activate),
            UserStatus::Pending => Some(AccountEvent::Suspend),
            UserStatus::Blocked => Some(AccountEvent::Block),
            UserStatus::Unverified => None,
        }
    }
}

/// 账户状态机
#[derive(Debug)]
pub struct AccountStateMachine {
    transitions: HashMap<(UserStatus, AccountEvent), UserStatus>,
}

impl AccountStateMachine {
    pub fn new() -> Self {
        use AccountEvent::*;
        use UserStatus::*;

        let mut transitions = HashMap::new();

        transitions.insert((Unverified, CodeVerified), Active);

        transitions.insert((Pending, Activate), Active);
        transitions.insert((Blocked, Activate), Active);
        transitions.insert((Unverified, Activate), Active);

        transitions.insert((Active, Suspend), Pending);
        transitions.insert((Blocked, Suspend), Pending);
        transitions.insert((Unverified, Suspend), Pending);

        transitions.insert((Active, Block), Blocked);
        transitions.insert((Pending, Block), Blocked);
        transitions.insert((Unverified, Block), Blocked);

        Self { transitions }
    }

    pub fn can_transition(&self, from: UserStatus, event: AccountEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: UserStatus, event: AccountEvent) -> Result<UserStatus> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| MammoError::InvalidStateTransition {
                from: from.to_string(),
                event: format!("{:?}", event),
            })
    }

    /// 当前状态下可触发的事件
    pub fn possible_events(&self, current: UserStatus) -> Vec<AccountEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl Default for AccountStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
