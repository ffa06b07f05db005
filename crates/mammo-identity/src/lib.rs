//! # 身份与访问模块
//!
//! 负责账户的完整生命周期：
//! - 注册与邮箱验证码校验
//! - 登录、登出与会话恢复
//! - 找回密码与验证码重发
//! - 管理员账户维护
//!
//! 账户状态转换由表驱动的状态机约束，当前用户通过显式的
//! [`SessionContext`] 在调用间传递。

pub mod account_state;
pub mod codes;
pub mod service;
pub mod session;

pub use account_state::{AccountEvent, AccountStateMachine};
pub use codes::{CodeKind, CodeOutcome, CodePolicy};
pub use service::IdentityService;
pub use session::SessionContext;
