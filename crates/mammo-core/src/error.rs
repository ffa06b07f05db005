//! 错误定义模块

use thiserror::Error;

/// 阅片平台统一错误类型
#[derive(Error, Debug)]
pub enum MammoError {
    #[error("邮箱已被注册: {0}")]
    DuplicateEmail(String),

    #[error("邮箱或密码错误")]
    InvalidCredentials,

    #[error("账户需要邮箱验证: {email}")]
    VerificationRequired { email: String },

    #[error("账户访问受限: {0}")]
    AccessRestricted(String),

    #[error("验证码无效")]
    InvalidCode,

    #[error("未找到账户: {0}")]
    UnknownAccount(String),

    #[error("没有待发送的验证码: {0}")]
    NoPendingCode(String),

    #[error("AI诊断服务错误: {0}")]
    DiagnosticFailure(String),

    #[error("通知发送失败: {0}")]
    NotificationFailure(String),

    #[error("存储不可用: {0}")]
    StoreUnavailable(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("权限错误: {0}")]
    Permission(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },
}

impl MammoError {
    /// 账户类错误在界面内联提示，不向上抛出
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            MammoError::DuplicateEmail(_)
                | MammoError::InvalidCredentials
                | MammoError::VerificationRequired { .. }
                | MammoError::AccessRestricted(_)
                | MammoError::InvalidCode
                | MammoError::UnknownAccount(_)
                | MammoError::NoPendingCode(_)
                | MammoError::NotificationFailure(_)
        )
    }
}

/// 阅片平台统一结果类型
pub type Result<T> = std::result::Result<T, MammoError>;
