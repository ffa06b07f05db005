//! # 外部系统集成模块
//!
//! 提供与外部服务的对接，包括：
//! - AI诊断服务：影像分类与基于分析结果的流式追问
//! - 通知服务：验证码邮件与联系表单投递
//!
//! 两类服务都以 trait 描述契约，核心逻辑只依赖 trait，HTTP 实现可替换。

pub mod diagnostic;
pub mod notification;

pub use diagnostic::{
    ChatRequest, DiagnosticRequest, DiagnosticService, FragmentStream, GenerativeConfig,
    GenerativeDiagnosticClient,
};
pub use notification::{
    CodeMessage, CodePurpose, ContactInquiry, EmailJsConfig, EmailJsSender, NotificationSender,
    OutboxSender,
};
