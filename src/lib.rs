//! # 乳腺影像AI辅助阅片平台
//!
//! 汇总各子模块的常用类型，供演示程序和下游集成使用：
//! - [`core`]：数据模型、错误与工具函数
//! - [`storage`]：病例、用户与会话的持久化
//! - [`identity`]：注册、登录、验证码与账户状态
//! - [`workflow`]：病例登记、AI分析、追问与统计
//! - [`integration`]：AI诊断服务与邮件通知
//! - [`admin`]：配置、日志与服务装配

pub use mammo_admin as admin;
pub use mammo_core as core;
pub use mammo_identity as identity;
pub use mammo_integration as integration;
pub use mammo_storage as storage;
pub use mammo_workflow as workflow;

pub use mammo_admin::{AppConfig, ConfigManager, ReviewSystem};
pub use mammo_core::{MammoError, Result};
