//! # 阅片平台管理模块
//!
//! 提供配置管理、日志初始化，以及按配置装配各个服务的统一入口。

pub mod config;
pub mod logging;
pub mod system;

pub use config::{AppConfig, ConfigManager, ConfigValidator};
pub use logging::init_tracing;
pub use system::ReviewSystem;
