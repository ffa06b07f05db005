//! # 病例工作流模块
//!
//! 提供病例从上传到复核的完整流程，包括：
//! - 病例状态机：分析完成与编辑备注驱动的状态转换
//! - 病例登记：创建、AI分析、备注、追问对话
//! - 工作列表：按时间倒序的病例列表与过滤分页
//! - 统计汇总：研究人员视图使用的派生指标

pub mod chat;
pub mod registry;
pub mod state_machine;
pub mod stats;
pub mod worklist;

pub use chat::{InProgressTurn, CHAT_FALLBACK};
pub use registry::CaseRegistry;
pub use state_machine::{CaseEvent, CaseStateMachine};
pub use stats::compute_stats;
pub use worklist::CaseFilter;
