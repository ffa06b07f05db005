//! # 持久化存储模块
//!
//! 负责病例、用户和当前会话三个集合的读写，以及首次启动时的示例数据。

pub mod backend;
pub mod records;
pub mod seed;

pub use backend::{FileStore, KeyValueStore, MemoryStore};
pub use records::{Collection, RecordStore};
