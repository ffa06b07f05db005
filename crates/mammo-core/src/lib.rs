//! # Mammo Core
//!
//! 乳腺影像阅片平台的核心模块，提供基础数据结构、错误定义和通用工具。

pub mod clock;
pub mod error;
pub mod models;
pub mod password;
pub mod utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{MammoError, Result};
pub use models::*;
