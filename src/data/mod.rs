//! 统一数据管理模块
//!
//! # 模块组织
//!
//! - `error`: 统一错误类型定义
//! - `managers`: 文件格式管理器（目前只有 JSON）

pub mod error;
pub mod managers;

pub use error::{DataError, Result};
pub use managers::JsonManager;
