// lib.rs - 暴露同步引擎给 CLI 和嵌入方使用

pub mod core;
pub mod data;
pub mod models;
pub mod services;
pub mod utils;

pub use models::*;

// 同步引擎
pub use services::local_store::{ConfigStore, FileConfigStore, MemoryConfigStore};
pub use services::sync::{
    RotateMode, SyncError, SyncErrorKind, SyncOptions, SyncOrchestrator, SyncResult,
};

// 重新导出常用类型
pub use anyhow::{Context, Result};

pub use self::core::init_logger;
