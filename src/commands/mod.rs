pub mod sync_commands;

// 重新导出所有命令函数
pub use sync_commands::*;
