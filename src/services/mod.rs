// 服务层模块
//
// - local_store: 本地镜像快照和同步关联信息的持久化
// - sync: 加密、远端存储、冲突解决和同步流程编排

pub mod local_store;
pub mod sync;

pub use local_store::{ConfigStore, FileConfigStore, MemoryConfigStore};
