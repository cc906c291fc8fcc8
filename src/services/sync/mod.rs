//! 加密多设备同步
//!
//! - `crypto`: Argon2id + AES-256-GCM 加密容器
//! - `remote`: 远端 blob 存储（Gist / 内存）
//! - `conflict`: 冲突检测与解决
//! - `orchestrator`: init / push / pull 等流程编排
//! - `error`: 同步错误类型

pub mod conflict;
pub mod crypto;
pub mod error;
pub mod orchestrator;
pub mod remote;

pub use conflict::{detect_conflicts, detect_conflicts_with_base, resolve_conflicts};
pub use crypto::{CryptoError, EncryptedBundle, KdfParams};
pub use error::{SyncError, SyncErrorKind, SyncResult};
pub use orchestrator::{RotateMode, SyncOptions, SyncOrchestrator};
pub use remote::{
    GistClient, GistConnector, MemoryBlobStore, RemoteConnector, RemoteCredentials, RemoteStore,
};
