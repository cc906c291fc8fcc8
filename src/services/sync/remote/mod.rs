//! 远端 blob 存储
//!
//! - `gist`: GitHub Gist API 实现（生产使用）
//! - `memory`: 进程内实现，带真正的 compare-and-swap（测试使用）
//!
//! 远端只保存加密后的 bundle 文本，不理解其中的内容。

pub mod gist;
pub mod memory;

pub use gist::{GistClient, GistConnector};
pub use memory::MemoryBlobStore;

use super::error::SyncResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

/// 默认的发现标签，写在 blob 描述中
pub const DEFAULT_DISCOVERY_TAG: &str = "[mirrorsync-config]";

/// 一次完整读取的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBlob {
    pub id: String,
    pub content: String,
    /// 不透明的版本号，用于乐观并发控制
    pub revision: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// 创建成功后的 blob 标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedBlob {
    pub id: String,
    pub revision: String,
}

/// discover 返回的候选 blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSummary {
    pub id: String,
    pub description: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 创建新 blob，`description` 携带发现标签
    async fn create(&self, content: &str, description: &str) -> SyncResult<CreatedBlob>;

    /// 更新 blob 内容，返回新版本号
    ///
    /// `expected_revision` 与当前版本不一致时返回 `ConcurrentModification`，不写入。
    async fn update(
        &self,
        blob_id: &str,
        content: &str,
        expected_revision: Option<&str>,
    ) -> SyncResult<String>;

    async fn fetch(&self, blob_id: &str) -> SyncResult<RemoteBlob>;

    /// 列出描述中包含 `tag` 的 blob，最新的排在前面
    async fn discover(&self, tag: &str) -> SyncResult<Vec<BlobSummary>>;
}

/// 访问远端所需的凭据（来自本地 SyncLinkage）
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub provider: String,
    pub endpoint: String,
    pub token: String,
}

impl RemoteCredentials {
    pub fn new(
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// 根据凭据构建 `RemoteStore`
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, credentials: &RemoteCredentials) -> SyncResult<Box<dyn RemoteStore>>;
}

/// 按更新时间倒序排序（时间相同按 ID 排序，保证结果稳定）
pub fn sort_newest_first(candidates: &mut [BlobSummary]) {
    candidates.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
}

/// 从候选中选出最新的一个
pub fn pick_latest(candidates: &[BlobSummary]) -> Option<&BlobSummary> {
    candidates
        .iter()
        .max_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| b.id.cmp(&a.id)))
}
