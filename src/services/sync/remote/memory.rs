//! 进程内 blob 存储
//!
//! 所有克隆共享同一份状态，可以模拟多台设备访问同一个远端。
//! 注入并发写入、统计调用次数等钩子只在测试构建中存在。
//! `update` 在同一把锁内完成版本比较和写入，是真正的原子 compare-and-swap。

use super::{
    sort_newest_first, BlobSummary, CreatedBlob, RemoteBlob, RemoteConnector, RemoteCredentials,
    RemoteStore,
};
use crate::services::sync::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct StoredBlob {
    content: String,
    description: String,
    revision: String,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    blobs: BTreeMap<String, StoredBlob>,
    next_id: u64,
    next_revision: u64,
    last_timestamp: Option<DateTime<Utc>>,
    /// 下一次 update 之前插入的"其他设备"写入
    #[cfg(test)]
    interleaved: std::collections::HashMap<String, String>,
    #[cfg(test)]
    update_calls: usize,
}

impl MemoryState {
    fn bump_revision(&mut self) -> String {
        self.next_revision += 1;
        format!("rev-{}", self.next_revision)
    }

    /// 单调递增的时间戳，保证 discover 的排序稳定
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(next);
        next
    }

    /// 测试钩子：计数，并先落下注入的其他设备写入
    #[cfg(test)]
    fn before_update(&mut self, blob_id: &str) {
        self.update_calls += 1;
        if let Some(other) = self.interleaved.remove(blob_id) {
            self.write(blob_id, &other);
        }
    }

    #[cfg(not(test))]
    fn before_update(&mut self, _blob_id: &str) {}

    fn write(&mut self, blob_id: &str, content: &str) -> Option<String> {
        let revision = self.bump_revision();
        let updated_at = self.tick();
        let blob = self.blobs.get_mut(blob_id)?;
        blob.content = content.to_string();
        blob.revision = revision.clone();
        blob.updated_at = updated_at;
        Some(revision)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| SyncError::Internal("内存存储锁已损坏".to_string()))
    }

    /// 让下一次对 `blob_id` 的 update 之前先发生一次其他设备的写入
    #[cfg(test)]
    pub fn interleave_write(&self, blob_id: &str, content: &str) -> SyncResult<()> {
        self.lock()?
            .interleaved
            .insert(blob_id.to_string(), content.to_string());
        Ok(())
    }

    /// 直接读取存储的原始内容（不经过 RemoteStore 接口）
    #[cfg(test)]
    pub fn raw_content(&self, blob_id: &str) -> Option<String> {
        self.lock()
            .ok()?
            .blobs
            .get(blob_id)
            .map(|b| b.content.clone())
    }

    /// 模拟远端 blob 被删除
    #[cfg(test)]
    pub fn delete_blob(&self, blob_id: &str) -> bool {
        self.lock()
            .map(|mut s| s.blobs.remove(blob_id).is_some())
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn blob_count(&self) -> usize {
        self.lock().map(|s| s.blobs.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn update_calls(&self) -> usize {
        self.lock().map(|s| s.update_calls).unwrap_or(0)
    }
}

#[async_trait]
impl RemoteStore for MemoryBlobStore {
    async fn create(&self, content: &str, description: &str) -> SyncResult<CreatedBlob> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = format!("mem-{:04}", state.next_id);
        let revision = state.bump_revision();
        let updated_at = state.tick();
        state.blobs.insert(
            id.clone(),
            StoredBlob {
                content: content.to_string(),
                description: description.to_string(),
                revision: revision.clone(),
                updated_at,
            },
        );
        tracing::debug!(blob_id = %id, revision = %revision, "内存 blob 已创建");
        Ok(CreatedBlob { id, revision })
    }

    async fn update(
        &self,
        blob_id: &str,
        content: &str,
        expected_revision: Option<&str>,
    ) -> SyncResult<String> {
        let mut state = self.lock()?;
        state.before_update(blob_id);

        if !state.blobs.contains_key(blob_id) {
            return Err(SyncError::NotFound(format!("blob {blob_id} 不存在")));
        }

        let current = state
            .blobs
            .get(blob_id)
            .map(|b| b.revision.clone())
            .ok_or_else(|| SyncError::NotFound(format!("blob {blob_id} 不存在")))?;

        if let Some(expected) = expected_revision {
            if expected != current {
                return Err(SyncError::ConcurrentModification {
                    expected: Some(expected.to_string()),
                    actual: Some(current),
                });
            }
        }

        state
            .write(blob_id, content)
            .ok_or_else(|| SyncError::NotFound(format!("blob {blob_id} 不存在")))
    }

    async fn fetch(&self, blob_id: &str) -> SyncResult<RemoteBlob> {
        let state = self.lock()?;
        let blob = state
            .blobs
            .get(blob_id)
            .ok_or_else(|| SyncError::NotFound(format!("blob {blob_id} 不存在")))?;
        Ok(RemoteBlob {
            id: blob_id.to_string(),
            content: blob.content.clone(),
            revision: blob.revision.clone(),
            updated_at: Some(blob.updated_at),
        })
    }

    async fn discover(&self, tag: &str) -> SyncResult<Vec<BlobSummary>> {
        let state = self.lock()?;
        let mut candidates: Vec<BlobSummary> = state
            .blobs
            .iter()
            .filter(|(_, b)| b.description.contains(tag))
            .map(|(id, b)| BlobSummary {
                id: id.clone(),
                description: b.description.clone(),
                updated_at: Some(b.updated_at),
            })
            .collect();
        sort_newest_first(&mut candidates);
        Ok(candidates)
    }
}

impl RemoteConnector for MemoryBlobStore {
    fn connect(&self, credentials: &RemoteCredentials) -> SyncResult<Box<dyn RemoteStore>> {
        if credentials.token.trim().is_empty() {
            return Err(SyncError::Authentication("token 为空".to_string()));
        }
        Ok(Box::new(self.clone()))
    }
}
