//! 本地配置存储
//!
//! 目录结构：
//! - ~/.mirrorsync/mirrors.json  镜像快照（含 API Key）
//! - ~/.mirrorsync/sync.json     同步关联信息（含 token 和加密密码）
//!
//! 两个文件都通过 `JsonManager` 原子写入，Unix 下权限为 0600。

use crate::data::{DataError, JsonManager, Result};
use crate::models::{SyncLinkage, SystemSnapshot};
use crate::utils::config;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const MIRRORS_FILE: &str = "mirrors.json";
const LINKAGE_FILE: &str = "sync.json";

/// 同步引擎与本地配置之间的契约
pub trait ConfigStore: Send + Sync {
    /// 读取当前快照；从未保存过时返回空快照
    fn load_snapshot(&self) -> Result<SystemSnapshot>;

    fn save_snapshot(&self, snapshot: &SystemSnapshot) -> Result<()>;

    fn load_linkage(&self) -> Result<Option<SyncLinkage>>;

    fn save_linkage(&self, linkage: &SyncLinkage) -> Result<()>;
}

/// 基于 JSON 文件的实现
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    dir: PathBuf,
    json: JsonManager,
}

impl FileConfigStore {
    /// 使用默认配置目录（`MIRRORSYNC_CONFIG_DIR` 或 `~/.mirrorsync`）
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self::with_dir(config::config_dir()?))
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            json: JsonManager::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn mirrors_path(&self) -> PathBuf {
        self.dir.join(MIRRORS_FILE)
    }

    pub fn linkage_path(&self) -> PathBuf {
        self.dir.join(LINKAGE_FILE)
    }
}

impl ConfigStore for FileConfigStore {
    fn load_snapshot(&self) -> Result<SystemSnapshot> {
        let snapshot: Option<SystemSnapshot> = self.json.read(&self.mirrors_path())?;
        Ok(snapshot.unwrap_or_default().normalized())
    }

    fn save_snapshot(&self, snapshot: &SystemSnapshot) -> Result<()> {
        let normalized = snapshot.clone().normalized();
        self.json.write(&self.mirrors_path(), &normalized)?;
        tracing::debug!(profiles = normalized.len(), "本地镜像快照已保存");
        Ok(())
    }

    fn load_linkage(&self) -> Result<Option<SyncLinkage>> {
        self.json.read(&self.linkage_path())
    }

    fn save_linkage(&self, linkage: &SyncLinkage) -> Result<()> {
        self.json.write(&self.linkage_path(), linkage)
    }
}

/// 内存实现，克隆之间共享状态（嵌入方和测试使用）
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<Mutex<MemoryConfig>>,
}

#[derive(Debug, Default)]
struct MemoryConfig {
    snapshot: SystemSnapshot,
    linkage: Option<SyncLinkage>,
    snapshot_writes: usize,
}

impl MemoryConfigStore {
    pub fn new(snapshot: SystemSnapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryConfig {
                snapshot: snapshot.normalized(),
                ..Default::default()
            })),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryConfig) -> T) -> Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| DataError::Concurrency("内存配置锁已损坏".to_string()))?;
        Ok(f(&mut guard))
    }

    /// `save_snapshot` 被调用的次数
    pub fn snapshot_writes(&self) -> usize {
        self.with_state(|s| s.snapshot_writes).unwrap_or(0)
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_snapshot(&self) -> Result<SystemSnapshot> {
        self.with_state(|s| s.snapshot.clone())
    }

    fn save_snapshot(&self, snapshot: &SystemSnapshot) -> Result<()> {
        self.with_state(|s| {
            s.snapshot = snapshot.clone().normalized();
            s.snapshot_writes += 1;
        })
    }

    fn load_linkage(&self) -> Result<Option<SyncLinkage>> {
        self.with_state(|s| s.linkage.clone())
    }

    fn save_linkage(&self, linkage: &SyncLinkage) -> Result<()> {
        self.with_state(|s| s.linkage = Some(linkage.clone()))
    }
}
