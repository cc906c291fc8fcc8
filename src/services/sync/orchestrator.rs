//! 同步编排
//!
//! `SyncOrchestrator` 把本地存储、加密和远端存储串起来，对外提供
//! init / push / pull / status / preview / set_auto_sync / rotate_password。
//!
//! 所有操作都遵循同一条规则：远端步骤全部成功之后才修改本地状态。

use super::conflict::{detect_conflicts_with_base, resolve_conflicts};
use super::crypto::{self, KdfParams};
use super::error::{SyncError, SyncResult, SyncResultExt};
use super::remote::{
    pick_latest, GistConnector, RemoteConnector, RemoteCredentials, RemoteStore,
    DEFAULT_DISCOVERY_TAG,
};
use crate::models::{
    Conflict, ConflictResolution, InitReport, LinkSource, MergeStrategy, PullReport,
    PullStrategy, PushReport, PushStrategy, RemoteStatus, SyncLinkage, SyncPayload, SyncPreview,
    SyncSettings, SyncState, SyncStatus, SystemSnapshot, DEFAULT_GIST_ENDPOINT,
    DEFAULT_TIMEOUT_SECS,
};
use crate::services::local_store::ConfigStore;
use std::sync::Arc;
use std::time::Duration;

/// 默认的远端服务
pub const PROVIDER_GITHUB: &str = "github";

/// 加密密码的最小长度（字符数）
pub const MIN_PASSWORD_LEN: usize = 8;

/// 编排器的全部可调参数，构造时显式传入
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub timeout: Duration,
    pub provider: String,
    pub endpoint: String,
    pub proxy_url: Option<String>,
    pub kdf_params: KdfParams,
    /// merge 推送遇到并发修改时是否重新拉取合并一次
    pub retry_on_conflict: bool,
    pub discovery_tag: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            provider: PROVIDER_GITHUB.to_string(),
            endpoint: DEFAULT_GIST_ENDPOINT.to_string(),
            proxy_url: None,
            kdf_params: KdfParams::default(),
            retry_on_conflict: true,
            discovery_tag: DEFAULT_DISCOVERY_TAG.to_string(),
        }
    }
}

impl SyncOptions {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
            endpoint: settings.endpoint.clone(),
            proxy_url: settings.proxy_url.clone(),
            retry_on_conflict: settings.retry_on_conflict,
            ..Self::default()
        }
    }
}

/// 修改加密密码的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateMode {
    /// 用旧密码解密远端、新密码重新加密并写回，然后保存新密码
    ReencryptRemote,
    /// 其他设备已经轮换过密码：验证新密码能解密远端后只更新本地
    LocalOnly,
}

/// 一次推送实际写入的结果
struct PushOutcome {
    revision: String,
    written: SystemSnapshot,
    conflicts: Vec<Conflict>,
}

pub struct SyncOrchestrator<S: ConfigStore> {
    store: S,
    connector: Arc<dyn RemoteConnector>,
    options: SyncOptions,
}

impl<S: ConfigStore> SyncOrchestrator<S> {
    pub fn new(store: S, connector: Arc<dyn RemoteConnector>, options: SyncOptions) -> Self {
        Self {
            store,
            connector,
            options,
        }
    }

    /// 使用 GitHub Gist 作为远端
    pub fn with_gist(store: S, options: SyncOptions) -> Self {
        let connector = GistConnector::new(options.timeout, options.proxy_url.clone());
        Self::new(store, Arc::new(connector), options)
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ==================== init ====================

    /// 建立本机与远端的关联
    ///
    /// 指定 `existing_blob_id` 时会立即用密码解密验证，失败则不保存任何内容；
    /// 未指定时通过发现标签查找最新的 blob，找不到则等首次 push 时创建。
    pub async fn init(
        &self,
        token: &str,
        password: &str,
        existing_blob_id: Option<&str>,
    ) -> SyncResult<InitReport> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SyncError::Validation("访问令牌不能为空".to_string()));
        }
        validate_password(password)?;

        let previous = self.store.load_linkage()?;
        let device_id = previous
            .as_ref()
            .map(|l| l.device_id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(SyncLinkage::mint_device_id);

        let mut linkage = SyncLinkage::new(
            self.options.provider.clone(),
            self.options.endpoint.clone(),
            token,
            password,
            device_id,
        );
        if let Some(previous) = &previous {
            linkage.enabled = previous.enabled;
            linkage.auto_sync = previous.auto_sync;
            linkage.sync_interval_minutes = previous.sync_interval_minutes;
        }

        let remote = self.connect(&linkage)?;
        let existing_blob_id = existing_blob_id.map(str::trim).filter(|id| !id.is_empty());

        let link_source = match existing_blob_id {
            Some(blob_id) => {
                let blob = remote
                    .fetch(blob_id)
                    .await
                    .with_operation("init", Some(blob_id))?;
                open_payload(&blob.content, password).with_operation("init", Some(blob_id))?;
                linkage.remote_blob_id = Some(blob_id.to_string());
                LinkSource::Existing
            }
            None => {
                let candidates = remote
                    .discover(&self.options.discovery_tag)
                    .await
                    .with_operation("discover", None)?;
                match pick_latest(&candidates) {
                    Some(latest) => {
                        if candidates.len() > 1 {
                            tracing::warn!(
                                count = candidates.len(),
                                chosen = %latest.id,
                                "发现多个同步配置，使用最近更新的一个"
                            );
                        }
                        linkage.remote_blob_id = Some(latest.id.clone());
                        LinkSource::Discovered
                    }
                    None => LinkSource::Pending,
                }
            }
        };

        self.store.save_linkage(&linkage)?;

        tracing::info!(
            device_id = %linkage.device_id,
            blob_id = ?linkage.remote_blob_id,
            source = ?link_source,
            "同步初始化完成"
        );

        Ok(InitReport {
            device_id: linkage.device_id,
            remote_blob_id: linkage.remote_blob_id,
            link_source,
        })
    }

    // ==================== push ====================

    pub async fn push(&self, strategy: PushStrategy) -> SyncResult<PushReport> {
        let mut linkage = self.linked()?;
        let local = self.store.load_snapshot()?;
        let remote = self.connect(&linkage)?;

        let existing = match linkage.remote_blob_id.clone() {
            Some(blob_id) => {
                let result = self
                    .push_existing(remote.as_ref(), &blob_id, &linkage, &local, strategy)
                    .await;
                result.map(|(outcome, retried)| Some((blob_id, outcome, retried)))
            }
            None => Ok(None),
        };

        let (blob_id, outcome, retried, created) = match existing {
            Ok(Some((blob_id, outcome, retried))) => (blob_id, outcome, retried, false),
            Ok(None) => {
                let (blob_id, outcome) = self.create_blob(remote.as_ref(), &linkage, &local).await?;
                (blob_id, outcome, false, true)
            }
            Err(e) if matches!(e.root(), SyncError::NotFound(_)) => {
                tracing::warn!(
                    blob_id = ?linkage.remote_blob_id,
                    "远端同步配置已不存在，重新创建"
                );
                let (blob_id, outcome) = self.create_blob(remote.as_ref(), &linkage, &local).await?;
                (blob_id, outcome, false, true)
            }
            Err(e) => return Err(e),
        };

        // 远端已写入，之后才修改本地
        if outcome.written.fingerprint() != local.fingerprint() {
            self.store.save_snapshot(&outcome.written)?;
        }
        linkage.record_sync(&blob_id, &outcome.revision, &outcome.written);
        self.store.save_linkage(&linkage)?;

        tracing::info!(
            blob_id = %blob_id,
            revision = %outcome.revision,
            strategy = strategy.as_str(),
            created,
            retried,
            profiles = outcome.written.len(),
            "推送完成"
        );

        Ok(PushReport {
            blob_id,
            revision: outcome.revision,
            created,
            strategy,
            profile_count: outcome.written.len(),
            conflicts: outcome.conflicts,
            retried,
        })
    }

    async fn create_blob(
        &self,
        remote: &dyn RemoteStore,
        linkage: &SyncLinkage,
        local: &SystemSnapshot,
    ) -> SyncResult<(String, PushOutcome)> {
        let content = self.seal(local, linkage, &linkage.encryption_password)?;
        let created = remote
            .create(&content, &self.options.discovery_tag)
            .await
            .with_operation("create", None)?;
        Ok((
            created.id,
            PushOutcome {
                revision: created.revision,
                written: local.clone(),
                conflicts: Vec::new(),
            },
        ))
    }

    /// 写入已有 blob；merge 策略遇到并发修改时按配置重试一次
    async fn push_existing(
        &self,
        remote: &dyn RemoteStore,
        blob_id: &str,
        linkage: &SyncLinkage,
        local: &SystemSnapshot,
        strategy: PushStrategy,
    ) -> SyncResult<(PushOutcome, bool)> {
        let mut retried = false;
        loop {
            match self
                .push_once(remote, blob_id, linkage, local, strategy)
                .await
            {
                Ok(outcome) => return Ok((outcome, retried)),
                Err(e)
                    if e.is_concurrent_modification()
                        && strategy == PushStrategy::Merge
                        && self.options.retry_on_conflict
                        && !retried =>
                {
                    tracing::warn!(blob_id, error = %e, "远端在推送期间被修改，重新拉取合并后重试");
                    retried = true;
                }
                Err(e) => return Err(e.context("push", Some(blob_id))),
            }
        }
    }

    async fn push_once(
        &self,
        remote: &dyn RemoteStore,
        blob_id: &str,
        linkage: &SyncLinkage,
        local: &SystemSnapshot,
        strategy: PushStrategy,
    ) -> SyncResult<PushOutcome> {
        let password = &linkage.encryption_password;
        let head = remote.fetch(blob_id).await?;

        let (written, conflicts) = match strategy {
            // 只读取版本号，不解密
            PushStrategy::Force => (local.clone(), Vec::new()),
            PushStrategy::Merge => {
                let payload = open_payload(&head.content, password)?;
                let resolution = detect_conflicts_with_base(
                    local,
                    &payload.snapshot,
                    &linkage.last_synced_profiles,
                );
                let merged = resolve_conflicts(&resolution, MergeStrategy::Merge);
                (merged, resolution.conflicts)
            }
            PushStrategy::Manual => {
                let payload = open_payload(&head.content, password)?;
                let resolution = detect_conflicts_with_base(
                    local,
                    &payload.snapshot,
                    &linkage.last_synced_profiles,
                );
                if resolution.has_conflicts() {
                    return Err(SyncError::Conflict(resolution.conflicts.len()));
                }
                (local.clone(), Vec::new())
            }
        };

        let content = self.seal(&written, linkage, password)?;
        let revision = remote
            .update(blob_id, &content, Some(&head.revision))
            .await?;

        Ok(PushOutcome {
            revision,
            written,
            conflicts,
        })
    }

    // ==================== pull ====================

    pub async fn pull(&self, strategy: PullStrategy) -> SyncResult<PullReport> {
        let mut linkage = self.linked()?;
        let blob_id = linkage
            .remote_blob_id
            .clone()
            .ok_or(SyncError::NoRemoteConfig)?;
        let remote = self.connect(&linkage)?;

        let blob = remote
            .fetch(&blob_id)
            .await
            .map_err(missing_as_no_remote)
            .with_operation("pull", Some(&blob_id))?;
        let payload = open_payload(&blob.content, &linkage.encryption_password)
            .with_operation("pull", Some(&blob_id))?;

        let local = self.store.load_snapshot()?;
        let resolution =
            detect_conflicts_with_base(&local, &payload.snapshot, &linkage.last_synced_profiles);
        let resolved = resolve_conflicts(&resolution, strategy);
        let changed = resolved.fingerprint() != local.fingerprint();

        // 先写快照再写关联信息：关联信息写入失败时版本号仍是旧的，
        // status 会显示有更新，再次 pull 得到同样的结果
        if changed {
            self.store.save_snapshot(&resolved)?;
        }
        // 基线记录远端内容，之后才能识别远端删除
        linkage.record_sync(&blob_id, &blob.revision, &payload.snapshot);
        self.store.save_linkage(&linkage)?;

        tracing::info!(
            blob_id = %blob_id,
            revision = %blob.revision,
            strategy = strategy.as_str(),
            writer = %payload.writer_device_id,
            conflicts = resolution.conflicts.len(),
            changed,
            "拉取完成"
        );

        Ok(PullReport {
            blob_id,
            revision: blob.revision,
            strategy,
            writer_device_id: payload.writer_device_id,
            profile_count: resolved.len(),
            conflicts: resolution.conflicts,
            changed,
        })
    }

    // ==================== status / preview ====================

    /// 只读状态查询；`check_remote` 为 true 时额外读取并解密远端
    pub async fn status(&self, check_remote: bool) -> SyncResult<SyncStatus> {
        let Some(linkage) = self.store.load_linkage()? else {
            return Ok(SyncStatus::uninitialized());
        };

        let remote = match (&linkage.remote_blob_id, check_remote) {
            (Some(blob_id), true) => {
                let (blob, payload, resolution) = self.inspect_remote(&linkage, blob_id).await?;
                Some(RemoteStatus {
                    up_to_date: linkage.last_known_revision.as_deref() == Some(blob.revision.as_str()),
                    revision: blob.revision,
                    updated_at: blob.updated_at,
                    writer_device_id: payload.writer_device_id,
                    written_at_utc: payload.written_at_utc,
                    conflicts: resolution.conflicts,
                })
            }
            _ => None,
        };

        Ok(SyncStatus {
            state: SyncState::Linked,
            provider: Some(linkage.provider),
            endpoint: Some(linkage.endpoint),
            remote_blob_id: linkage.remote_blob_id,
            device_id: Some(linkage.device_id),
            enabled: linkage.enabled,
            auto_sync: linkage.auto_sync,
            sync_interval_minutes: Some(linkage.sync_interval_minutes),
            last_known_revision: linkage.last_known_revision,
            last_sync_at: linkage.last_sync_at,
            remote,
        })
    }

    /// 手动合并流程：读取远端并给出冲突列表，不修改任何状态
    pub async fn preview(&self) -> SyncResult<SyncPreview> {
        let linkage = self.linked()?;
        let blob_id = linkage
            .remote_blob_id
            .clone()
            .ok_or(SyncError::NoRemoteConfig)?;
        let (blob, payload, resolution) = self.inspect_remote(&linkage, &blob_id).await?;

        Ok(SyncPreview {
            blob_id,
            remote_revision: blob.revision,
            writer_device_id: payload.writer_device_id,
            written_at_utc: payload.written_at_utc,
            resolution,
        })
    }

    async fn inspect_remote(
        &self,
        linkage: &SyncLinkage,
        blob_id: &str,
    ) -> SyncResult<(super::remote::RemoteBlob, SyncPayload, ConflictResolution)> {
        let remote = self.connect(linkage)?;
        let blob = remote
            .fetch(blob_id)
            .await
            .map_err(missing_as_no_remote)
            .with_operation("fetch", Some(blob_id))?;
        let payload = open_payload(&blob.content, &linkage.encryption_password)
            .with_operation("fetch", Some(blob_id))?;
        let local = self.store.load_snapshot()?;
        let resolution =
            detect_conflicts_with_base(&local, &payload.snapshot, &linkage.last_synced_profiles);
        Ok((blob, payload, resolution))
    }

    // ==================== 设置 ====================

    /// 保存自动同步设置（调度由调用方负责）
    pub fn set_auto_sync(&self, enabled: bool, interval_minutes: Option<u32>) -> SyncResult<()> {
        let mut linkage = self.linked_any()?;
        if let Some(interval) = interval_minutes {
            if interval < 1 {
                return Err(SyncError::Validation("同步间隔至少为 1 分钟".to_string()));
            }
            linkage.sync_interval_minutes = interval;
        }
        linkage.auto_sync = enabled;
        self.store.save_linkage(&linkage)?;

        tracing::info!(
            auto_sync = enabled,
            interval_minutes = linkage.sync_interval_minutes,
            "自动同步设置已更新"
        );
        Ok(())
    }

    /// 启用或停用同步（停用后 push/pull 会被拒绝）
    pub fn set_enabled(&self, enabled: bool) -> SyncResult<()> {
        let mut linkage = self.linked_any()?;
        linkage.enabled = enabled;
        self.store.save_linkage(&linkage)?;
        tracing::info!(enabled, "同步开关已更新");
        Ok(())
    }

    pub async fn rotate_password(&self, new_password: &str, mode: RotateMode) -> SyncResult<()> {
        validate_password(new_password)?;
        let mut linkage = self.linked()?;

        if let Some(blob_id) = linkage.remote_blob_id.clone() {
            let remote = self.connect(&linkage)?;
            let blob = remote
                .fetch(&blob_id)
                .await
                .with_operation("rotate password", Some(&blob_id))?;

            match mode {
                RotateMode::ReencryptRemote => {
                    let payload = open_payload(&blob.content, &linkage.encryption_password)
                        .with_operation("rotate password", Some(&blob_id))?;
                    let content = self.seal(&payload.snapshot, &linkage, new_password)?;
                    let revision = remote
                        .update(&blob_id, &content, Some(&blob.revision))
                        .await
                        .with_operation("rotate password", Some(&blob_id))?;
                    linkage.last_known_revision = Some(revision);
                }
                RotateMode::LocalOnly => {
                    open_payload(&blob.content, new_password)
                        .with_operation("rotate password", Some(&blob_id))?;
                }
            }
        }

        linkage.encryption_password = new_password.to_string();
        self.store.save_linkage(&linkage)?;
        tracing::info!(mode = ?mode, "加密密码已更新");
        Ok(())
    }

    // ==================== 内部 ====================

    /// 读取关联信息；未初始化或已停用时报错
    fn linked(&self) -> SyncResult<SyncLinkage> {
        let linkage = self.linked_any()?;
        if !linkage.enabled {
            return Err(SyncError::Validation(
                "同步已停用，请先执行 `sync config --enable`".to_string(),
            ));
        }
        Ok(linkage)
    }

    fn linked_any(&self) -> SyncResult<SyncLinkage> {
        self.store.load_linkage()?.ok_or(SyncError::NotInitialized)
    }

    fn connect(&self, linkage: &SyncLinkage) -> SyncResult<Box<dyn RemoteStore>> {
        let credentials =
            RemoteCredentials::new(&linkage.provider, &linkage.endpoint, &linkage.token);
        self.connector.connect(&credentials)
    }

    fn seal(
        &self,
        snapshot: &SystemSnapshot,
        linkage: &SyncLinkage,
        password: &str,
    ) -> SyncResult<String> {
        let payload = SyncPayload::new(&linkage.device_id, snapshot.clone());
        let bytes = payload
            .to_bytes()
            .map_err(|e| SyncError::Internal(format!("序列化同步负载失败: {e}")))?;
        Ok(crypto::encrypt_to_string(
            &bytes,
            password,
            &self.options.kdf_params,
        )?)
    }
}

/// 解密并解析远端内容；负载格式不对或版本未知同样视为解密失败
fn open_payload(content: &str, password: &str) -> SyncResult<SyncPayload> {
    let bytes = crypto::decrypt_str(content, password)?;
    let payload = SyncPayload::from_bytes(&bytes).map_err(|e| {
        tracing::debug!(error = %e, "同步负载解析失败");
        SyncError::Decryption
    })?;
    if !payload.is_supported() {
        tracing::debug!(schema_version = payload.schema_version, "不支持的负载版本");
        return Err(SyncError::Decryption);
    }
    Ok(payload)
}

fn missing_as_no_remote(err: SyncError) -> SyncError {
    match err {
        SyncError::NotFound(detail) => {
            tracing::debug!(detail = %detail, "远端同步配置不存在");
            SyncError::NoRemoteConfig
        }
        other => other,
    }
}

fn validate_password(password: &str) -> SyncResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(SyncError::Validation(format!(
            "加密密码至少需要 {MIN_PASSWORD_LEN} 个字符"
        )));
    }
    Ok(())
}
