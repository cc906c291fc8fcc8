//! 同步相关的数据类型：本地关联信息、加密前的负载、策略、冲突与各操作的结果报告

use super::mirror::{MirrorProfile, MirrorProfileView, SystemSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 当前支持的同步负载版本
pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

/// 默认自动同步间隔（分钟）
pub const DEFAULT_SYNC_INTERVAL_MINUTES: u32 = 30;

// ==================== SyncLinkage ====================

/// 本机与远端同步 blob 的关联信息（仅保存在本地，永不上传）
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLinkage {
    pub provider: String,
    pub endpoint: String,
    pub token: String,
    #[serde(default, rename = "remoteBlobID", skip_serializing_if = "Option::is_none")]
    pub remote_blob_id: Option<String>,
    #[serde(rename = "deviceID")]
    pub device_id: String,
    pub encryption_password: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_sync: bool,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    /// 上一次成功同步时快照中的镜像名称，用于识别远端删除
    #[serde(default)]
    pub last_synced_profiles: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_sync_interval() -> u32 {
    DEFAULT_SYNC_INTERVAL_MINUTES
}

impl SyncLinkage {
    pub fn new(
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        token: impl Into<String>,
        encryption_password: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            endpoint: endpoint.into(),
            token: token.into(),
            remote_blob_id: None,
            device_id: device_id.into(),
            encryption_password: encryption_password.into(),
            enabled: true,
            auto_sync: false,
            sync_interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
            last_known_revision: None,
            last_sync_at: None,
            last_synced_profiles: Vec::new(),
        }
    }

    /// 生成新的设备 ID（每个安装只生成一次）
    pub fn mint_device_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// 成功推送/拉取后记录远端版本与同步基线
    pub fn record_sync(&mut self, blob_id: &str, revision: &str, snapshot: &SystemSnapshot) {
        self.remote_blob_id = Some(blob_id.to_string());
        self.last_known_revision = Some(revision.to_string());
        self.last_sync_at = Some(Utc::now());
        self.last_synced_profiles = snapshot.names().into_iter().collect();
    }
}

impl fmt::Debug for SyncLinkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncLinkage")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .field("remote_blob_id", &self.remote_blob_id)
            .field("device_id", &self.device_id)
            .field("encryption_password", &"<redacted>")
            .field("enabled", &self.enabled)
            .field("auto_sync", &self.auto_sync)
            .field("sync_interval_minutes", &self.sync_interval_minutes)
            .field("last_known_revision", &self.last_known_revision)
            .field("last_sync_at", &self.last_sync_at)
            .finish()
    }
}

// ==================== SyncPayload ====================

/// 加密前的同步负载（包含明文 API Key，只在加密后离开本机）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub schema_version: u32,
    #[serde(rename = "writerDeviceID")]
    pub writer_device_id: String,
    #[serde(rename = "writtenAtUTC")]
    pub written_at_utc: DateTime<Utc>,
    pub snapshot: SystemSnapshot,
}

impl SyncPayload {
    pub fn new(writer_device_id: impl Into<String>, snapshot: SystemSnapshot) -> Self {
        Self {
            schema_version: PAYLOAD_SCHEMA_VERSION,
            writer_device_id: writer_device_id.into(),
            written_at_utc: Utc::now(),
            snapshot: snapshot.normalized(),
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        let mut payload: SyncPayload = serde_json::from_slice(bytes)?;
        payload.snapshot.normalize();
        Ok(payload)
    }

    pub fn is_supported(&self) -> bool {
        self.schema_version == PAYLOAD_SCHEMA_VERSION
    }
}

// ==================== 策略 ====================

/// 冲突解决策略（拉取时由用户选择，推送 merge 时固定使用 `Merge`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    #[default]
    #[serde(alias = "auto")]
    Merge,
    Local,
    Remote,
}

pub type PullStrategy = MergeStrategy;

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Merge => "merge",
            MergeStrategy::Local => "local",
            MergeStrategy::Remote => "remote",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "merge" => Ok(MergeStrategy::Merge),
            "local" => Ok(MergeStrategy::Local),
            "remote" => Ok(MergeStrategy::Remote),
            other => Err(format!("未知的拉取策略: {other}（可选 auto/merge/local/remote）")),
        }
    }
}

/// 推送策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStrategy {
    #[default]
    #[serde(alias = "auto")]
    Merge,
    Force,
    Manual,
}

impl PushStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushStrategy::Merge => "merge",
            PushStrategy::Force => "force",
            PushStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for PushStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PushStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "merge" => Ok(PushStrategy::Merge),
            "force" => Ok(PushStrategy::Force),
            "manual" => Ok(PushStrategy::Manual),
            other => Err(format!("未知的推送策略: {other}（可选 auto/merge/force/manual）")),
        }
    }
}

// ==================== 冲突 ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    NewLocal,
    NewRemote,
    Modified,
    RemovedRemote,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::NewLocal => "new_local",
            ConflictKind::NewRemote => "new_remote",
            ConflictKind::Modified => "modified",
            ConflictKind::RemovedRemote => "removed_remote",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub kind: ConflictKind,
    pub profile_name: String,
    /// 序列化时只输出 Key 预览
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_redacted"
    )]
    pub local_value: Option<MirrorProfile>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_redacted"
    )]
    pub remote_value: Option<MirrorProfile>,
}

fn serialize_redacted<S: Serializer>(
    profile: &Option<MirrorProfile>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    profile
        .as_ref()
        .map(MirrorProfileView::from)
        .serialize(serializer)
}

/// 冲突检测结果：按镜像名称排序的冲突列表，以及参与计算的两份快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictResolution {
    pub conflicts: Vec<Conflict>,
    pub local: SystemSnapshot,
    pub remote: SystemSnapshot,
}

impl ConflictResolution {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn count(&self, kind: ConflictKind) -> usize {
        self.conflicts.iter().filter(|c| c.kind == kind).count()
    }

    /// 是否需要调用方向用户确认
    ///
    /// 只有远端新增的镜像是纯增量；修改和远端删除都可能覆盖用户的本地改动。
    pub fn requires_confirmation(&self) -> bool {
        self.conflicts
            .iter()
            .any(|c| matches!(c.kind, ConflictKind::Modified | ConflictKind::RemovedRemote))
    }

    /// 只存在于本地、尚未推送的镜像（不计入冲突，仅供预览展示）
    pub fn pending_local(&self) -> Vec<Conflict> {
        let remote_names = self.remote.names();
        let already_reported: Vec<&str> = self
            .conflicts
            .iter()
            .map(|c| c.profile_name.as_str())
            .collect();

        self.local
            .mirrors
            .iter()
            .filter(|m| !remote_names.contains(&m.name))
            .filter(|m| !already_reported.contains(&m.name.as_str()))
            .map(|m| Conflict {
                kind: ConflictKind::NewLocal,
                profile_name: m.name.clone(),
                local_value: Some(m.clone()),
                remote_value: None,
            })
            .collect()
    }
}

// ==================== 操作结果 ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Uninitialized,
    Linked,
}

/// init 时远端 blob 的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSource {
    /// 调用方指定并已验证可解密
    Existing,
    /// 通过 discover 找到的最新 blob（首次 pull 时才验证密码）
    Discovered,
    /// 暂无远端 blob，首次 push 时创建
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitReport {
    pub device_id: String,
    pub remote_blob_id: Option<String>,
    pub link_source: LinkSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    pub blob_id: String,
    pub revision: String,
    pub created: bool,
    pub strategy: PushStrategy,
    pub profile_count: usize,
    pub conflicts: Vec<Conflict>,
    pub retried: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullReport {
    pub blob_id: String,
    pub revision: String,
    pub strategy: PullStrategy,
    pub writer_device_id: String,
    pub profile_count: usize,
    pub conflicts: Vec<Conflict>,
    /// 本地快照是否发生变化
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    pub revision: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub writer_device_id: String,
    pub written_at_utc: DateTime<Utc>,
    /// 远端版本与本地记录的最后版本一致
    pub up_to_date: bool,
    pub conflicts: Vec<Conflict>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub provider: Option<String>,
    pub endpoint: Option<String>,
    pub remote_blob_id: Option<String>,
    pub device_id: Option<String>,
    pub enabled: bool,
    pub auto_sync: bool,
    pub sync_interval_minutes: Option<u32>,
    pub last_known_revision: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub remote: Option<RemoteStatus>,
}

impl SyncStatus {
    pub fn uninitialized() -> Self {
        Self {
            state: SyncState::Uninitialized,
            provider: None,
            endpoint: None,
            remote_blob_id: None,
            device_id: None,
            enabled: false,
            auto_sync: false,
            sync_interval_minutes: None,
            last_known_revision: None,
            last_sync_at: None,
            remote: None,
        }
    }

    pub fn pending_conflicts(&self) -> usize {
        self.remote.as_ref().map(|r| r.conflicts.len()).unwrap_or(0)
    }
}

/// 手动合并流程的预览结果
#[derive(Debug, Clone)]
pub struct SyncPreview {
    pub blob_id: String,
    pub remote_revision: String,
    pub writer_device_id: String,
    pub written_at_utc: DateTime<Utc>,
    pub resolution: ConflictResolution,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mirror::ToolType;

    #[test]
    fn linkage_debug_redacts_secrets() {
        let linkage = SyncLinkage::new(
            "github",
            "https://api.github.com",
            "ghp_secret_token",
            "hunter2hunter2",
            "device-1",
        );
        let printed = format!("{linkage:?}");
        assert!(!printed.contains("ghp_secret_token"));
        assert!(!printed.contains("hunter2hunter2"));
        assert!(printed.contains("device-1"));
    }

    #[test]
    fn linkage_defaults_for_missing_fields() {
        let json = r#"{
            "provider": "github",
            "endpoint": "https://api.github.com",
            "token": "t",
            "deviceID": "d",
            "encryptionPassword": "p"
        }"#;
        let linkage: SyncLinkage = serde_json::from_str(json).unwrap();
        assert!(linkage.enabled);
        assert!(!linkage.auto_sync);
        assert_eq!(linkage.sync_interval_minutes, DEFAULT_SYNC_INTERVAL_MINUTES);
        assert!(linkage.remote_blob_id.is_none());
    }

    #[test]
    fn record_sync_tracks_sorted_names() {
        let mut linkage = SyncLinkage::new("github", "e", "t", "p", "d");
        let snapshot = SystemSnapshot::new(
            vec![
                MirrorProfile::new("b", "u", "k", ToolType::Codex),
                MirrorProfile::new("a", "u", "k", ToolType::Codex),
            ],
            None,
            None,
        );
        linkage.record_sync("blob", "rev-1", &snapshot);
        assert_eq!(linkage.remote_blob_id.as_deref(), Some("blob"));
        assert_eq!(linkage.last_known_revision.as_deref(), Some("rev-1"));
        assert_eq!(linkage.last_synced_profiles, vec!["a", "b"]);
        assert!(linkage.last_sync_at.is_some());
    }

    #[test]
    fn payload_wire_names() {
        let payload = SyncPayload::new("device-x", SystemSnapshot::default());
        let value: serde_json::Value = serde_json::from_slice(&payload.to_bytes().unwrap()).unwrap();
        assert_eq!(value["schemaVersion"], PAYLOAD_SCHEMA_VERSION);
        assert_eq!(value["writerDeviceID"], "device-x");
        assert!(value.get("writtenAtUTC").is_some());
    }

    #[test]
    fn strategy_parsing_accepts_auto_alias() {
        assert_eq!("auto".parse::<PushStrategy>().unwrap(), PushStrategy::Merge);
        assert_eq!("FORCE".parse::<PushStrategy>().unwrap(), PushStrategy::Force);
        assert_eq!("auto".parse::<PullStrategy>().unwrap(), MergeStrategy::Merge);
        assert_eq!("remote".parse::<PullStrategy>().unwrap(), MergeStrategy::Remote);
        assert!("later".parse::<PullStrategy>().is_err());
    }

    #[test]
    fn confirmation_needed_only_for_destructive_kinds() {
        let a = MirrorProfile::new("a", "u", "k", ToolType::Codex);
        let mut resolution = ConflictResolution {
            conflicts: vec![Conflict {
                kind: ConflictKind::NewRemote,
                profile_name: "a".to_string(),
                local_value: None,
                remote_value: Some(a.clone()),
            }],
            local: SystemSnapshot::default(),
            remote: SystemSnapshot::new(vec![a.clone()], None, None),
        };
        assert!(!resolution.requires_confirmation());

        resolution.conflicts[0].kind = ConflictKind::Modified;
        assert!(resolution.requires_confirmation());
    }

    #[test]
    fn pending_local_lists_unpushed_profiles() {
        let a = MirrorProfile::new("a", "u", "k", ToolType::Codex);
        let b = MirrorProfile::new("b", "u", "k", ToolType::Claude);
        let resolution = ConflictResolution {
            conflicts: vec![],
            local: SystemSnapshot::new(vec![a.clone(), b], None, None),
            remote: SystemSnapshot::new(vec![a], None, None),
        };
        let pending = resolution.pending_local();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, ConflictKind::NewLocal);
        assert_eq!(pending[0].profile_name, "b");
    }

    #[test]
    fn report_json_carries_only_key_previews() {
        let local = MirrorProfile::new("a", "https://local", "sk-LOCAL-SECRET", ToolType::Codex);
        let remote = MirrorProfile::new("a", "https://remote", "sk-REMOTE-SECRET", ToolType::Codex);
        let report = PushReport {
            blob_id: "gist-1".to_string(),
            revision: "rev-2".to_string(),
            created: false,
            strategy: PushStrategy::Merge,
            profile_count: 1,
            conflicts: vec![Conflict {
                kind: ConflictKind::Modified,
                profile_name: "a".to_string(),
                local_value: Some(local),
                remote_value: Some(remote),
            }],
            retried: false,
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("LOCAL-SECRET"));
        assert!(!json.contains("REMOTE-SECRET"));
        assert!(!json.contains("\"apiKey\""));
        assert!(json.contains("\"apiKeyPreview\":\"sk-L...CRET\""));
        assert!(json.contains("https://remote"));
    }
}
