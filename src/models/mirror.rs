//! 镜像配置数据类型
//!
//! `MirrorProfile` 以 `name` 作为唯一标识（区分大小写），`SystemSnapshot` 是某一时刻
//! 完整的镜像列表加上两个"当前"指针。快照在哈希、比对、序列化之前必须先
//! `normalized()`，保证按名称排序、结果可复现。

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// 镜像所服务的工具类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Codex,
    #[serde(alias = "claude-code")]
    Claude,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Codex => "codex",
            ToolType::Claude => "claude",
        }
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "codex" => Ok(ToolType::Codex),
            "claude" | "claude-code" => Ok(ToolType::Claude),
            other => Err(format!("未知的工具类型: {other}")),
        }
    }
}

/// 单个镜像配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorProfile {
    pub name: String,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub tool_type: ToolType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl MirrorProfile {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        tool_type: ToolType,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            tool_type,
            env_key: None,
            model_name: None,
        }
    }

    /// 除 `api_key` 外的字段是否完全一致
    pub fn same_settings(&self, other: &MirrorProfile) -> bool {
        self.base_url == other.base_url
            && self.tool_type == other.tool_type
            && self.env_key == other.env_key
            && self.model_name == other.model_name
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// 展示用的 API Key 预览
    pub fn api_key_preview(&self) -> String {
        mask_api_key(&self.api_key)
    }
}

/// 对外展示的镜像配置（API Key 只保留预览）
///
/// 报告、日志和 `--json` 输出都用它，完整的 `MirrorProfile` 只出现在加密负载和本地文件里。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorProfileView {
    pub name: String,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    pub api_key_preview: String,
    pub tool_type: ToolType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl From<&MirrorProfile> for MirrorProfileView {
    fn from(profile: &MirrorProfile) -> Self {
        Self {
            name: profile.name.clone(),
            base_url: profile.base_url.clone(),
            api_key_preview: profile.api_key_preview(),
            tool_type: profile.tool_type,
            env_key: profile.env_key.clone(),
            model_name: profile.model_name.clone(),
        }
    }
}

/// 镜像配置快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    #[serde(default)]
    pub mirrors: Vec<MirrorProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_codex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_claude: Option<String>,
}

impl SystemSnapshot {
    pub fn new(
        mirrors: Vec<MirrorProfile>,
        current_codex: Option<String>,
        current_claude: Option<String>,
    ) -> Self {
        Self {
            mirrors,
            current_codex,
            current_claude,
        }
        .normalized()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    /// 返回规范化后的快照
    ///
    /// - 镜像按名称排序，同名条目保留最后一个
    /// - 指向不存在镜像（或空字符串）的指针视为未设置
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    pub fn normalize(&mut self) {
        let mut by_name: BTreeMap<String, MirrorProfile> = BTreeMap::new();
        for mirror in self.mirrors.drain(..) {
            by_name.insert(mirror.name.clone(), mirror);
        }
        self.mirrors = by_name.into_values().collect();

        let codex = self.resolve_pointer(self.current_codex.as_deref());
        let claude = self.resolve_pointer(self.current_claude.as_deref());
        self.current_codex = codex;
        self.current_claude = claude;
    }

    pub fn get(&self, name: &str) -> Option<&MirrorProfile> {
        self.mirrors.iter().find(|m| m.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.mirrors.iter().map(|m| m.name.clone()).collect()
    }

    /// 按名称建立有序索引
    pub fn by_name(&self) -> BTreeMap<&str, &MirrorProfile> {
        self.mirrors.iter().map(|m| (m.name.as_str(), m)).collect()
    }

    /// 指针仍指向本快照中存在的镜像时返回其名称
    pub fn resolve_pointer(&self, pointer: Option<&str>) -> Option<String> {
        pointer
            .filter(|name| !name.is_empty())
            .filter(|name| self.contains(name))
            .map(str::to_string)
    }

    /// 规范化 JSON 的 SHA-256，用于判断两份快照内容是否一致
    pub fn fingerprint(&self) -> String {
        let canonical = self.clone().normalized();
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }
}

fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{prefix}...{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror(name: &str, url: &str) -> MirrorProfile {
        MirrorProfile::new(name, url, "sk-test-key", ToolType::Claude)
    }

    #[test]
    fn normalize_sorts_by_name_and_dedupes() {
        let snapshot = SystemSnapshot::new(
            vec![
                mirror("zeta", "https://z"),
                mirror("Alpha", "https://a"),
                mirror("alpha", "https://a1"),
                mirror("zeta", "https://z2"),
            ],
            None,
            None,
        );

        let names: Vec<_> = snapshot.mirrors.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "alpha", "zeta"]);
        assert_eq!(snapshot.get("zeta").unwrap().base_url, "https://z2");
    }

    #[test]
    fn dangling_pointers_are_cleared() {
        let snapshot = SystemSnapshot::new(
            vec![mirror("a", "https://a")],
            Some("missing".to_string()),
            Some("a".to_string()),
        );
        assert_eq!(snapshot.current_codex, None);
        assert_eq!(snapshot.current_claude.as_deref(), Some("a"));

        let empty = SystemSnapshot::new(vec![mirror("a", "u")], Some(String::new()), None);
        assert_eq!(empty.current_codex, None);
    }

    #[test]
    fn fingerprint_ignores_input_order() {
        let a = SystemSnapshot {
            mirrors: vec![mirror("b", "u2"), mirror("a", "u1")],
            current_codex: None,
            current_claude: None,
        };
        let b = SystemSnapshot {
            mirrors: vec![mirror("a", "u1"), mirror("b", "u2")],
            current_codex: None,
            current_claude: None,
        };
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = SystemSnapshot::new(vec![mirror("a", "u1")], None, None);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn same_settings_ignores_api_key() {
        let a = mirror("a", "https://a");
        let mut b = a.clone();
        b.api_key = "other".to_string();
        assert!(a.same_settings(&b));

        b.model_name = Some("gpt-5".to_string());
        assert!(!a.same_settings(&b));
    }

    #[test]
    fn wire_field_names() {
        let mut m = mirror("a", "https://a");
        m.env_key = Some("MY_KEY".to_string());
        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(value["baseURL"], "https://a");
        assert_eq!(value["apiKey"], "sk-test-key");
        assert_eq!(value["toolType"], "claude");
        assert_eq!(value["envKey"], "MY_KEY");
        assert!(value.get("modelName").is_none());
    }

    #[test]
    fn tool_type_parsing() {
        assert_eq!("codex".parse::<ToolType>().unwrap(), ToolType::Codex);
        assert_eq!("Claude-Code".parse::<ToolType>().unwrap(), ToolType::Claude);
        assert!("gemini".parse::<ToolType>().is_err());
    }

    #[test]
    fn api_key_preview_masks_middle() {
        let m = mirror("a", "u");
        assert_eq!(m.api_key_preview(), "sk-t...-key");
        let short = MirrorProfile::new("b", "u", "short", ToolType::Codex);
        assert_eq!(short.api_key_preview(), "****");
    }
}
