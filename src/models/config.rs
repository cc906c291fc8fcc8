// 全局配置结构，放在 models 以便在库和二进制之间共享
use serde::{Deserialize, Serialize};

/// 默认的 gist API 地址
pub const DEFAULT_GIST_ENDPOINT: &str = "https://api.github.com";

/// 默认网络超时（秒）
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub sync: SyncSettings,
}

/// 同步相关的可调参数（不含任何密钥）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub proxy_url: Option<String>, // "http://", "https://", "socks5://"
    /// 并发修改时是否自动重新拉取合并一次
    #[serde(default = "default_retry_on_conflict")]
    pub retry_on_conflict: bool,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_endpoint() -> String {
    DEFAULT_GIST_ENDPOINT.to_string()
}

fn default_retry_on_conflict() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            endpoint: default_endpoint(),
            proxy_url: None,
            retry_on_conflict: true,
        }
    }
}

// ==================== 日志配置 ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// 解析字符串为日志级别
    pub fn parse(level_str: &str) -> Result<Self, String> {
        match level_str.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("无效的日志级别: {level_str}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub output: LogOutput,
    /// 日志目录，未设置时使用 `<config_dir>/logs`
    #[serde(default)]
    pub file_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.sync, SyncSettings::default());
        assert_eq!(config.log, LogConfig::default());
        assert_eq!(config.sync.endpoint, DEFAULT_GIST_ENDPOINT);
        assert!(config.sync.retry_on_conflict);
    }

    #[test]
    fn partial_sync_settings() {
        let config: AppConfig =
            serde_json::from_str(r#"{"sync": {"timeout_secs": 5}, "log": {"level": "debug"}}"#)
                .unwrap();
        assert_eq!(config.sync.timeout_secs, 5);
        assert_eq!(config.sync.endpoint, DEFAULT_GIST_ENDPOINT);
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.log.output, LogOutput::Console);
    }

    #[test]
    fn parse_log_level() {
        assert_eq!(LogLevel::parse("WARN").unwrap(), LogLevel::Warn);
        assert!(LogLevel::parse("verbose").is_err());
    }
}
