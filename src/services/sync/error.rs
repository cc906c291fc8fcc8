//! 同步错误类型
//!
//! 所有远端/加密/本地存储的失败最终都归到 `SyncError`，调用方通过
//! `SyncError::kind()` 判断类别，不需要关心是否被 `context` 包装过。

use super::crypto::CryptoError;
use crate::core::HttpClientError;
use crate::data::DataError;
use std::time::Duration;
use thiserror::Error;

/// 错误类别（与展示文案无关，用于程序判断）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncErrorKind {
    Validation,
    Authentication,
    NotFound,
    RateLimited,
    Network,
    Decryption,
    ConcurrentModification,
    Conflict,
    Storage,
    Internal,
}

impl SyncErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorKind::Validation => "validation",
            SyncErrorKind::Authentication => "authentication",
            SyncErrorKind::NotFound => "not_found",
            SyncErrorKind::RateLimited => "rate_limited",
            SyncErrorKind::Network => "network",
            SyncErrorKind::Decryption => "decryption",
            SyncErrorKind::ConcurrentModification => "concurrent_modification",
            SyncErrorKind::Conflict => "conflict",
            SyncErrorKind::Storage => "storage",
            SyncErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("参数无效: {0}")]
    Validation(String),

    #[error("认证失败: {0}")]
    Authentication(String),

    #[error("未找到: {0}")]
    NotFound(String),

    #[error("请求过于频繁，已被限流{}", format_retry_after(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("网络错误: {0}")]
    Network(String),

    /// 密码错误、数据被篡改、格式损坏都使用同一条信息
    #[error("解密失败：密码错误或远端数据已损坏")]
    Decryption,

    #[error(
        "远端已被其他设备修改（期望版本 {}，实际版本 {}），请先 pull 后重试",
        .expected.as_deref().unwrap_or("-"),
        .actual.as_deref().unwrap_or("-")
    )]
    ConcurrentModification {
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("存在 {0} 个冲突，需要先处理冲突（使用 merge/force 策略或先 pull）")]
    Conflict(usize),

    #[error("远端还没有同步配置，请先在任意设备上执行 push")]
    NoRemoteConfig,

    #[error("同步尚未初始化，请先执行 init")]
    NotInitialized,

    #[error("本地存储错误: {0}")]
    Storage(#[from] DataError),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("{operation} 失败（blob: {}）: {source}", .blob.as_deref().unwrap_or("-"))]
    Context {
        operation: String,
        blob: Option<String>,
        #[source]
        source: Box<SyncError>,
    },
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!("，请在 {} 秒后重试", d.as_secs().max(1)),
        None => String::new(),
    }
}

impl SyncError {
    /// 错误类别，穿透 `Context` 包装
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::Validation(_) | SyncError::NotInitialized => SyncErrorKind::Validation,
            SyncError::Authentication(_) => SyncErrorKind::Authentication,
            SyncError::NotFound(_) | SyncError::NoRemoteConfig => SyncErrorKind::NotFound,
            SyncError::RateLimited { .. } => SyncErrorKind::RateLimited,
            SyncError::Network(_) => SyncErrorKind::Network,
            SyncError::Decryption => SyncErrorKind::Decryption,
            SyncError::ConcurrentModification { .. } => SyncErrorKind::ConcurrentModification,
            SyncError::Conflict(_) => SyncErrorKind::Conflict,
            SyncError::Storage(_) => SyncErrorKind::Storage,
            SyncError::Internal(_) => SyncErrorKind::Internal,
            SyncError::Context { source, .. } => source.kind(),
        }
    }

    /// 去掉所有 `Context` 包装后的原始错误
    pub fn root(&self) -> &SyncError {
        match self {
            SyncError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// 附加操作名和 blob ID，类别保持不变
    pub fn context(self, operation: impl Into<String>, blob: Option<&str>) -> Self {
        SyncError::Context {
            operation: operation.into(),
            blob: blob.map(str::to_string),
            source: Box::new(self),
        }
    }

    pub fn is_concurrent_modification(&self) -> bool {
        self.kind() == SyncErrorKind::ConcurrentModification
    }

    /// 远端是否确实不存在同步配置
    pub fn is_not_found(&self) -> bool {
        self.kind() == SyncErrorKind::NotFound
    }
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Decryption => SyncError::Decryption,
            CryptoError::InvalidParams(msg) => SyncError::Validation(msg),
            CryptoError::Encryption(msg) => SyncError::Internal(msg),
        }
    }
}

impl From<HttpClientError> for SyncError {
    fn from(err: HttpClientError) -> Self {
        match err {
            HttpClientError::InvalidProxy(_) => SyncError::Validation(err.to_string()),
            HttpClientError::Build(_) => SyncError::Internal(err.to_string()),
        }
    }
}

/// 扩展 trait：给 `Result<T, SyncError>` 附加上下文
pub trait SyncResultExt<T> {
    fn with_operation(self, operation: &str, blob: Option<&str>) -> SyncResult<T>;
}

impl<T> SyncResultExt<T> for SyncResult<T> {
    fn with_operation(self, operation: &str, blob: Option<&str>) -> SyncResult<T> {
        self.map_err(|e| e.context(operation, blob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_survives_context() {
        let err = SyncError::ConcurrentModification {
            expected: Some("r1".to_string()),
            actual: Some("r2".to_string()),
        }
        .context("push", Some("blob-1"))
        .context("auto sync", None);

        assert_eq!(err.kind(), SyncErrorKind::ConcurrentModification);
        assert!(err.is_concurrent_modification());
        assert!(matches!(err.root(), SyncError::ConcurrentModification { .. }));

        let message = err.to_string();
        assert!(message.contains("push"));
        assert!(message.contains("blob-1"));
    }

    #[test]
    fn sentinel_variants_map_to_base_kinds() {
        assert_eq!(SyncError::NoRemoteConfig.kind(), SyncErrorKind::NotFound);
        assert_eq!(SyncError::NotInitialized.kind(), SyncErrorKind::Validation);
    }

    #[test]
    fn rate_limited_message_includes_delay() {
        let err = SyncError::RateLimited {
            retry_after: Some(Duration::from_secs(42)),
        };
        assert!(err.to_string().contains("42"));

        let err = SyncError::RateLimited { retry_after: None };
        assert!(!err.to_string().contains("秒"));
    }

    #[test]
    fn crypto_errors_convert() {
        let err: SyncError = CryptoError::Decryption.into();
        assert_eq!(err.kind(), SyncErrorKind::Decryption);

        let err: SyncError = CryptoError::InvalidParams("memory".to_string()).into();
        assert_eq!(err.kind(), SyncErrorKind::Validation);
    }

    #[test]
    fn storage_errors_convert() {
        let err: SyncError = DataError::NotFound("mirrors.json".to_string()).into();
        assert_eq!(err.kind(), SyncErrorKind::Storage);
    }

    #[test]
    fn result_ext_wraps_errors_only() {
        let ok: SyncResult<u8> = Ok(1);
        assert_eq!(ok.with_operation("pull", None).unwrap(), 1);

        let err: SyncResult<u8> = Err(SyncError::Decryption);
        let wrapped = err.with_operation("pull", Some("b")).unwrap_err();
        assert!(matches!(wrapped, SyncError::Context { .. }));
        assert_eq!(wrapped.kind(), SyncErrorKind::Decryption);
    }
}
