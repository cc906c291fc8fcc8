use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("mirrorsync/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("代理 URL 无效: {0}")]
    InvalidProxy(String),
    #[error("构建 HTTP 客户端失败: {0}")]
    Build(String),
}

/// 构建 HTTP 客户端
///
/// # 参数
/// - `timeout`: 单次请求的总超时
/// - `proxy_url`: 可选代理（http/https/socks5/socks5h）
pub fn build_http_client(
    timeout: Duration,
    proxy_url: Option<&str>,
) -> Result<Client, HttpClientError> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(5));

    if let Some(url) = proxy_url.map(str::trim).filter(|u| !u.is_empty()) {
        let proxy = reqwest::Proxy::all(url).map_err(|e| {
            // 为 SOCKS5 提供更友好的错误说明
            if url.starts_with("socks5") {
                HttpClientError::InvalidProxy(format!(
                    "{e}；若需要远程 DNS 解析，建议使用 socks5h://"
                ))
            } else {
                HttpClientError::InvalidProxy(e.to_string())
            }
        })?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| HttpClientError::Build(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_without_proxy() {
        assert!(build_http_client(Duration::from_secs(5), None).is_ok());
    }

    #[test]
    fn test_blank_proxy_is_ignored() {
        assert!(build_http_client(Duration::from_secs(5), Some("  ")).is_ok());
    }

    #[test]
    fn test_build_with_http_proxy() {
        let client = build_http_client(Duration::from_secs(5), Some("http://127.0.0.1:8080"));
        assert!(client.is_ok());
    }

    #[test]
    fn test_invalid_proxy_url() {
        let err = build_http_client(Duration::from_secs(5), Some("not a url")).unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidProxy(_)));
    }
}
