//! GitHub Gist 远端存储
//!
//! 每个同步配置是一个 secret gist，只包含一个文件 `mirrorsync.enc.json`，
//! 描述中带发现标签。gist 的版本号取 `history[0].version`。
//!
//! Gist API 没有原生的 compare-and-swap：`update` 会在写入前重新读取一次并比较版本，
//! 只能缩小而不能消除并发窗口。

use super::{
    sort_newest_first, BlobSummary, CreatedBlob, RemoteBlob, RemoteConnector, RemoteCredentials,
    RemoteStore,
};
use crate::core::build_http_client;
use crate::services::sync::error::{SyncError, SyncResult};
use crate::utils::content_checksum;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// gist 中保存 bundle 的文件名
pub const BLOB_FILE_NAME: &str = "mirrorsync.enc.json";

const GITHUB_API_VERSION: &str = "2022-11-28";
const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGES: u32 = 10;

#[derive(Debug, Deserialize)]
struct Gist {
    id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    files: HashMap<String, GistFile>,
    #[serde(default)]
    history: Vec<GistHistory>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    raw_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GistHistory {
    version: String,
}

impl Gist {
    fn revision(&self) -> SyncResult<String> {
        if let Some(entry) = self.history.first() {
            return Ok(entry.version.clone());
        }
        // 部分 GitHub Enterprise 版本不返回 history
        self.updated_at
            .map(|t| t.to_rfc3339())
            .ok_or_else(|| SyncError::Network(format!("gist {} 缺少版本信息", self.id)))
    }

    fn has_blob_file(&self) -> bool {
        self.files.contains_key(BLOB_FILE_NAME)
    }
}

pub struct GistClient {
    client: Client,
    base_url: String,
    token: String,
    page_size: u32,
    /// blob ID -> 最近一次读到的内容哈希，调用方不提供版本号时用于比较
    last_seen: Mutex<HashMap<String, String>>,
}

impl GistClient {
    pub fn new(
        endpoint: &str,
        token: &str,
        timeout: Duration,
        proxy_url: Option<&str>,
    ) -> SyncResult<Self> {
        let client = build_http_client(timeout, proxy_url)?;
        Self::with_client(client, endpoint, token)
    }

    pub fn with_client(client: Client, endpoint: &str, token: &str) -> SyncResult<Self> {
        let base_url = validate_endpoint(endpoint)?;
        if token.trim().is_empty() {
            return Err(SyncError::Validation("访问令牌不能为空".to_string()));
        }
        Ok(Self {
            client,
            base_url,
            token: token.trim().to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            last_seen: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        self
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }

    fn gist_url(&self, blob_id: &str) -> String {
        format!("{}/gists/{}", self.base_url, blob_id)
    }

    async fn send(&self, builder: RequestBuilder) -> SyncResult<Response> {
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &headers, &body))
    }

    async fn read_gist(&self, blob_id: &str) -> SyncResult<Gist> {
        let response = self
            .send(self.request(Method::GET, &self.gist_url(blob_id)))
            .await?;
        parse_json(response).await
    }

    /// 读取 bundle 文件内容；内容被截断时从 raw_url 读取完整内容
    async fn read_blob_file(&self, gist: &Gist) -> SyncResult<String> {
        let file = gist.files.get(BLOB_FILE_NAME).ok_or_else(|| {
            SyncError::NotFound(format!("gist {} 中没有 {BLOB_FILE_NAME}", gist.id))
        })?;

        match (&file.content, file.truncated, &file.raw_url) {
            (Some(content), false, _) => Ok(content.clone()),
            (_, _, Some(raw_url)) => {
                tracing::debug!(blob_id = %gist.id, "gist 文件被截断，读取 raw_url");
                // 令牌只发给 API 所在的主机
                let builder = if same_origin(&self.base_url, raw_url) {
                    self.request(Method::GET, raw_url)
                } else {
                    self.client.get(raw_url)
                };
                let response = self.send(builder).await?;
                response
                    .text()
                    .await
                    .map_err(|e| SyncError::Network(format!("读取 raw 内容失败: {e}")))
            }
            _ => Err(SyncError::Network(format!(
                "gist {} 的文件内容不完整且没有 raw_url",
                gist.id
            ))),
        }
    }

    fn remember(&self, blob_id: &str, content: &str) {
        if let Ok(mut seen) = self.last_seen.lock() {
            seen.insert(blob_id.to_string(), content_checksum(content.as_bytes()));
        }
    }

    fn remembered(&self, blob_id: &str) -> Option<String> {
        self.last_seen.lock().ok()?.get(blob_id).cloned()
    }
}

#[async_trait]
impl RemoteStore for GistClient {
    async fn create(&self, content: &str, description: &str) -> SyncResult<CreatedBlob> {
        let body = json!({
            "description": description,
            "public": false,
            "files": { BLOB_FILE_NAME: { "content": content } },
        });
        let response = self
            .send(
                self.request(Method::POST, &format!("{}/gists", self.base_url))
                    .json(&body),
            )
            .await?;
        let gist: Gist = parse_json(response).await?;
        let revision = gist.revision()?;
        self.remember(&gist.id, content);

        tracing::info!(blob_id = %gist.id, revision = %revision, "已创建同步 gist");
        Ok(CreatedBlob {
            id: gist.id,
            revision,
        })
    }

    async fn update(
        &self,
        blob_id: &str,
        content: &str,
        expected_revision: Option<&str>,
    ) -> SyncResult<String> {
        let current = self.read_gist(blob_id).await?;
        let actual = current.revision()?;

        match expected_revision {
            Some(expected) if expected != actual => {
                tracing::warn!(blob_id, expected, actual = %actual, "远端版本已变化，放弃写入");
                return Err(SyncError::ConcurrentModification {
                    expected: Some(expected.to_string()),
                    actual: Some(actual),
                });
            }
            Some(_) => {}
            None => {
                if let Some(known_hash) = self.remembered(blob_id) {
                    let remote_content = self.read_blob_file(&current).await?;
                    if content_checksum(remote_content.as_bytes()) != known_hash {
                        tracing::warn!(blob_id, actual = %actual, "远端内容已变化，放弃写入");
                        return Err(SyncError::ConcurrentModification {
                            expected: None,
                            actual: Some(actual),
                        });
                    }
                }
            }
        }

        let body = json!({ "files": { BLOB_FILE_NAME: { "content": content } } });
        let response = self
            .send(self.request(Method::PATCH, &self.gist_url(blob_id)).json(&body))
            .await?;
        let gist: Gist = parse_json(response).await?;
        let revision = gist.revision()?;
        self.remember(blob_id, content);

        tracing::debug!(blob_id, previous = %actual, revision = %revision, "gist 已更新");
        Ok(revision)
    }

    async fn fetch(&self, blob_id: &str) -> SyncResult<RemoteBlob> {
        let gist = self.read_gist(blob_id).await?;
        let revision = gist.revision()?;
        let content = self.read_blob_file(&gist).await?;
        self.remember(blob_id, &content);

        Ok(RemoteBlob {
            id: gist.id,
            content,
            revision,
            updated_at: gist.updated_at,
        })
    }

    async fn discover(&self, tag: &str) -> SyncResult<Vec<BlobSummary>> {
        let mut candidates = Vec::new();

        for page in 1..=MAX_PAGES {
            let url = format!(
                "{}/gists?per_page={}&page={}",
                self.base_url, self.page_size, page
            );
            let response = self.send(self.request(Method::GET, &url)).await?;
            let gists: Vec<Gist> = parse_json(response).await?;
            let page_len = gists.len();

            candidates.extend(
                gists
                    .into_iter()
                    .filter(|g| g.has_blob_file())
                    .filter(|g| g.description.as_deref().unwrap_or("").contains(tag))
                    .map(|g| BlobSummary {
                        id: g.id,
                        description: g.description.unwrap_or_default(),
                        updated_at: g.updated_at,
                    }),
            );

            if page_len < self.page_size as usize {
                break;
            }
        }

        sort_newest_first(&mut candidates);
        tracing::debug!(count = candidates.len(), tag, "discover 完成");
        Ok(candidates)
    }
}

/// 生产环境使用的连接器
#[derive(Debug, Clone)]
pub struct GistConnector {
    timeout: Duration,
    proxy_url: Option<String>,
}

impl GistConnector {
    pub fn new(timeout: Duration, proxy_url: Option<String>) -> Self {
        Self { timeout, proxy_url }
    }
}

impl RemoteConnector for GistConnector {
    fn connect(&self, credentials: &RemoteCredentials) -> SyncResult<Box<dyn RemoteStore>> {
        match credentials.provider.to_lowercase().as_str() {
            "github" | "gist" => {}
            other => {
                return Err(SyncError::Validation(format!(
                    "不支持的同步服务: {other}（目前只支持 github）"
                )))
            }
        }
        let client = GistClient::new(
            &credentials.endpoint,
            &credentials.token,
            self.timeout,
            self.proxy_url.as_deref(),
        )?;
        Ok(Box::new(client))
    }
}

/// 校验并规范化 API 地址（去掉末尾的 `/`）
pub fn validate_endpoint(endpoint: &str) -> SyncResult<String> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let url = url::Url::parse(trimmed)
        .map_err(|e| SyncError::Validation(format!("API 地址无效: {endpoint}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        scheme => Err(SyncError::Validation(format!(
            "API 地址必须是 http/https，当前为 {scheme}"
        ))),
    }
}

/// scheme、主机和端口都相同才算同源
fn same_origin(base: &str, other: &str) -> bool {
    match (url::Url::parse(base), url::Url::parse(other)) {
        (Ok(a), Ok(b)) => {
            a.scheme() == b.scheme()
                && a.host_str() == b.host_str()
                && a.port_or_known_default() == b.port_or_known_default()
        }
        _ => false,
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> SyncResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| SyncError::Network(format!("解析响应失败: {e}")))
}

fn map_transport_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Network(format!("请求超时: {err}"))
    } else if err.is_connect() {
        SyncError::Network(format!("无法连接远端: {err}"))
    } else {
        SyncError::Network(err.to_string())
    }
}

/// 把非 2xx 响应映射为同步错误
fn map_status(status: StatusCode, headers: &HeaderMap, body: &str) -> SyncError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| status.to_string());

    let quota_exhausted = header_str(headers, "x-ratelimit-remaining") == Some("0");
    let secondary_limit = message.to_lowercase().contains("rate limit");

    match status.as_u16() {
        429 => SyncError::RateLimited {
            retry_after: retry_after(headers),
        },
        403 if quota_exhausted || secondary_limit => SyncError::RateLimited {
            retry_after: retry_after(headers),
        },
        401 | 403 => SyncError::Authentication(message),
        404 => SyncError::NotFound(message),
        409 | 412 => SyncError::ConcurrentModification {
            expected: None,
            actual: None,
        },
        400 | 422 => SyncError::Validation(message),
        _ => SyncError::Network(format!("HTTP {}: {message}", status.as_u16())),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// 优先使用 `retry-after`（秒），其次根据 `x-ratelimit-reset`（Unix 时间戳）计算
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(secs) = header_str(headers, "retry-after").and_then(|v| v.parse::<u64>().ok()) {
        return Some(Duration::from_secs(secs));
    }
    let reset = header_str(headers, "x-ratelimit-reset")?.parse::<i64>().ok()?;
    let wait = reset - Utc::now().timestamp();
    Some(Duration::from_secs(wait.max(0) as u64))
}
