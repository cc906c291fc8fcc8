//! 核心基础设施层
//!
//! - `logger`: tracing 日志初始化
//! - `http`: 统一的 HTTP 客户端构建

pub mod http;
pub mod logger;

pub use http::{build_http_client, HttpClientError};
pub use logger::init_logger;
