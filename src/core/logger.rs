use crate::models::config::{LogConfig, LogFormat, LogLevel, LogOutput};
use std::sync::OnceLock;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt,
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// 文件输出的后台写线程 guard，进程存活期间一直持有
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// 初始化日志系统
///
/// 支持：
/// - 日志级别（trace/debug/info/warn/error），`RUST_LOG` 优先
/// - 输出格式（JSON/纯文本）
/// - 输出目标（控制台/文件/both），文件按天滚动
///
/// 级别由 `--log-level` 或配置文件在启动时决定，进程内只能初始化一次。
pub fn init_logger(config: &LogConfig) -> anyhow::Result<()> {
    if INITIALIZED.set(()).is_err() {
        anyhow::bail!("日志系统已初始化，不能重复初始化");
    }
    let filter_layer = create_env_filter(&config.level);

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if matches!(config.output, LogOutput::Console | LogOutput::Both) {
        layers.push(create_console_layer(config.format));
    }

    if matches!(config.output, LogOutput::File | LogOutput::Both) {
        layers.push(create_file_layer(config.format, config.file_path.as_deref())?);
    }

    // 控制台输出走 stderr，stdout 留给命令结果
    Registry::default().with(filter_layer).with(layers).init();

    tracing::debug!(
        level = config.level.as_str(),
        format = ?config.format,
        output = ?config.output,
        file_path = ?config.file_path,
        "日志系统初始化完成"
    );

    Ok(())
}

/// 创建环境过滤器
///
/// 格式：RUST_LOG=debug 或 RUST_LOG=mirrorsync=trace,reqwest=warn
fn create_env_filter(level: &LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// 应用代码使用指定级别，第三方库使用 WARN
fn default_directives(level: &LogLevel) -> String {
    format!(
        "mirrorsync={},hyper=warn,reqwest=warn,h2=warn,rustls=warn",
        level.as_str()
    )
}

fn create_console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(cfg!(debug_assertions))
            .with_thread_ids(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .boxed(),
    }
}

fn create_file_layer(
    format: LogFormat,
    file_path: Option<&str>,
) -> anyhow::Result<BoxedLayer> {
    let log_dir = get_log_dir(file_path)?;
    let file_appender = rolling::daily(log_dir, "mirrorsync.log");
    let (writer, guard) = non_blocking(file_appender);
    let _ = FILE_GUARD.set(guard);

    let layer = match format {
        LogFormat::Text => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .boxed(),
    };
    Ok(layer)
}

/// 获取日志目录
fn get_log_dir(file_path: Option<&str>) -> anyhow::Result<std::path::PathBuf> {
    let dir = match file_path {
        Some(path) => std::path::PathBuf::from(path),
        None => crate::utils::config::config_dir()?.join("logs"),
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| anyhow::anyhow!("无法创建日志目录 {dir:?}: {e}"))?;
    Ok(dir)
}
