//! mirrorsync 命令行入口

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use mirrorsync::core::init_logger;
use mirrorsync::services::sync::{SyncError, SyncErrorKind};
use mirrorsync::utils::config::read_app_config;
use std::process::ExitCode;

/// 按错误类别给出退出码，便于脚本判断
fn exit_code(err: &anyhow::Error) -> u8 {
    let Some(sync_err) = err.downcast_ref::<SyncError>() else {
        return 1;
    };
    match sync_err.kind() {
        SyncErrorKind::Validation => 2,
        SyncErrorKind::Authentication => 3,
        SyncErrorKind::NotFound => 4,
        SyncErrorKind::RateLimited => 5,
        SyncErrorKind::Network => 6,
        SyncErrorKind::Decryption => 7,
        SyncErrorKind::ConcurrentModification | SyncErrorKind::Conflict => 8,
        SyncErrorKind::Storage => 9,
        SyncErrorKind::Internal => 1,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = read_app_config()?;
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    init_logger(&config.log)?;
    tracing::debug!(
        endpoint = %config.sync.endpoint,
        timeout_secs = config.sync.timeout_secs,
        "配置已加载"
    );

    match cli.command {
        Commands::Sync { command } => commands::run_sync(command, &config, cli.json).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "命令执行失败");
            eprintln!("❌ {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}
