// 同步相关命令

use crate::cli::{ConfigArgs, InitArgs, SyncCommands};
use anyhow::{Context, Result};
use mirrorsync::models::{
    AppConfig, Conflict, LinkSource, PullReport, PushReport, SyncPreview, SyncState, SyncStatus,
};
use mirrorsync::services::local_store::FileConfigStore;
use mirrorsync::services::sync::{RotateMode, SyncOptions, SyncOrchestrator};
use serde::Serialize;

// ==================== 辅助函数 ====================

fn build_orchestrator(
    config: &AppConfig,
    endpoint_override: Option<&str>,
) -> Result<SyncOrchestrator<FileConfigStore>> {
    let store = FileConfigStore::new().context("打开本地配置目录失败")?;
    let mut options = SyncOptions::from_settings(&config.sync);
    if let Some(endpoint) = endpoint_override {
        options.endpoint = endpoint.to_string();
    }
    Ok(SyncOrchestrator::with_gist(store, options))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn describe_conflict(conflict: &Conflict) -> String {
    let url = |c: &Option<mirrorsync::models::MirrorProfile>| {
        c.as_ref()
            .map(|m| m.base_url.clone())
            .unwrap_or_else(|| "-".to_string())
    };
    format!(
        "  [{}] {}  本地: {}  远端: {}",
        conflict.kind,
        conflict.profile_name,
        url(&conflict.local_value),
        url(&conflict.remote_value)
    )
}

fn print_conflicts(conflicts: &[Conflict]) {
    for conflict in conflicts {
        println!("{}", describe_conflict(conflict));
    }
}

// ==================== 命令入口 ====================

pub async fn run_sync(command: SyncCommands, config: &AppConfig, json: bool) -> Result<()> {
    match command {
        SyncCommands::Init(args) => init(args, config, json).await,
        SyncCommands::Push { strategy } => {
            let report = build_orchestrator(config, None)?.push(strategy).await?;
            if json {
                return print_json(&report);
            }
            print_push(&report);
            Ok(())
        }
        SyncCommands::Pull { strategy } => {
            let report = build_orchestrator(config, None)?.pull(strategy).await?;
            if json {
                return print_json(&report);
            }
            print_pull(&report);
            Ok(())
        }
        SyncCommands::Status { remote } => {
            let status = build_orchestrator(config, None)?.status(remote).await?;
            if json {
                return print_json(&status);
            }
            print_status(&status);
            Ok(())
        }
        SyncCommands::Preview => {
            let preview = build_orchestrator(config, None)?.preview().await?;
            print_preview(&preview, json)
        }
        SyncCommands::Config(args) => configure(args, config).await,
    }
}

async fn init(args: InitArgs, config: &AppConfig, json: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config, args.endpoint.as_deref())?;
    let report = orchestrator
        .init(&args.token, &args.password, args.blob_id.as_deref())
        .await?;

    if json {
        return print_json(&report);
    }
    println!("✅ 同步已初始化");
    println!("设备 ID: {}", report.device_id);
    match report.link_source {
        LinkSource::Existing | LinkSource::Discovered => {
            println!("远端配置: {}", report.remote_blob_id.unwrap_or_default());
            if report.link_source == LinkSource::Discovered {
                println!("提示: 执行 `mirrorsync sync pull` 获取远端配置（届时验证密码）");
            }
        }
        LinkSource::Pending => {
            println!("远端暂无同步配置，首次 `mirrorsync sync push` 时会自动创建");
        }
    }
    Ok(())
}

async fn configure(args: ConfigArgs, config: &AppConfig) -> Result<()> {
    let orchestrator = build_orchestrator(config, None)?;
    let mut changed = false;

    if args.enable || args.disable {
        orchestrator.set_enabled(args.enable)?;
        changed = true;
    }

    if args.auto_sync.is_some() || args.interval.is_some() {
        let current = orchestrator.status(false).await?;
        let enabled = args.auto_sync.unwrap_or(current.auto_sync);
        orchestrator.set_auto_sync(enabled, args.interval)?;
        changed = true;
    }

    if let Some(new_password) = args.new_password.as_deref() {
        let mode = if args.local_only {
            RotateMode::LocalOnly
        } else {
            RotateMode::ReencryptRemote
        };
        orchestrator.rotate_password(new_password, mode).await?;
        println!("✅ 加密密码已更新");
        changed = true;
    }

    if !changed {
        println!("没有需要修改的设置，当前状态：");
    }
    print_status(&orchestrator.status(false).await?);
    Ok(())
}

// ==================== 输出 ====================

fn print_push(report: &PushReport) {
    if report.created {
        println!("✅ 已创建远端同步配置 {}", report.blob_id);
    } else {
        println!("✅ 推送完成（策略: {}）", report.strategy);
    }
    println!("版本: {}  镜像数: {}", report.revision, report.profile_count);
    if report.retried {
        println!("⚠️  推送期间远端被其他设备修改，已重新合并后写入");
    }
    if !report.conflicts.is_empty() {
        println!("已合并 {} 处差异：", report.conflicts.len());
        print_conflicts(&report.conflicts);
    }
}

fn print_pull(report: &PullReport) {
    if report.changed {
        println!("✅ 拉取完成（策略: {}），本地配置已更新", report.strategy);
    } else {
        println!("✅ 拉取完成，本地配置已是最新");
    }
    println!(
        "版本: {}  写入设备: {}  镜像数: {}",
        report.revision, report.writer_device_id, report.profile_count
    );
    if !report.conflicts.is_empty() {
        println!("处理了 {} 处差异：", report.conflicts.len());
        print_conflicts(&report.conflicts);
    }
}

fn print_status(status: &SyncStatus) {
    if status.state == SyncState::Uninitialized {
        println!("同步未初始化，请执行 `mirrorsync sync init`");
        return;
    }

    let or_dash = |v: Option<&str>| v.unwrap_or("-").to_string();
    println!("服务: {}", or_dash(status.provider.as_deref()));
    println!("地址: {}", or_dash(status.endpoint.as_deref()));
    println!("远端配置: {}", or_dash(status.remote_blob_id.as_deref()));
    println!("设备 ID: {}", or_dash(status.device_id.as_deref()));
    println!("同步开关: {}", if status.enabled { "启用" } else { "停用" });
    println!(
        "自动同步: {}（间隔 {} 分钟）",
        if status.auto_sync { "开启" } else { "关闭" },
        status.sync_interval_minutes.unwrap_or_default()
    );
    println!("最后版本: {}", or_dash(status.last_known_revision.as_deref()));
    println!(
        "最后同步: {}",
        status
            .last_sync_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    );

    if let Some(remote) = &status.remote {
        println!(
            "远端版本: {}{}",
            remote.revision,
            if remote.up_to_date { "（已同步）" } else { "（有更新）" }
        );
        println!(
            "远端写入: {} @ {}",
            remote.writer_device_id,
            remote.written_at_utc.to_rfc3339()
        );
        if !remote.conflicts.is_empty() {
            println!("待处理差异 {} 处：", status.pending_conflicts());
            print_conflicts(&remote.conflicts);
        }
    }
}

fn print_preview(preview: &SyncPreview, json: bool) -> Result<()> {
    let resolution = &preview.resolution;
    let pending_local = resolution.pending_local();

    if json {
        return print_json(&serde_json::json!({
            "blobId": preview.blob_id,
            "remoteRevision": preview.remote_revision,
            "writerDeviceId": preview.writer_device_id,
            "writtenAtUtc": preview.written_at_utc,
            "conflicts": resolution.conflicts,
            "pendingLocal": pending_local,
            "requiresConfirmation": resolution.requires_confirmation(),
        }));
    }

    println!(
        "远端配置 {}（版本 {}，由 {} 写入）",
        preview.blob_id, preview.remote_revision, preview.writer_device_id
    );
    if !resolution.has_conflicts() && pending_local.is_empty() {
        println!("✅ 本地与远端一致");
        return Ok(());
    }
    if resolution.has_conflicts() {
        println!("差异 {} 处：", resolution.conflicts.len());
        print_conflicts(&resolution.conflicts);
    }
    if !pending_local.is_empty() {
        println!("仅本地存在、尚未推送 {} 个：", pending_local.len());
        print_conflicts(&pending_local);
    }
    if resolution.requires_confirmation() {
        println!("⚠️  存在会覆盖本地修改的差异，请选择 pull 策略（merge/local/remote）后再同步");
    }
    Ok(())
}
