//! 命令行参数定义（clap derive）

use clap::{Args, Parser, Subcommand};
use mirrorsync::models::{LogLevel, PullStrategy, PushStrategy};

/// mirrorsync - Codex / Claude 镜像配置的加密多设备同步
#[derive(Parser)]
#[command(name = "mirrorsync")]
#[command(version)]
#[command(about = "Codex / Claude 镜像配置的加密多设备同步", long_about = None)]
pub struct Cli {
    /// 日志级别（trace/debug/info/warn/error），覆盖配置文件
    #[arg(long, global = true, value_parser = LogLevel::parse)]
    pub log_level: Option<LogLevel>,

    /// 以 JSON 输出结果
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 加密同步
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// 关联远端（指定 blob ID，或自动发现最近的同步配置）
    Init(InitArgs),

    /// 推送本地配置到远端
    Push {
        /// merge(auto) / force / manual
        #[arg(long, short, default_value = "auto")]
        strategy: PushStrategy,
    },

    /// 从远端拉取并合并到本地
    Pull {
        /// merge(auto) / local / remote
        #[arg(long, short, default_value = "auto")]
        strategy: PullStrategy,
    },

    /// 查看同步状态
    Status {
        /// 同时读取远端，显示版本和待处理冲突
        #[arg(long)]
        remote: bool,
    },

    /// 预览远端与本地的差异（不做任何修改）
    Preview,

    /// 修改同步设置
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// 访问令牌（GitHub token 需要 gist 权限）
    #[arg(long, env = "MIRRORSYNC_TOKEN", hide_env_values = true)]
    pub token: String,

    /// 加密密码（所有设备必须相同，至少 8 个字符）
    #[arg(long, env = "MIRRORSYNC_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// 已有的远端 blob ID
    #[arg(long)]
    pub blob_id: Option<String>,

    /// API 地址（GitHub Enterprise 使用），覆盖配置文件
    #[arg(long)]
    pub endpoint: Option<String>,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// 开启或关闭自动同步
    #[arg(long)]
    pub auto_sync: Option<bool>,

    /// 自动同步间隔（分钟）
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub interval: Option<u32>,

    /// 启用同步
    #[arg(long, conflicts_with = "disable")]
    pub enable: bool,

    /// 停用同步（push/pull 将被拒绝）
    #[arg(long)]
    pub disable: bool,

    /// 修改加密密码
    #[arg(long, env = "MIRRORSYNC_NEW_PASSWORD", hide_env_values = true)]
    pub new_password: Option<String>,

    /// 只更新本机保存的密码（其他设备已完成轮换时使用）
    #[arg(long, requires = "new_password")]
    pub local_only: bool,
}
