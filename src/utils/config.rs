use crate::data::JsonManager;
use crate::models::AppConfig;
use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;
use std::path::PathBuf;

/// 覆盖配置目录的环境变量（测试和便携安装使用）
pub const CONFIG_DIR_ENV: &str = "MIRRORSYNC_CONFIG_DIR";

const CONFIG_DIR_NAME: &str = ".mirrorsync";
const APP_CONFIG_FILE: &str = "config.json";

/// mirrorsync 配置目录 (~/.mirrorsync)，若不存在则创建
pub fn config_dir() -> Result<PathBuf> {
    let dir = match env::var_os(CONFIG_DIR_ENV) {
        Some(custom) if !custom.is_empty() => PathBuf::from(custom),
        _ => dirs::home_dir()
            .ok_or_else(|| anyhow!("无法获取用户主目录"))?
            .join(CONFIG_DIR_NAME),
    };
    if !dir.exists() {
        fs::create_dir_all(&dir).with_context(|| format!("创建配置目录失败: {dir:?}"))?;
    }
    Ok(dir)
}

/// 全局配置文件路径
pub fn app_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(APP_CONFIG_FILE))
}

/// 读取全局配置，文件不存在时返回默认值
pub fn read_app_config() -> Result<AppConfig> {
    let path = app_config_path()?;
    let config = JsonManager::new()
        .read::<AppConfig>(&path)
        .with_context(|| format!("读取配置失败: {path:?}"))?;
    Ok(config.unwrap_or_default())
}

pub fn write_app_config(config: &AppConfig) -> Result<()> {
    let path = app_config_path()?;
    JsonManager::new()
        .write(&path, config)
        .with_context(|| format!("写入配置失败: {path:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    struct TempEnvGuard {
        previous: Option<String>,
    }

    impl TempEnvGuard {
        fn new(dir: &TempDir) -> Self {
            let previous = env::var(CONFIG_DIR_ENV).ok();
            env::set_var(CONFIG_DIR_ENV, dir.path());
            Self { previous }
        }
    }

    impl Drop for TempEnvGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(val) => env::set_var(CONFIG_DIR_ENV, val),
                None => env::remove_var(CONFIG_DIR_ENV),
            }
        }
    }

    #[test]
    #[serial]
    fn config_dir_honours_env_override() -> Result<()> {
        let temp = TempDir::new()?;
        let _guard = TempEnvGuard::new(&temp);
        assert_eq!(config_dir()?, temp.path());
        Ok(())
    }

    #[test]
    #[serial]
    fn missing_config_file_yields_defaults() -> Result<()> {
        let temp = TempDir::new()?;
        let _guard = TempEnvGuard::new(&temp);
        let config = read_app_config()?;
        assert_eq!(config.sync, crate::models::SyncSettings::default());
        Ok(())
    }

    #[test]
    #[serial]
    fn write_then_read_app_config() -> Result<()> {
        let temp = TempDir::new()?;
        let _guard = TempEnvGuard::new(&temp);

        let mut config = AppConfig::default();
        config.sync.timeout_secs = 7;
        config.sync.proxy_url = Some("socks5h://127.0.0.1:1080".to_string());
        write_app_config(&config)?;

        let loaded = read_app_config()?;
        assert_eq!(loaded.sync.timeout_secs, 7);
        assert_eq!(loaded.sync.proxy_url, config.sync.proxy_url);
        Ok(())
    }
}
