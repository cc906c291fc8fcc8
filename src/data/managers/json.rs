//! JSON 文件管理器
//!
//! 本地配置只有几个小文件，不做缓存。写入流程：
//! - 自动创建父目录
//! - 同目录下先写临时文件、`sync_all` 后再 `rename`，崩溃时不会留下半个文件
//! - 通过同名 `.lock` 文件加排他锁，串行化多个进程的写入
//! - Unix 权限设置为 0o600（文件里有 token 和 API Key）

use crate::data::{DataError, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonManager;

impl JsonManager {
    pub fn new() -> Self {
        Self
    }

    /// 读取并反序列化；文件不存在时返回 `Ok(None)`
    pub fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
        let value = serde_json::from_str(&content)?;
        Ok(Some(value))
    }

    /// 原子写入整个 JSON 文件（格式化输出）
    pub fn write<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent).map_err(|e| DataError::io(&parent, e))?;

        let content = serde_json::to_string_pretty(value)?;

        let _lock = acquire_lock(path)?;

        let tmp_path = temp_path_for(path);
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(|e| DataError::io(&tmp_path, e))?;
            set_permissions(&tmp_path)?;
            file.write_all(content.as_bytes())
                .map_err(|e| DataError::io(&tmp_path, e))?;
            file.sync_all().map_err(|e| DataError::io(&tmp_path, e))?;
        }

        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(DataError::io(path, e));
        }

        // 锁在 _lock drop 时自动释放
        Ok(())
    }
}

/// 获取排他锁（阻塞等待其他写操作完成）
fn acquire_lock(path: &Path) -> Result<File> {
    let lock_path = path.with_extension("lock");
    let lock_file = File::create(&lock_path).map_err(|e| DataError::io(&lock_path, e))?;
    lock_file
        .lock_exclusive()
        .map_err(|e| DataError::Concurrency(format!("获取文件锁失败: {lock_path:?}: {e}")))?;
    Ok(lock_file)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data.json".to_string());
    path.with_file_name(format!(".{file_name}.tmp"))
}

/// 设置文件权限（Unix 平台 0o600）
#[cfg(unix)]
fn set_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = fs::metadata(path).map_err(|e| DataError::io(path, e))?;
    let mut perms = metadata.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms).map_err(|e| DataError::io(path, e))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
