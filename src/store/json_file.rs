//! 整文档 JSON 读写辅助函数。
//!
//! 每次保存都会重写整个文档：先写入同目录下的临时文件，再 rename 覆盖目标，
//! 文件系统支持原子 rename 时不会留下写了一半的文档。临时文件名带随机后缀，
//! 同一文档的并发写入互不干扰，最后一次 rename 的内容胜出。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

/// 读取 JSON 文档；文件不存在时返回 `None`。
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> ChatResult<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ChatError::io(path, err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ChatError::json(path, e))
}

/// 以两空格缩进写入 JSON 文档，必要时创建父目录。
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> ChatResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent).await?;
    }
    let json = serde_json::to_vec_pretty(value).map_err(|e| ChatError::json(path, e))?;
    let tmp = temp_path(path);
    if let Err(err) = fs::write(&tmp, json).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(ChatError::io(&tmp, err));
    }
    if let Err(err) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(ChatError::io(path, err));
    }
    Ok(())
}

pub async fn ensure_dir(path: &Path) -> ChatResult<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| ChatError::io(path, e))
}

pub async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// 删除目录（不存在时忽略）。
pub async fn remove_dir_if_exists(path: &Path) -> ChatResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ChatError::io(path, err)),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    path.with_file_name(name)
}
