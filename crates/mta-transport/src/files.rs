//! 本地文件 → [`FileDescriptor`]

use mta_core::FileDescriptor;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// 读取文件大小并猜测 MIME 类型
pub async fn describe_paths(paths: &[PathBuf]) -> Result<Vec<FileDescriptor>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let metadata = tokio::fs::metadata(path).await?;
        files.push(FileDescriptor::from_path(
            file_name(path),
            metadata.len(),
            guess_mime(path),
            path.clone(),
        ));
    }
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}
