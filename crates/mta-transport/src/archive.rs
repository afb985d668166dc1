//! 下载包 (ZIP, Stored)
//!
//! 条目名为 `{序号}/{文件名}`，与 CatShare 一致。解压时只取最后一段作为文件名。

use log::{debug, warn};
use mta_core::{ContentRef, FileDescriptor};
use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::Result;

/// 落盘后的文件
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFile {
    /// 发送端给出的文件名
    pub name: String,
    /// 实际写入的路径（重名时带 `_N` 后缀）
    pub path: PathBuf,
    pub size: u64,
}

/// 将任务文件打包
pub fn build_archive(files: &[FileDescriptor]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for (i, file) in files.iter().enumerate() {
        zip.start_file(format!("{}/{}", i, file.name), options)?;
        match &file.content {
            ContentRef::Path(path) => {
                let mut source = File::open(path)?;
                io::copy(&mut source, &mut zip)?;
            }
            ContentRef::Inline(data) => zip.write_all(data)?,
        }
    }

    let buffer = zip.finish()?.into_inner();
    debug!("Built archive: {} file(s), {} bytes", files.len(), buffer.len());
    Ok(buffer)
}

/// 解压到 `output_dir`，每写完一个文件调用一次 `progress(已写入字节)`
pub fn extract_archive(
    data: &[u8],
    output_dir: &Path,
    mut progress: impl FnMut(u64),
) -> Result<Vec<ReceivedFile>> {
    fs::create_dir_all(output_dir)?;
    let mut archive = ZipArchive::new(Cursor::new(data))?;

    let mut written = 0u64;
    let mut files = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        else {
            warn!("Skipping unsafe archive entry {:?}", entry.name());
            continue;
        };

        // 条目头里的大小由对端填写，直接流式写盘
        let path = unique_path(output_dir, &name);
        let size = io::copy(&mut entry, &mut File::create(&path)?)?;

        written += size;
        progress(written);
        debug!("Extracted {} ({} bytes) -> {:?}", name, size, path);

        files.push(ReceivedFile { name, path, size });
    }

    Ok(files)
}

fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem}_{n}.{ext}")),
            None => dir.join(format!("{stem}_{n}")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
