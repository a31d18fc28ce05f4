//! 上传目录中的视频文件列表

use crate::core::error::AlignError;
use crate::core::video::source::has_extension;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFileInfo {
    pub name: String,
    pub path: String,
    pub size: u64,
    /// 修改时间（Unix 秒）
    pub modified: u64,
}

pub fn list_videos(dir: impl AsRef<Path>) -> Result<Vec<VideoFileInfo>, AlignError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(AlignError::SourceUnavailable(format!(
            "the directory {} does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut videos = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !has_extension(&path, VIDEO_EXTENSIONS) {
            continue;
        }

        let meta = fs::metadata(&path)?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let absolute = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());

        videos.push(VideoFileInfo {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: absolute.to_string_lossy().into_owned(),
            size: meta.len(),
            modified,
        });
    }

    videos.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(videos)
}
