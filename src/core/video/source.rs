//! 视频解码能力
//!
//! 解码严格按顺序进行，不支持随机访问或回退。

use crate::core::error::AlignError;
use crate::core::video::frame::RawFrame;
use image::RgbImage;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff"];

pub trait VideoSource: Send {
    /// 解码下一帧。`Ok(None)` 表示流结束，`Err` 表示中途解码失败
    fn next_frame(&mut self) -> Result<Option<RgbImage>, AlignError>;
}

impl<T: VideoSource + ?Sized> VideoSource for Box<T> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, AlignError> {
        (**self).next_frame()
    }
}

/// 内存帧序列，用于测试和由原生层推送帧的场景
#[derive(Default)]
pub struct MemorySource {
    frames: VecDeque<RgbImage>,
    fail_at: Option<usize>,
    decoded: usize,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames: frames.into(),
            fail_at: None,
            decoded: 0,
        }
    }

    /// 第 `position` 次解码（0 起）返回错误
    pub fn with_failure_at(mut self, position: usize) -> Self {
        self.fail_at = Some(position);
        self
    }

    pub fn push(&mut self, frame: RgbImage) {
        self.frames.push_back(frame);
    }

    pub fn push_raw(&mut self, frame: &RawFrame) {
        self.frames.push_back(frame.to_rgb());
    }

    /// 已解码（含失败）的帧数
    pub fn decoded(&self) -> usize {
        self.decoded
    }
}

impl VideoSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, AlignError> {
        if self.fail_at == Some(self.decoded) {
            self.decoded += 1;
            return Err(AlignError::SourceUnavailable(format!(
                "decode failed at frame {}",
                self.decoded - 1
            )));
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.decoded += 1;
        }
        Ok(frame)
    }
}

/// 目录中的图像序列（按文件名排序），每个文件视为一帧
pub struct FrameDirSource {
    files: VecDeque<PathBuf>,
}

impl FrameDirSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, AlignError> {
        let files = list_image_files(dir.as_ref())?;
        info!("🎞️ FrameDirSource: {} frames in {:?}", files.len(), dir.as_ref());
        Ok(Self {
            files: files.into(),
        })
    }
}

impl VideoSource for FrameDirSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, AlignError> {
        match self.files.pop_front() {
            Some(path) => {
                let img = image::open(&path)?;
                Ok(Some(img.to_rgb8()))
            }
            None => Ok(None),
        }
    }
}

/// 列出目录中的图像文件，按文件名排序
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>, AlignError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        AlignError::SourceUnavailable(format!("cannot read {}: {}", dir.display(), e))
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_extension(path, IMAGE_EXTENSIONS))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// 通过 ffmpeg 子进程解码，stdout 输出 rgb24 原始帧
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
}

impl FfmpegSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AlignError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(AlignError::SourceUnavailable(format!(
                "video not found: {}",
                path.display()
            )));
        }

        let (width, height) = probe_dimensions(path)?;
        info!("🎬 FfmpegSource: {} ({}x{})", path.display(), width, height);

        let child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(path)
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AlignError::SourceUnavailable(format!("failed to run ffmpeg: {}", e)))?;

        Self::from_child(child, width, height)
    }

    /// 接管一个向 stdout 输出 rgb24 原始帧的子进程
    fn from_child(mut child: Child, width: u32, height: u32) -> Result<Self, AlignError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AlignError::SourceUnavailable("ffmpeg stdout unavailable".into()))?;

        Ok(Self {
            child,
            stdout,
            width,
            height,
        })
    }

    /// stdout 结束后区分正常结束与解码失败
    fn end_of_stream(&mut self) -> Result<Option<RgbImage>, AlignError> {
        let status = self.child.wait()?;
        if status.success() {
            return Ok(None);
        }
        warn!("⚠️ ffmpeg exited with {}", status);
        Err(AlignError::SourceUnavailable(format!(
            "ffmpeg exited with {}",
            status
        )))
    }
}

impl VideoSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, AlignError> {
        let frame_len = (self.width as usize) * (self.height as usize) * 3;
        let mut buffer = vec![0u8; frame_len];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => Ok(RgbImage::from_raw(self.width, self.height, buffer)),
            // 末尾不完整的帧按流结束处理
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => self.end_of_stream(),
            Err(e) => Err(AlignError::Io(e)),
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("ffmpeg already exited: {}", e);
        }
        let _ = self.child.wait();
    }
}

fn probe_dimensions(path: &Path) -> Result<(u32, u32), AlignError> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height")
        .arg("-of")
        .arg("csv=s=x:p=0")
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| AlignError::SourceUnavailable(format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        warn!("⚠️ ffprobe exited with {}", output.status);
        return Err(AlignError::SourceUnavailable(format!(
            "ffprobe cannot open {}",
            path.display()
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    parse_dimensions(&text).ok_or_else(|| {
        AlignError::SourceUnavailable(format!("no video stream in {}", path.display()))
    })
}

/// 解析 ffprobe 的 `WIDTHxHEIGHT` 输出
fn parse_dimensions(text: &str) -> Option<(u32, u32)> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (w, h) = line.split_once('x')?;
    let width: u32 = w.trim().parse().ok()?;
    let height: u32 = h.trim().trim_end_matches('x').parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}
