//! 帧文字缓存
//!
//! 帧文字以调用方提供的元数据（视频标识 + 采样参数）作为键做显式记忆化，不对视频内容做哈希。
//! 键的选择由调用方负责：任何影响结果的输入变化都应该换一个键。
//!
//! 磁盘布局：
//! ```text
//! <root>/<fingerprint>/manifest.json
//! <root>/<fingerprint>/frames/<frame_index>.png
//! <root>/slides/<slide fingerprint>.json
//! ```
//!
//! 幻灯片文字单独按图像内容 + 裁剪 + 预处理参数做指纹，与视频无关。
//! 写入先落到临时目录，再用一次 rename 提交，不会留下半写入的条目。

use crate::core::config::{AlignConfig, CropRect, PreprocessConfig};
use crate::core::corpus::FrameRecord;
use crate::core::error::AlignError;
use image::RgbImage;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CACHE_FORMAT_VERSION: u32 = 1;
const MANIFEST_FILE: &str = "manifest.json";
const FRAMES_DIR: &str = "frames";
const SLIDES_DIR: &str = "slides";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheKey {
    pub video: String,
    pub stride: u32,
    pub scale: f32,
    pub start_offset: u64,
    pub frame_crop: CropRect,
    pub preprocess: PreprocessConfig,
    pub skip_empty_frames: bool,
}

impl CacheKey {
    /// 由视频标识和会影响帧文字的配置项组成
    pub fn for_config(video: impl Into<String>, config: &AlignConfig) -> Self {
        Self {
            video: video.into(),
            stride: config.sampling.stride,
            scale: config.sampling.scale,
            start_offset: config.sampling.start_offset,
            frame_crop: config.sampling.frame_crop,
            preprocess: config.preprocess,
            skip_empty_frames: config.skip_empty_frames,
        }
    }

    pub fn fingerprint(&self) -> Result<String, AlignError> {
        let bytes = serde_json::to_vec(self)?;
        let hex = blake3::hash(&bytes).to_hex();
        Ok(hex[..32].to_string())
    }
}

/// 幻灯片图像的指纹：像素 + 裁剪区域 + 预处理参数
pub fn slide_fingerprint(
    image: &RgbImage,
    crop: &CropRect,
    preprocess: &PreprocessConfig,
) -> Result<String, AlignError> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&CACHE_FORMAT_VERSION.to_le_bytes());
    hasher.update(&image.width().to_le_bytes());
    hasher.update(&image.height().to_le_bytes());
    hasher.update(image.as_raw());
    hasher.update(&serde_json::to_vec(&(crop, preprocess))?);
    let hex = hasher.finalize().to_hex();
    Ok(hex[..32].to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideText {
    pub raw_text: String,
    pub normalized_text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SlideTextRecord {
    format_version: u32,
    fingerprint: String,
    #[serde(flatten)]
    text: SlideText,
}

/// 一次完整抽帧的结果
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub frames: Vec<FrameRecord>,
}

impl CacheEntry {
    pub fn texts(&self) -> Vec<&str> {
        self.frames.iter().map(|f| f.normalized_text.as_str()).collect()
    }

    pub fn indices(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.frame_index).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    key: CacheKey,
    frames: Vec<ManifestFrame>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestFrame {
    frame_index: u64,
    raw_text: String,
    normalized_text: String,
    width: u32,
    height: u32,
}

pub struct FrameCache {
    root: PathBuf,
}

impl FrameCache {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, AlignError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &CacheKey) -> Result<PathBuf, AlignError> {
        Ok(self.root.join(key.fingerprint()?))
    }

    pub fn contains(&self, key: &CacheKey) -> Result<bool, AlignError> {
        Ok(self.entry_dir(key)?.join(MANIFEST_FILE).is_file())
    }

    /// 存在则读取；不存在返回 `Ok(None)`；无法读取返回 `CacheCorrupt`
    pub fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, AlignError> {
        let dir = self.entry_dir(key)?;
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Ok(None);
        }

        let bytes = fs::read(&manifest_path)
            .map_err(|e| AlignError::CacheCorrupt(format!("cannot read manifest: {}", e)))?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| AlignError::CacheCorrupt(format!("invalid manifest: {}", e)))?;

        if manifest.format_version != CACHE_FORMAT_VERSION {
            return Err(AlignError::CacheCorrupt(format!(
                "format version {} (expected {})",
                manifest.format_version, CACHE_FORMAT_VERSION
            )));
        }
        if manifest.key != *key {
            return Err(AlignError::CacheCorrupt("key mismatch".into()));
        }

        let mut frames = Vec::with_capacity(manifest.frames.len());
        let mut last_index: Option<u64> = None;
        for meta in manifest.frames {
            if last_index.is_some_and(|last| meta.frame_index <= last) {
                return Err(AlignError::CacheCorrupt(format!(
                    "frame index {} out of order",
                    meta.frame_index
                )));
            }
            last_index = Some(meta.frame_index);

            let image_path = dir.join(frame_file_name(meta.frame_index));
            let image = image::open(&image_path)
                .map_err(|e| {
                    AlignError::CacheCorrupt(format!("frame {}: {}", meta.frame_index, e))
                })?
                .to_rgb8();
            if image.dimensions() != (meta.width, meta.height) {
                return Err(AlignError::CacheCorrupt(format!(
                    "frame {} is {:?}, manifest says {}x{}",
                    meta.frame_index,
                    image.dimensions(),
                    meta.width,
                    meta.height
                )));
            }

            frames.push(FrameRecord {
                frame_index: meta.frame_index,
                image,
                raw_text: meta.raw_text,
                normalized_text: meta.normalized_text,
            });
        }

        debug!("FrameCache: loaded {} frames from {:?}", frames.len(), dir);
        Ok(Some(CacheEntry { frames }))
    }

    /// 原子写入：临时目录 + rename
    pub fn store(&self, key: &CacheKey, frames: &[FrameRecord]) -> Result<(), AlignError> {
        let fingerprint = key.fingerprint()?;
        let final_dir = self.root.join(&fingerprint);
        let tmp_dir = self
            .root
            .join(format!(".{}.tmp-{}", fingerprint, std::process::id()));

        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }

        if let Err(e) = write_entry(&tmp_dir, key, frames) {
            let _ = fs::remove_dir_all(&tmp_dir);
            return Err(e);
        }

        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        fs::rename(&tmp_dir, &final_dir)?;

        info!("💾 FrameCache: stored {} frames at {:?}", frames.len(), final_dir);
        Ok(())
    }

    /// 删除条目，返回是否存在过
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool, AlignError> {
        let dir = self.entry_dir(key)?;
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            info!("🗑️ FrameCache: invalidated {:?}", dir);
            return Ok(true);
        }
        Ok(false)
    }

    /// 命中则直接返回，不调用 builder；未命中则运行 builder 并在返回前持久化
    pub fn get_or_build<F>(&self, key: &CacheKey, builder: F) -> Result<CacheEntry, AlignError>
    where
        F: FnOnce() -> Result<Vec<FrameRecord>, AlignError>,
    {
        if let Some(entry) = self.load(key)? {
            info!("✅ FrameCache hit: {} frames for {}", entry.len(), key.video);
            return Ok(entry);
        }

        info!("FrameCache miss for {}, building", key.video);
        let frames = builder()?;
        self.store(key, &frames)?;
        Ok(CacheEntry { frames })
    }

    fn slide_path(&self, fingerprint: &str) -> PathBuf {
        self.root.join(SLIDES_DIR).join(format!("{}.json", fingerprint))
    }

    pub fn load_slide_text(&self, fingerprint: &str) -> Result<Option<SlideText>, AlignError> {
        let path = self.slide_path(fingerprint);
        if !path.is_file() {
            return Ok(None);
        }

        let bytes = fs::read(&path)
            .map_err(|e| AlignError::CacheCorrupt(format!("cannot read slide text: {}", e)))?;
        let record: SlideTextRecord = serde_json::from_slice(&bytes)
            .map_err(|e| AlignError::CacheCorrupt(format!("invalid slide text: {}", e)))?;

        if record.format_version != CACHE_FORMAT_VERSION || record.fingerprint != fingerprint {
            return Err(AlignError::CacheCorrupt(format!(
                "slide text {} does not match its record",
                fingerprint
            )));
        }
        Ok(Some(record.text))
    }

    /// 临时文件 + rename
    pub fn store_slide_text(&self, fingerprint: &str, text: &SlideText) -> Result<(), AlignError> {
        let dir = self.root.join(SLIDES_DIR);
        fs::create_dir_all(&dir)?;

        let record = SlideTextRecord {
            format_version: CACHE_FORMAT_VERSION,
            fingerprint: fingerprint.to_string(),
            text: text.clone(),
        };
        let tmp_path = dir.join(format!(".{}.tmp-{}", fingerprint, std::process::id()));
        if let Err(e) = fs::write(&tmp_path, serde_json::to_vec_pretty(&record)?) {
            let _ = fs::remove_file(&tmp_path);
            return Err(AlignError::Io(e));
        }
        fs::rename(&tmp_path, self.slide_path(fingerprint))?;
        Ok(())
    }
}

fn frame_file_name(frame_index: u64) -> PathBuf {
    Path::new(FRAMES_DIR).join(format!("{:010}.png", frame_index))
}

fn write_entry(dir: &Path, key: &CacheKey, frames: &[FrameRecord]) -> Result<(), AlignError> {
    fs::create_dir_all(dir.join(FRAMES_DIR))?;

    let mut metas = Vec::with_capacity(frames.len());
    for frame in frames {
        frame.image.save(dir.join(frame_file_name(frame.frame_index)))?;
        metas.push(ManifestFrame {
            frame_index: frame.frame_index,
            raw_text: frame.raw_text.clone(),
            normalized_text: frame.normalized_text.clone(),
            width: frame.image.width(),
            height: frame.image.height(),
        });
    }

    let manifest = Manifest {
        format_version: CACHE_FORMAT_VERSION,
        key: key.clone(),
        frames: metas,
    };
    let bytes = serde_json::to_vec_pretty(&manifest)?;
    fs::write(dir.join(MANIFEST_FILE), bytes).map_err(|e| {
        warn!("⚠️ Failed to write cache manifest: {}", e);
        AlignError::Io(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SamplingConfig;
    use std::cell::Cell;

    fn key(video: &str) -> CacheKey {
        let config = AlignConfig::new(
            SamplingConfig {
                stride: 30,
                scale: 0.5,
                start_offset: 0,
                frame_crop: CropRect::new(0, 60, 1080, 600),
            },
            CropRect::new(0, 90, 1080, 600),
            0.25,
        );
        CacheKey::for_config(video, &config)
    }

    fn record(frame_index: u64, text: &str) -> FrameRecord {
        FrameRecord {
            frame_index,
            image: RgbImage::from_pixel(6, 4, image::Rgb([frame_index as u8, 1, 2])),
            raw_text: format!("{}!", text),
            normalized_text: text.to_string(),
        }
    }

    #[test]
    fn test_fingerprint_depends_on_key() {
        let a = key("lecture.mp4").fingerprint().unwrap();
        let b = key("lecture2.mp4").fingerprint().unwrap();
        assert_eq!(a, key("lecture.mp4").fingerprint().unwrap());
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);

        let mut other = key("lecture.mp4");
        other.stride = 60;
        assert_ne!(a, other.fingerprint().unwrap());
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FrameCache::open(dir.path()).unwrap();
        let k = key("lecture.mp4");
        let frames = vec![record(0, "시작 화면"), record(30, "목차")];

        assert!(cache.load(&k).unwrap().is_none());
        cache.store(&k, &frames).unwrap();
        assert!(cache.contains(&k).unwrap());

        let entry = cache.load(&k).unwrap().unwrap();
        assert_eq!(entry.frames, frames);
        assert_eq!(entry.indices(), vec![0, 30]);
        assert_eq!(entry.texts(), vec!["시작 화면", "목차"]);

        // 不留临时目录
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_get_or_build_skips_builder_on_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FrameCache::open(dir.path()).unwrap();
        let k = key("lecture.mp4");
        let builds = Cell::new(0);

        let build = || {
            builds.set(builds.get() + 1);
            Ok(vec![record(0, "a"), record(60, "b")])
        };

        let first = cache.get_or_build(&k, build).unwrap();
        let second = cache
            .get_or_build(&k, || {
                builds.set(builds.get() + 1);
                Ok(vec![])
            })
            .unwrap();

        assert_eq!(builds.get(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_builder_error_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FrameCache::open(dir.path()).unwrap();
        let k = key("lecture.mp4");

        let result = cache.get_or_build(&k, || Err(AlignError::Cancelled));
        assert!(matches!(result, Err(AlignError::Cancelled)));
        assert!(!cache.contains(&k).unwrap());
    }

    #[test]
    fn test_corrupt_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FrameCache::open(dir.path()).unwrap();
        let k = key("lecture.mp4");
        cache.store(&k, &[record(0, "a")]).unwrap();

        let manifest = dir.path().join(k.fingerprint().unwrap()).join(MANIFEST_FILE);
        fs::write(&manifest, b"not json").unwrap();
        assert!(matches!(cache.load(&k), Err(AlignError::CacheCorrupt(_))));

        assert!(cache.invalidate(&k).unwrap());
        assert!(cache.load(&k).unwrap().is_none());
        assert!(!cache.invalidate(&k).unwrap());
    }

    #[test]
    fn test_version_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FrameCache::open(dir.path()).unwrap();
        let k = key("lecture.mp4");
        cache.store(&k, &[record(0, "a")]).unwrap();

        let manifest_path = dir.path().join(k.fingerprint().unwrap()).join(MANIFEST_FILE);
        let mut manifest: serde_json::Value =
            serde_json::from_slice(&fs::read(&manifest_path).unwrap()).unwrap();
        manifest["format_version"] = serde_json::json!(99);
        fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();

        assert!(matches!(cache.load(&k), Err(AlignError::CacheCorrupt(_))));
    }

    #[test]
    fn test_missing_frame_image_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FrameCache::open(dir.path()).unwrap();
        let k = key("lecture.mp4");
        cache.store(&k, &[record(0, "a"), record(30, "b")]).unwrap();

        let image_path = dir
            .path()
            .join(k.fingerprint().unwrap())
            .join(frame_file_name(30));
        fs::remove_file(image_path).unwrap();

        assert!(matches!(cache.load(&k), Err(AlignError::CacheCorrupt(_))));
    }

    #[test]
    fn test_slide_fingerprint_covers_pixels_and_crop() {
        let slide = RgbImage::from_pixel(8, 8, image::Rgb([200, 200, 200]));
        let crop = CropRect::new(0, 90, 1080, 600);
        let preprocess = PreprocessConfig::default();
        let base = slide_fingerprint(&slide, &crop, &preprocess).unwrap();

        assert_eq!(base, slide_fingerprint(&slide.clone(), &crop, &preprocess).unwrap());
        assert_eq!(base.len(), 32);

        let mut touched = slide.clone();
        touched.put_pixel(3, 3, image::Rgb([0, 0, 0]));
        assert_ne!(base, slide_fingerprint(&touched, &crop, &preprocess).unwrap());
        assert_ne!(base, slide_fingerprint(&slide, &CropRect::full(), &preprocess).unwrap());

        let denoised = PreprocessConfig {
            denoise: true,
            equalize: false,
        };
        assert_ne!(base, slide_fingerprint(&slide, &crop, &denoised).unwrap());
    }

    #[test]
    fn test_slide_text_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FrameCache::open(dir.path()).unwrap();
        let text = SlideText {
            raw_text: "#2 목차!".into(),
            normalized_text: "목차".into(),
        };

        assert!(cache.load_slide_text("abc").unwrap().is_none());
        cache.store_slide_text("abc", &text).unwrap();
        assert_eq!(cache.load_slide_text("abc").unwrap(), Some(text));

        let leftovers: Vec<_> = fs::read_dir(dir.path().join(SLIDES_DIR))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_corrupt_slide_text() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FrameCache::open(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join(SLIDES_DIR)).unwrap();
        fs::write(cache.slide_path("abc"), b"{").unwrap();
        assert!(matches!(
            cache.load_slide_text("abc"),
            Err(AlignError::CacheCorrupt(_))
        ));

        // 指纹与文件名不一致
        let text = SlideText {
            raw_text: "a".into(),
            normalized_text: "a".into(),
        };
        cache.store_slide_text("def", &text).unwrap();
        fs::copy(cache.slide_path("def"), cache.slide_path("abc")).unwrap();
        assert!(matches!(
            cache.load_slide_text("abc"),
            Err(AlignError::CacheCorrupt(_))
        ));
    }
}
