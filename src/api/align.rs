//! 幻灯片-视频对齐入口

use crate::core::cache::{CacheKey, FrameCache};
use crate::core::config::AlignConfig;
use crate::core::error::AlignError;
use crate::core::ocr::{TesseractExtractor, TextExtractor};
use crate::core::pipeline::{AlignmentOutcome, AlignmentPipeline, CancelToken, SlideInput};
use crate::core::video::source::{list_image_files, FfmpegSource, FrameDirSource, VideoSource};
use crate::core::AlignmentResult;
use image::RgbImage;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideReport {
    pub index: usize,
    pub raw_text: String,
    pub normalized_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame_index: u64,
    pub raw_text: String,
    pub normalized_text: String,
}

/// 对齐报告（JSON）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub threshold: f32,
    pub slides: Vec<SlideReport>,
    pub frames: Vec<FrameReport>,
    pub results: Vec<AlignmentResult>,
}

impl AlignmentReport {
    pub fn from_outcome(outcome: &AlignmentOutcome, threshold: f32) -> Self {
        Self {
            threshold,
            slides: outcome
                .slides
                .iter()
                .map(|s| SlideReport {
                    index: s.index,
                    raw_text: s.raw_text.clone(),
                    normalized_text: s.normalized_text.clone(),
                })
                .collect(),
            frames: outcome
                .frames
                .iter()
                .map(|f| FrameReport {
                    frame_index: f.frame_index,
                    raw_text: f.raw_text.clone(),
                    normalized_text: f.normalized_text.clone(),
                })
                .collect(),
            results: outcome.results.clone(),
        }
    }
}

/// 幻灯片对齐器 - OCR + TF-IDF 匹配 + 帧缓存
///
/// ```ignore
/// let aligner = SlideAligner::from_config_file("align.json5")?;
/// let outcome = aligner.align_paths("slides/", "lecture.mp4", Some(Path::new("cache/")))?;
/// aligner.write_report(&outcome, "report.json")?;
/// ```
pub struct SlideAligner {
    pipeline: AlignmentPipeline,
}

impl SlideAligner {
    /// 使用 tesseract 作为文字提取引擎
    pub fn new(config: AlignConfig) -> Result<Self, AlignError> {
        Self::with_extractor(config, Arc::new(TesseractExtractor::new()))
    }

    pub fn with_extractor(
        config: AlignConfig,
        extractor: Arc<dyn TextExtractor>,
    ) -> Result<Self, AlignError> {
        let pipeline = AlignmentPipeline::new(config, extractor)?;
        info!("🎬 SlideAligner: created");
        Ok(Self { pipeline })
    }

    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, AlignError> {
        Self::new(AlignConfig::from_path(path)?)
    }

    pub fn config(&self) -> &AlignConfig {
        self.pipeline.config()
    }

    /// 取消正在进行的对齐，已取消的运行不会写入缓存
    pub fn cancel(&self) {
        self.pipeline.cancel_token().cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.pipeline.cancel_token()
    }

    /// 读取目录中的幻灯片图像，按文件名排序
    pub fn load_slide_images(dir: impl AsRef<Path>) -> Result<Vec<RgbImage>, AlignError> {
        let files = list_image_files(dir.as_ref())?;
        files
            .iter()
            .map(|path| {
                image::open(path).map(|img| img.to_rgb8()).map_err(|e| {
                    AlignError::SourceUnavailable(format!("cannot load {}: {}", path.display(), e))
                })
            })
            .collect()
    }

    /// 视频路径为目录时按帧图像序列读取，否则交给 ffmpeg 解码
    pub fn align_paths(
        &self,
        slide_dir: impl AsRef<Path>,
        video_path: impl AsRef<Path>,
        cache_dir: Option<&Path>,
    ) -> Result<AlignmentOutcome, AlignError> {
        let video_path = video_path.as_ref();
        let slides: Vec<SlideInput> = Self::load_slide_images(slide_dir)?
            .into_iter()
            .map(SlideInput::Image)
            .collect();
        info!("📂 Loaded {} slide images", slides.len());

        let cache = cache_dir.map(FrameCache::open).transpose()?;
        let key = CacheKey::for_config(video_path.to_string_lossy(), self.config());

        self.pipeline.align_with(
            &slides,
            || open_video(video_path),
            cache.as_ref(),
            &key,
        )
    }

    pub fn write_report(
        &self,
        outcome: &AlignmentOutcome,
        path: impl AsRef<Path>,
    ) -> Result<(), AlignError> {
        let report = AlignmentReport::from_outcome(outcome, self.config().threshold);
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(&report)?)?;
        info!("💾 Report written to {}", path.display());
        Ok(())
    }

    /// 每个幻灯片的最佳帧写为 `most_similar_frame_{n}.png`（n 从 1 开始）
    pub fn write_evidence(
        &self,
        outcome: &AlignmentOutcome,
        dir: impl AsRef<Path>,
    ) -> Result<Vec<PathBuf>, AlignError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut written = Vec::with_capacity(outcome.results.len());
        for result in &outcome.results {
            let Some(frame) = outcome.evidence(result.slide_index) else {
                warn!(
                    "⚠️ No frame {} for slide {}",
                    result.chosen_frame_index, result.slide_index
                );
                continue;
            };
            let path = dir.join(format!("most_similar_frame_{}.png", result.slide_index + 1));
            frame.image.save(&path)?;
            written.push(path);
        }

        info!("🖼️ Wrote {} evidence frames to {}", written.len(), dir.display());
        Ok(written)
    }
}

impl Drop for SlideAligner {
    fn drop(&mut self) {
        info!("🗑️ SlideAligner: released");
    }
}

fn open_video(path: &Path) -> Result<Box<dyn VideoSource>, AlignError> {
    if path.is_dir() {
        Ok(Box::new(FrameDirSource::open(path)?))
    } else {
        Ok(Box::new(FfmpegSource::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CropRect, SamplingConfig};
    use crate::core::ocr::MockTextExtractor;
    use image::Rgb;

    fn solid(value: u8) -> RgbImage {
        RgbImage::from_pixel(12, 12, Rgb([value, value, value]))
    }

    fn config() -> AlignConfig {
        let mut config = AlignConfig::new(
            SamplingConfig {
                stride: 2,
                scale: 1.0,
                start_offset: 0,
                frame_crop: CropRect::full(),
            },
            CropRect::full(),
            0.25,
        );
        config.workers = 2;
        config
    }

    fn extractor() -> Arc<MockTextExtractor> {
        Arc::new(MockTextExtractor::with_texts_by_luma(vec![
            (0, "시작 화면 안내 입니다".into()),
            (20, "다른 내용".into()),
            (40, "목차 입니다".into()),
            (200, "시작 화면 안내".into()),
            (201, "목차".into()),
            (202, "".into()),
        ]))
    }

    /// 幻灯片目录 + 帧目录（帧 i 的亮度为 10 * i）
    fn fixture(root: &Path) -> (PathBuf, PathBuf) {
        let slides = root.join("slides");
        let frames = root.join("frames");
        fs::create_dir_all(&slides).unwrap();
        fs::create_dir_all(&frames).unwrap();
        solid(200).save(slides.join("01.png")).unwrap();
        solid(201).save(slides.join("02.png")).unwrap();
        solid(202).save(slides.join("03.png")).unwrap();
        for i in 0..5u8 {
            solid(i * 10).save(frames.join(format!("{:04}.png", i))).unwrap();
        }
        (slides, frames)
    }

    #[test]
    fn test_align_paths_with_frame_dir() {
        let root = tempfile::tempdir().unwrap();
        let (slides, frames) = fixture(root.path());
        let aligner = SlideAligner::with_extractor(config(), extractor()).unwrap();

        let outcome = aligner.align_paths(&slides, &frames, None).unwrap();
        let chosen: Vec<u64> = outcome.results.iter().map(|r| r.chosen_frame_index).collect();
        assert_eq!(chosen, vec![0, 4, 0]);
        assert!(!outcome.results[0].flagged);
        assert!(outcome.results[2].flagged);
    }

    #[test]
    fn test_align_paths_reuses_cache() {
        let root = tempfile::tempdir().unwrap();
        let (slides, frames) = fixture(root.path());
        let cache_dir = root.path().join("cache");

        let first = SlideAligner::with_extractor(config(), extractor())
            .unwrap()
            .align_paths(&slides, &frames, Some(&cache_dir))
            .unwrap();

        // 第二次运行时帧目录已不存在，只能从缓存读取
        fs::remove_dir_all(&frames).unwrap();
        let counting = extractor();
        let second = SlideAligner::with_extractor(config(), counting.clone())
            .unwrap()
            .align_paths(&slides, &frames, Some(&cache_dir))
            .unwrap();

        assert_eq!(first.results, second.results);
        assert_eq!(first.slides, second.slides);
        assert_eq!(counting.calls(), 0);
    }

    #[test]
    fn test_missing_video_is_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let (slides, _) = fixture(root.path());
        let aligner = SlideAligner::with_extractor(config(), extractor()).unwrap();
        let result = aligner.align_paths(&slides, root.path().join("missing.mp4"), None);
        assert!(matches!(result, Err(AlignError::SourceUnavailable(_))));
    }

    #[test]
    fn test_load_slide_images_sorted() {
        let root = tempfile::tempdir().unwrap();
        let (slides, _) = fixture(root.path());
        let images = SlideAligner::load_slide_images(&slides).unwrap();
        let lumas: Vec<u8> = images.iter().map(|img| img.get_pixel(0, 0).0[0]).collect();
        assert_eq!(lumas, vec![200, 201, 202]);
    }

    #[test]
    fn test_load_slide_images_rejects_broken_file() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("broken.png"), b"not a png").unwrap();
        let result = SlideAligner::load_slide_images(root.path());
        assert!(matches!(result, Err(AlignError::SourceUnavailable(_))));
    }

    #[test]
    fn test_write_report_and_evidence() {
        let root = tempfile::tempdir().unwrap();
        let (slides, frames) = fixture(root.path());
        let aligner = SlideAligner::with_extractor(config(), extractor()).unwrap();
        let outcome = aligner.align_paths(&slides, &frames, None).unwrap();

        let report_path = root.path().join("out").join("report.json");
        aligner.write_report(&outcome, &report_path).unwrap();
        let report: AlignmentReport =
            serde_json::from_slice(&fs::read(&report_path).unwrap()).unwrap();
        assert_eq!(report.results, outcome.results);
        assert_eq!(report.slides[1].normalized_text, "목차");
        assert_eq!(report.frames.len(), 3);

        let written = aligner.write_evidence(&outcome, root.path().join("evidence")).unwrap();
        assert_eq!(written.len(), 3);
        assert!(written[0].ends_with("most_similar_frame_1.png"));
        let second = image::open(&written[1]).unwrap().to_rgb8();
        assert_eq!(second.get_pixel(0, 0).0[0], 40);
    }

    #[test]
    fn test_from_config_file() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("align.json5");
        fs::write(
            &path,
            r#"{
                sampling: { stride: 30, scale: 0.3, frame_crop: { left: 0, top: 60, right: 1080, bottom: 600 } },
                slide_crop: { left: 0, top: 90, right: 1080, bottom: 600 },
                threshold: 0.4,
            }"#,
        )
        .unwrap();
        let aligner = SlideAligner::from_config_file(&path).unwrap();
        assert_eq!(aligner.config().sampling.stride, 30);
        assert!((aligner.config().threshold - 0.4).abs() < f32::EPSILON);
    }
}
