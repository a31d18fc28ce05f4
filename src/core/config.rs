//! 对齐配置
//!
//! 阈值和裁剪区域是经验值，没有推导依据，因此作为必填项而不提供默认值。

use crate::core::error::AlignError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 裁剪矩形 (left, top, right, bottom)，右/下边界不包含
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropRect {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// 覆盖任意尺寸图像的整帧区域
    pub fn full() -> Self {
        Self::new(0, 0, u32::MAX, u32::MAX)
    }

    /// 与图像边界求交，返回 (x, y, width, height)
    pub fn clamp_to(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let left = self.left.min(width);
        let top = self.top.min(height);
        let right = self.right.min(width).max(left);
        let bottom = self.bottom.min(height).max(top);
        (left, top, right - left, bottom - top)
    }
}

/// OCR 前的可选增强
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default)]
    pub denoise: bool,
    #[serde(default)]
    pub equalize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// 每隔 stride 帧采一帧
    pub stride: u32,
    /// 缩放系数，(0, 1]
    pub scale: f32,
    /// 第一个采样帧的下标
    #[serde(default)]
    pub start_offset: u64,
    /// 缩放后帧上的 OCR 区域
    pub frame_crop: CropRect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignConfig {
    pub sampling: SamplingConfig,
    /// 幻灯片图像上的 OCR 区域
    pub slide_crop: CropRect,
    /// score <= threshold 的幻灯片会被标记
    pub threshold: f32,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    /// 丢弃 OCR 结果为空的帧
    #[serde(default)]
    pub skip_empty_frames: bool,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_rebuild")]
    pub rebuild_corrupt_cache: bool,
}

fn default_workers() -> usize {
    num_cpus::get().clamp(1, 4)
}

fn default_batch_size() -> usize {
    32
}

fn default_rebuild() -> bool {
    true
}

impl AlignConfig {
    pub fn new(sampling: SamplingConfig, slide_crop: CropRect, threshold: f32) -> Self {
        Self {
            sampling,
            slide_crop,
            threshold,
            preprocess: PreprocessConfig::default(),
            skip_empty_frames: false,
            workers: default_workers(),
            batch_size: default_batch_size(),
            rebuild_corrupt_cache: default_rebuild(),
        }
    }

    pub fn from_json5_str(text: &str) -> Result<Self, AlignError> {
        let config: AlignConfig =
            json5::from_str(text).map_err(|e| AlignError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AlignError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            AlignError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json5_str(&text)
    }

    pub fn validate(&self) -> Result<(), AlignError> {
        if self.sampling.stride == 0 {
            return Err(AlignError::InvalidConfig("stride must be > 0".into()));
        }
        let scale = self.sampling.scale;
        if !(scale > 0.0 && scale <= 1.0) {
            return Err(AlignError::InvalidConfig(format!(
                "scale must be in (0, 1], got {}",
                scale
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(AlignError::InvalidConfig(format!(
                "threshold must be in [0, 1], got {}",
                self.threshold
            )));
        }
        if self.workers == 0 {
            return Err(AlignError::InvalidConfig("workers must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(AlignError::InvalidConfig("batch_size must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    {
        // 30 帧取一帧，缩放到 0.3
        sampling: {
            stride: 30,
            scale: 0.3,
            frame_crop: { left: 0, top: 60, right: 1080, bottom: 600 },
        },
        slide_crop: { left: 0, top: 90, right: 1080, bottom: 600 },
        threshold: 0.25,
    }
    "#;

    #[test]
    fn test_parse_json5_with_defaults() {
        let config = AlignConfig::from_json5_str(SAMPLE).expect("应该能解析");
        assert_eq!(config.sampling.stride, 30);
        assert_eq!(config.sampling.start_offset, 0);
        assert_eq!(config.slide_crop, CropRect::new(0, 90, 1080, 600));
        assert!((config.threshold - 0.25).abs() < f32::EPSILON);
        assert!(!config.skip_empty_frames);
        assert!(config.rebuild_corrupt_cache);
        assert_eq!(config.batch_size, 32);
        assert!(config.workers >= 1 && config.workers <= 4);
        assert_eq!(config.preprocess, PreprocessConfig::default());
    }

    #[test]
    fn test_threshold_is_required() {
        let text = r#"{
            sampling: { stride: 30, scale: 0.5, frame_crop: { left: 0, top: 0, right: 10, bottom: 10 } },
            slide_crop: { left: 0, top: 0, right: 10, bottom: 10 },
        }"#;
        let result = AlignConfig::from_json5_str(text);
        assert!(matches!(result, Err(AlignError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let sampling = SamplingConfig {
            stride: 0,
            scale: 0.5,
            start_offset: 0,
            frame_crop: CropRect::full(),
        };
        let config = AlignConfig::new(sampling.clone(), CropRect::full(), 0.25);
        assert!(config.validate().is_err());

        let config = AlignConfig::new(
            SamplingConfig {
                stride: 1,
                scale: 1.5,
                ..sampling.clone()
            },
            CropRect::full(),
            0.25,
        );
        assert!(config.validate().is_err());

        let config = AlignConfig::new(
            SamplingConfig {
                stride: 1,
                ..sampling
            },
            CropRect::full(),
            1.2,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_crop_rect_clamps_to_image() {
        let rect = CropRect::new(0, 90, 1080, 600);
        assert_eq!(rect.clamp_to(640, 360), (0, 90, 640, 270));
        assert_eq!(rect.clamp_to(1920, 1080), (0, 90, 1080, 510));
        assert_eq!(CropRect::new(700, 500, 800, 600).clamp_to(640, 360), (640, 360, 0, 0));
        assert_eq!(CropRect::full().clamp_to(32, 16), (0, 0, 32, 16));
    }
}
