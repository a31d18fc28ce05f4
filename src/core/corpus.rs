use crate::core::error::AlignError;
use image::RgbImage;

#[derive(Debug, Clone, PartialEq)]
pub struct SlideRecord {
    pub index: usize,
    pub raw_text: String,
    pub normalized_text: String,
}

/// 采样帧及其文字（下标、图像、文本作为一个整体，不再用三个并行列表）
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub frame_index: u64,
    pub image: RgbImage,
    pub raw_text: String,
    pub normalized_text: String,
}

/// 幻灯片语料 + 帧语料，两边都非空
#[derive(Debug)]
pub struct Corpus<'a> {
    slides: &'a [SlideRecord],
    frames: &'a [FrameRecord],
}

impl<'a> Corpus<'a> {
    pub fn build(slides: &'a [SlideRecord], frames: &'a [FrameRecord]) -> Result<Self, AlignError> {
        match (slides.is_empty(), frames.is_empty()) {
            (true, true) => Err(AlignError::InsufficientData("no slides and no frames".into())),
            (true, false) => Err(AlignError::InsufficientData("no slides".into())),
            (false, true) => Err(AlignError::InsufficientData(
                "no frames sampled from video".into(),
            )),
            (false, false) => Ok(Self { slides, frames }),
        }
    }

    pub fn slide_texts(&self) -> Vec<&'a str> {
        self.slides.iter().map(|s| s.normalized_text.as_str()).collect()
    }

    pub fn frame_texts(&self) -> Vec<&'a str> {
        self.frames.iter().map(|f| f.normalized_text.as_str()).collect()
    }

    pub fn frame_indices(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.frame_index).collect()
    }

    pub fn slide_count(&self) -> usize {
        self.slides.len()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}
