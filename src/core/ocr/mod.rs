//! 文字提取
//!
//! OCR 引擎本身是外部能力，这里只负责前后处理以及把引擎错误隔离为空文本。

pub mod extractor;
pub mod normalize;
pub mod preprocess;

pub use extractor::{MockTextExtractor, TesseractExtractor, TextExtractor};
pub use normalize::normalize_text;
pub use preprocess::prepare;

use crate::core::config::{CropRect, PreprocessConfig};
use image::RgbImage;
use log::warn;

/// 预处理 -> 提取 -> 后处理。提取失败按空文本处理
///
/// 返回 (raw_text, normalized_text)
pub fn read_region(
    extractor: &dyn TextExtractor,
    image: &RgbImage,
    crop: &CropRect,
    preprocess: &PreprocessConfig,
) -> (String, String) {
    let gray = prepare(image, crop, preprocess);
    if gray.width() == 0 || gray.height() == 0 {
        return (String::new(), String::new());
    }

    let raw = match extractor.extract(&gray) {
        Ok(text) => text,
        Err(e) => {
            warn!("⚠️ Text extraction failed, using empty text: {}", e);
            String::new()
        }
    };
    let normalized = normalize_text(&raw);
    (raw, normalized)
}
