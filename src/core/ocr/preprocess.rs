//! OCR 前的固定预处理：裁剪 -> 灰度 -> 可选降噪 -> 可选直方图均衡

use crate::core::config::{CropRect, PreprocessConfig};
use image::{imageops, GrayImage, Luma, RgbImage};

pub fn prepare(image: &RgbImage, crop: &CropRect, config: &PreprocessConfig) -> GrayImage {
    let (x, y, w, h) = crop.clamp_to(image.width(), image.height());
    if w == 0 || h == 0 {
        return GrayImage::new(0, 0);
    }

    let cropped = imageops::crop_imm(image, x, y, w, h).to_image();
    let mut gray = imageops::grayscale(&cropped);

    if config.denoise {
        gray = median_3x3(&gray);
    }
    if config.equalize {
        equalize_histogram(&mut gray);
    }
    gray
}

/// 3x3 中值滤波，边缘像素复制
pub fn median_3x3(gray: &GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return gray.clone();
    }

    let mut out = GrayImage::new(w, h);
    let mut window = [0u8; 9];
    for y in 0..h {
        for x in 0..w {
            let mut n = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                    let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                    window[n] = gray.get_pixel(sx, sy).0[0];
                    n += 1;
                }
            }
            window.sort_unstable();
            out.put_pixel(x, y, Luma([window[4]]));
        }
    }
    out
}

/// 基于累积分布的直方图均衡
pub fn equalize_histogram(gray: &mut GrayImage) {
    let total = gray.pixels().len() as u64;
    if total == 0 {
        return;
    }

    let mut hist = [0u64; 256];
    for p in gray.pixels() {
        hist[p.0[0] as usize] += 1;
    }

    let mut cdf = [0u64; 256];
    let mut acc = 0u64;
    for (i, &count) in hist.iter().enumerate() {
        acc += count;
        cdf[i] = acc;
    }

    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    if total == cdf_min {
        // 单一灰度，无需均衡
        return;
    }

    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        let scaled = (cdf[i].saturating_sub(cdf_min)) as f64 * 255.0 / (total - cdf_min) as f64;
        *slot = scaled.round().clamp(0.0, 255.0) as u8;
    }

    for p in gray.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
    }
}
