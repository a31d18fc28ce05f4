use image::{imageops, RgbImage};

/// 解码后的一帧（RGB）
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub frame_index: u64,
}

impl Frame {
    pub fn new(image: RgbImage, frame_index: u64) -> Self {
        Self { image, frame_index }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// 按比例缩放，factor == 1.0 时不做处理
    pub fn scaled(&self, factor: f32) -> RgbImage {
        if (factor - 1.0).abs() < f32::EPSILON {
            return self.image.clone();
        }
        let (w, h) = scaled_dimensions(self.width(), self.height(), factor);
        imageops::resize(&self.image, w, h, imageops::FilterType::Triangle)
    }
}

pub fn scaled_dimensions(width: u32, height: u32, factor: f32) -> (u32, u32) {
    let w = ((width as f32 * factor).round() as u32).max(1);
    let h = ((height as f32 * factor).round() as u32).max(1);
    (w, h)
}

/// 原生层传入的 YUV420 帧（Android MediaCodec 等）
#[derive(Debug)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub y_plane: Vec<u8>,
    pub u_plane: Vec<u8>,
    pub v_plane: Vec<u8>,
}

impl RawFrame {
    pub fn to_rgb(&self) -> RgbImage {
        let mut rgb = RgbImage::new(self.width, self.height);
        let half_w = (self.width / 2).max(1);

        for (x, y, pixel) in rgb.enumerate_pixels_mut() {
            let y_idx = (y * self.width + x) as usize;
            let uv_idx = ((y / 2) * half_w + x / 2) as usize;

            let y_val = self.y_plane.get(y_idx).copied().unwrap_or(0) as f32;
            let u_val = self.u_plane.get(uv_idx).copied().unwrap_or(128) as f32 - 128.0;
            let v_val = self.v_plane.get(uv_idx).copied().unwrap_or(128) as f32 - 128.0;

            let r = (y_val + 1.402 * v_val).clamp(0.0, 255.0) as u8;
            let g = (y_val - 0.344136 * u_val - 0.714136 * v_val).clamp(0.0, 255.0) as u8;
            let b = (y_val + 1.772 * u_val).clamp(0.0, 255.0) as u8;
            *pixel = image::Rgb([r, g, b]);
        }

        rgb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_scaled() {
        let frame = Frame::new(RgbImage::from_pixel(100, 60, image::Rgb([255, 255, 255])), 30);
        let scaled = frame.scaled(0.5);
        assert_eq!(scaled.dimensions(), (50, 30));

        let same = frame.scaled(1.0);
        assert_eq!(same.dimensions(), (100, 60));
    }

    #[test]
    fn test_scaled_dimensions_never_zero() {
        assert_eq!(scaled_dimensions(3, 3, 0.1), (1, 1));
        assert_eq!(scaled_dimensions(1920, 1080, 0.3), (576, 324));
    }

    #[test]
    fn test_yuv_to_rgb_gray() {
        let (width, height) = (64u32, 64u32);
        let raw = RawFrame {
            width,
            height,
            y_plane: vec![128u8; (width * height) as usize],
            u_plane: vec![128u8; (width * height / 4) as usize],
            v_plane: vec![128u8; (width * height / 4) as usize],
        };

        let rgb = raw.to_rgb();
        assert_eq!(rgb.dimensions(), (width, height));
        assert_eq!(rgb.get_pixel(10, 10).0, [128, 128, 128]);
    }
}
