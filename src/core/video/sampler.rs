use crate::core::pipeline::CancelToken;
use crate::core::video::frame::Frame;
use crate::core::video::source::VideoSource;
use image::RgbImage;
use log::{debug, warn};

/// 采样得到的帧（已缩放）
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub frame_index: u64,
    pub image: RgbImage,
}

/// 固定步长抽帧器
///
/// 下标为帧在流中的真实位置（0 起）。满足 `index >= start_offset` 且
/// `(index - start_offset) % stride == 0` 的帧会被采样，其余帧照常解码后丢弃。
/// 中途解码失败时序列在最后一个成功解码的帧处截断。
pub struct FrameSampler<'a> {
    source: &'a mut dyn VideoSource,
    stride: u64,
    start_offset: u64,
    scale: f32,
    next_index: u64,
    decoded: u64,
    finished: bool,
    cancel: Option<CancelToken>,
}

impl<'a> FrameSampler<'a> {
    pub fn new(source: &'a mut dyn VideoSource, stride: u32, start_offset: u64, scale: f32) -> Self {
        Self {
            source,
            stride: u64::from(stride.max(1)),
            start_offset,
            scale,
            next_index: 0,
            decoded: 0,
            finished: false,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// 已解码的帧数（含被丢弃的中间帧）
    pub fn decoded_frames(&self) -> u64 {
        self.decoded
    }

    fn is_sampled(&self, index: u64) -> bool {
        index >= self.start_offset && (index - self.start_offset) % self.stride == 0
    }
}

impl Iterator for FrameSampler<'_> {
    type Item = SampledFrame;

    fn next(&mut self) -> Option<SampledFrame> {
        while !self.finished {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                debug!("FrameSampler: cancelled after {} frames", self.decoded);
                self.finished = true;
                return None;
            }

            let image = match self.source.next_frame() {
                Ok(Some(image)) => image,
                Ok(None) => {
                    debug!("FrameSampler: end of stream after {} frames", self.decoded);
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    warn!(
                        "⚠️ Decode failed at frame {}, truncating: {}",
                        self.next_index, e
                    );
                    self.finished = true;
                    return None;
                }
            };

            let index = self.next_index;
            self.next_index += 1;
            self.decoded += 1;

            if self.is_sampled(index) {
                let frame = Frame::new(image, index);
                return Some(SampledFrame {
                    frame_index: index,
                    image: frame.scaled(self.scale),
                });
            }
        }
        None
    }
}
