pub mod frame;
pub mod library;
pub mod sampler;
pub mod source;

pub use frame::{Frame, RawFrame};
pub use library::{list_videos, VideoFileInfo};
pub use sampler::{FrameSampler, SampledFrame};
pub use source::{FfmpegSource, FrameDirSource, MemorySource, VideoSource};
