pub mod aligner;
pub mod cache;
pub mod config;
pub mod corpus;
pub mod error;
pub mod ocr;
pub mod pipeline;
pub mod similarity;
pub mod table;
pub mod video;

pub use aligner::AlignmentResult;
pub use cache::{CacheKey, FrameCache};
pub use config::{AlignConfig, CropRect, PreprocessConfig, SamplingConfig};
pub use corpus::{FrameRecord, SlideRecord};
pub use error::AlignError;
pub use pipeline::{AlignmentOutcome, AlignmentPipeline, CancelToken, SlideInput};
pub use similarity::SimilarityMatrix;
pub use table::LabeledTable;
