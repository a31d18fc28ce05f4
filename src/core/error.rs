use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignError {
    /// 视频或幻灯片图像无法打开
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),
    /// 幻灯片或采样帧为空
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
    /// 图像中没有文字。流水线内部会转换为空字符串，不会作为错误返回
    #[error("Extraction yielded no text")]
    ExtractionEmpty,
    #[error("Cache corrupt: {0}")]
    CacheCorrupt(String),
    /// 语料规模与矩阵维度不一致，属于程序缺陷
    #[error("Matrix shape mismatch: expected {expected:?}, got {actual:?}")]
    MatrixShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Alignment cancelled")]
    Cancelled,
    #[error("Text extractor error: {0}")]
    Extractor(String),
    #[error("Table parse error: {0}")]
    Table(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
