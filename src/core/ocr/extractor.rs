use crate::core::error::AlignError;
use image::{DynamicImage, GrayImage, ImageOutputFormat};
use log::{debug, error};
use std::io::{Cursor, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};

/// 文字提取能力：图像 -> 文本
///
/// 实现必须可以跨线程共享；空白或低文字量的图像应返回空字符串而不是错误。
pub trait TextExtractor: Send + Sync {
    fn extract(&self, image: &GrayImage) -> Result<String, AlignError>;
}

/// 调用 tesseract 可执行文件，图像通过 stdin 以 PNG 传入
#[derive(Debug, Clone)]
pub struct TesseractExtractor {
    command: String,
    language: String,
    psm: Option<u32>,
}

impl TesseractExtractor {
    pub fn new() -> Self {
        Self {
            command: "tesseract".to_string(),
            language: "kor+eng".to_string(),
            psm: None,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_psm(mut self, psm: u32) -> Self {
        self.psm = Some(psm);
        self
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            self.language.clone(),
        ];
        if let Some(psm) = self.psm {
            args.push("--psm".to_string());
            args.push(psm.to_string());
        }
        args
    }
}

impl Default for TesseractExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor for TesseractExtractor {
    fn extract(&self, image: &GrayImage) -> Result<String, AlignError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(String::new());
        }

        let png = encode_png(image)?;

        let mut child = Command::new(&self.command)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AlignError::Extractor(format!("failed to run {}: {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&png) {
                // 进程提前退出（如缺少语言包），回收后再报错
                drop(stdin);
                let _ = child.kill();
                let output = child.wait_with_output()?;
                let stderr = String::from_utf8_lossy(&output.stderr);
                error!("❌ {} exited before reading input: {}", self.command, stderr.trim());
                return Err(AlignError::Extractor(format!(
                    "{} exited before reading input: {}",
                    self.command, e
                )));
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("❌ tesseract failed: {}", stderr.trim());
            return Err(AlignError::Extractor(stderr.trim().to_string()));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("tesseract: {} chars", text.chars().count());
        Ok(text)
    }
}

fn encode_png(image: &GrayImage) -> Result<Vec<u8>, AlignError> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image.clone()).write_to(&mut buffer, ImageOutputFormat::Png)?;
    Ok(buffer.into_inner())
}

type ExtractFn = Box<dyn Fn(&GrayImage) -> Result<String, AlignError> + Send + Sync>;

/// 测试替身：按图像内容返回预设文本，并统计调用次数
pub struct MockTextExtractor {
    extract_fn: ExtractFn,
    calls: AtomicUsize,
}

impl MockTextExtractor {
    pub fn with_pattern<F>(pattern: F) -> Self
    where
        F: Fn(&GrayImage) -> String + Send + Sync + 'static,
    {
        Self {
            extract_fn: Box::new(move |img: &GrayImage| Ok(pattern(img))),
            calls: AtomicUsize::new(0),
        }
    }

    /// 以左上角像素亮度作为图像标识
    pub fn with_texts_by_luma(texts: Vec<(u8, String)>) -> Self {
        Self::with_pattern(move |img| {
            let luma = img.get_pixel_checked(0, 0).map(|p| p.0[0]);
            texts
                .iter()
                .find(|(key, _)| Some(*key) == luma)
                .map(|(_, text)| text.clone())
                .unwrap_or_default()
        })
    }

    /// 对满足条件的图像返回错误
    pub fn failing_when<F>(predicate: F) -> Self
    where
        F: Fn(&GrayImage) -> bool + Send + Sync + 'static,
    {
        Self {
            extract_fn: Box::new(move |img: &GrayImage| {
                if predicate(img) {
                    Err(AlignError::Extractor("mock failure".into()))
                } else {
                    Ok("ok".to_string())
                }
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextExtractor for MockTextExtractor {
    fn extract(&self, image: &GrayImage) -> Result<String, AlignError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.extract_fn)(image)
    }
}
