//! 对齐流水线
//!
//! 视频 -> 抽帧 -> OCR -> 语料 -> TF-IDF 相似度 -> 每个幻灯片的最佳帧
//!
//! 解码严格顺序执行；幻灯片与帧的 OCR 在有界线程池中并行，结果按原顺序收集。

use crate::core::aligner::{self, AlignmentResult};
use crate::core::cache::{slide_fingerprint, CacheKey, FrameCache, SlideText};
use crate::core::config::AlignConfig;
use crate::core::corpus::{Corpus, FrameRecord, SlideRecord};
use crate::core::error::AlignError;
use crate::core::ocr::{normalize_text, read_region, TextExtractor};
use crate::core::similarity::{cross_similarity, SimilarityMatrix};
use crate::core::video::sampler::{FrameSampler, SampledFrame};
use crate::core::video::source::VideoSource;
use image::RgbImage;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// 取消标记，可在多个线程间共享
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 幻灯片输入：图像需要 OCR，文本直接使用
#[derive(Debug, Clone)]
pub enum SlideInput {
    Image(RgbImage),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct AlignmentOutcome {
    pub results: Vec<AlignmentResult>,
    pub slides: Vec<SlideRecord>,
    pub frames: Vec<FrameRecord>,
    pub matrix: SimilarityMatrix,
}

impl AlignmentOutcome {
    /// 幻灯片对应的最佳帧
    pub fn evidence(&self, slide_index: usize) -> Option<&FrameRecord> {
        let result = self.results.get(slide_index)?;
        self.frames
            .binary_search_by_key(&result.chosen_frame_index, |f| f.frame_index)
            .ok()
            .map(|pos| &self.frames[pos])
    }

    pub fn flagged_count(&self) -> usize {
        self.results.iter().filter(|r| r.flagged).count()
    }
}

pub struct AlignmentPipeline {
    config: AlignConfig,
    extractor: Arc<dyn TextExtractor>,
    pool: rayon::ThreadPool,
    cancel: CancelToken,
}

impl AlignmentPipeline {
    pub fn new(config: AlignConfig, extractor: Arc<dyn TextExtractor>) -> Result<Self, AlignError> {
        config.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("slide-align-ocr-{}", i))
            .build()
            .map_err(|e| AlignError::InvalidConfig(format!("thread pool: {}", e)))?;

        debug!("AlignmentPipeline: {} OCR workers", config.workers);
        Ok(Self {
            config,
            extractor,
            pool,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    pub fn align<S: VideoSource>(
        &self,
        slides: &[SlideInput],
        video: S,
        cache: Option<&FrameCache>,
        key: &CacheKey,
    ) -> Result<AlignmentOutcome, AlignError> {
        self.align_with(slides, || Ok(video), cache, key)
    }

    pub fn align_results<S: VideoSource>(
        &self,
        slides: &[SlideInput],
        video: S,
        cache: Option<&FrameCache>,
        key: &CacheKey,
    ) -> Result<Vec<AlignmentResult>, AlignError> {
        self.align(slides, video, cache, key).map(|outcome| outcome.results)
    }

    /// 视频只在缓存未命中时才打开
    pub fn align_with<S, F>(
        &self,
        slides: &[SlideInput],
        open_video: F,
        cache: Option<&FrameCache>,
        key: &CacheKey,
    ) -> Result<AlignmentOutcome, AlignError>
    where
        S: VideoSource,
        F: FnOnce() -> Result<S, AlignError>,
    {
        if slides.is_empty() {
            return Err(AlignError::InsufficientData("no slides".into()));
        }

        let started = Instant::now();
        info!("🚀 Aligning {} slides against {}", slides.len(), key.video);

        let (slide_records, pending) = self.read_slides(slides, cache)?;
        let frame_records = self.frames_for(open_video, cache, key)?;
        let outcome = self.align_records(slide_records, frame_records)?;

        // 幻灯片文字只在整次对齐成功后写入
        if let Some(cache) = cache {
            for (fingerprint, text) in &pending {
                cache.store_slide_text(fingerprint, text)?;
            }
            debug!("Stored text of {} slides", pending.len());
        }

        info!(
            "✅ Alignment complete: {} slides, {} flagged, {:?}",
            outcome.results.len(),
            outcome.flagged_count(),
            started.elapsed()
        );
        Ok(outcome)
    }

    /// 语料 -> 相似度矩阵 -> 逐行取最佳帧
    pub fn align_records(
        &self,
        slides: Vec<SlideRecord>,
        frames: Vec<FrameRecord>,
    ) -> Result<AlignmentOutcome, AlignError> {
        let (matrix, results) = {
            let corpus = Corpus::build(&slides, &frames)?;
            let matrix = cross_similarity(&corpus.slide_texts(), &corpus.frame_texts())?;
            if matrix.rows() != corpus.slide_count() || matrix.cols() != corpus.frame_count() {
                return Err(AlignError::MatrixShapeMismatch {
                    expected: (corpus.slide_count(), corpus.frame_count()),
                    actual: (matrix.rows(), matrix.cols()),
                });
            }
            let results = aligner::align(&matrix, &corpus.frame_indices(), self.config.threshold)?;
            (matrix, results)
        };

        Ok(AlignmentOutcome {
            results,
            slides,
            frames,
            matrix,
        })
    }

    pub fn extract_slides(&self, slides: &[SlideInput]) -> Result<Vec<SlideRecord>, AlignError> {
        self.read_slides(slides, None).map(|(records, _)| records)
    }

    /// 返回幻灯片记录以及待写入缓存的新文字
    fn read_slides(
        &self,
        slides: &[SlideInput],
        cache: Option<&FrameCache>,
    ) -> Result<(Vec<SlideRecord>, Vec<(String, SlideText)>), AlignError> {
        let outcomes: Vec<Option<Result<(SlideRecord, Option<String>), AlignError>>> =
            self.pool.install(|| {
                slides
                    .par_iter()
                    .enumerate()
                    .map(|(index, input)| {
                        if self.cancel.is_cancelled() {
                            return None;
                        }
                        Some(self.read_slide(index, input, cache))
                    })
                    .collect()
            });

        if self.cancel.is_cancelled() {
            return Err(AlignError::Cancelled);
        }

        let mut records = Vec::with_capacity(outcomes.len());
        let mut pending = Vec::new();
        for outcome in outcomes.into_iter().flatten() {
            let (record, fingerprint) = outcome?;
            if let Some(fingerprint) = fingerprint {
                pending.push((
                    fingerprint,
                    SlideText {
                        raw_text: record.raw_text.clone(),
                        normalized_text: record.normalized_text.clone(),
                    },
                ));
            }
            records.push(record);
        }

        info!(
            "📝 Extracted text from {} slides, {} new to cache",
            records.len(),
            pending.len()
        );
        Ok((records, pending))
    }

    /// 缓存命中时不调用提取器；新提取的图像幻灯片附带其指纹
    fn read_slide(
        &self,
        index: usize,
        input: &SlideInput,
        cache: Option<&FrameCache>,
    ) -> Result<(SlideRecord, Option<String>), AlignError> {
        let image = match input {
            SlideInput::Image(image) => image,
            SlideInput::Text(text) => {
                let record = SlideRecord {
                    index,
                    raw_text: text.clone(),
                    normalized_text: normalize_text(text),
                };
                return Ok((record, None));
            }
        };

        let crop = self.config.slide_crop;
        let preprocess = self.config.preprocess;

        let fingerprint = match cache {
            Some(cache) => {
                let fingerprint = slide_fingerprint(image, &crop, &preprocess)?;
                match cache.load_slide_text(&fingerprint) {
                    Ok(Some(text)) => {
                        let record = SlideRecord {
                            index,
                            raw_text: text.raw_text,
                            normalized_text: text.normalized_text,
                        };
                        return Ok((record, None));
                    }
                    Ok(None) => {}
                    Err(AlignError::CacheCorrupt(reason)) if self.config.rebuild_corrupt_cache => {
                        warn!("⚠️ Slide {} text cache corrupt ({}), re-reading", index, reason);
                    }
                    Err(e) => return Err(e),
                }
                Some(fingerprint)
            }
            None => None,
        };

        let (raw_text, normalized_text) =
            read_region(self.extractor.as_ref(), image, &crop, &preprocess);
        let record = SlideRecord {
            index,
            raw_text,
            normalized_text,
        };
        Ok((record, fingerprint))
    }

    fn frames_for<S, F>(
        &self,
        open_video: F,
        cache: Option<&FrameCache>,
        key: &CacheKey,
    ) -> Result<Vec<FrameRecord>, AlignError>
    where
        S: VideoSource,
        F: FnOnce() -> Result<S, AlignError>,
    {
        let mut opener = Some(open_video);
        let mut build = || -> Result<Vec<FrameRecord>, AlignError> {
            let open = opener
                .take()
                .ok_or_else(|| AlignError::SourceUnavailable("video already consumed".into()))?;
            let mut source = open()?;
            self.extract_frames(&mut source)
        };

        let Some(cache) = cache else {
            return build();
        };

        match cache.get_or_build(key, &mut build) {
            Err(AlignError::CacheCorrupt(reason)) if self.config.rebuild_corrupt_cache => {
                warn!("⚠️ Cache corrupt ({}), rebuilding", reason);
                cache.invalidate(key)?;
                cache.get_or_build(key, &mut build).map(|entry| entry.frames)
            }
            other => other.map(|entry| entry.frames),
        }
    }

    /// 顺序解码，按批并行 OCR
    pub fn extract_frames(&self, source: &mut dyn VideoSource) -> Result<Vec<FrameRecord>, AlignError> {
        let sampling = &self.config.sampling;
        let batch_size = self.config.batch_size;
        let started = Instant::now();

        let sampler = FrameSampler::new(source, sampling.stride, sampling.start_offset, sampling.scale)
            .with_cancel(self.cancel.clone());

        let mut frames = Vec::new();
        let mut batch = Vec::with_capacity(batch_size);
        for sampled in sampler {
            batch.push(sampled);
            if batch.len() >= batch_size {
                frames.extend(self.extract_batch(std::mem::take(&mut batch))?);
            }
        }
        if !batch.is_empty() {
            frames.extend(self.extract_batch(batch)?);
        }

        if self.cancel.is_cancelled() {
            return Err(AlignError::Cancelled);
        }

        info!(
            "🎞️ Extracted text from {} frames in {:?}",
            frames.len(),
            started.elapsed()
        );
        Ok(frames)
    }

    fn extract_batch(&self, batch: Vec<SampledFrame>) -> Result<Vec<FrameRecord>, AlignError> {
        let crop = self.config.sampling.frame_crop;
        let preprocess = self.config.preprocess;
        let extractor = self.extractor.as_ref();
        debug!("OCR batch of {} frames", batch.len());

        let records: Vec<Option<FrameRecord>> = self.pool.install(|| {
            batch
                .into_par_iter()
                .map(|sampled| {
                    if self.cancel.is_cancelled() {
                        return None;
                    }
                    let (raw_text, normalized_text) =
                        read_region(extractor, &sampled.image, &crop, &preprocess);
                    Some(FrameRecord {
                        frame_index: sampled.frame_index,
                        image: sampled.image,
                        raw_text,
                        normalized_text,
                    })
                })
                .collect()
        });

        if self.cancel.is_cancelled() {
            return Err(AlignError::Cancelled);
        }

        let skip_empty = self.config.skip_empty_frames;
        Ok(records
            .into_iter()
            .flatten()
            .filter(|r| !(skip_empty && r.normalized_text.is_empty()))
            .collect())
    }
}
