//! TF-IDF 向量空间与余弦相似度矩阵
//!
//! 词表和文档频率在幻灯片语料与帧语料的并集上统一拟合，两边的向量处于同一组基下。

use crate::core::error::AlignError;
use log::debug;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};

// 两个及以上的词字符
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w\w+\b").unwrap());

pub fn tokenize(doc: &str) -> Vec<String> {
    let lowered = doc.to_lowercase();
    TOKEN_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// 稀疏向量，按词 id 升序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVec {
    entries: Vec<(usize, f32)>,
}

impl SparseVec {
    pub fn is_zero(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(usize, f32)] {
        &self.entries
    }

    pub fn norm(&self) -> f32 {
        self.entries.iter().map(|(_, v)| v * v).sum::<f32>().sqrt()
    }

    /// 两个有序稀疏向量的点积
    pub fn dot(&self, other: &SparseVec) -> f64 {
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0f64;
        while i < self.entries.len() && j < other.entries.len() {
            let (ti, vi) = self.entries[i];
            let (tj, vj) = other.entries[j];
            match ti.cmp(&tj) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += f64::from(vi) * f64::from(vj);
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// 原始词频 + 平滑 idf `ln((1 + n) / (1 + df)) + 1` + L2 归一化
#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
}

impl TfidfVectorizer {
    pub fn fit_transform(docs: &[&str]) -> (Self, Vec<SparseVec>) {
        let tokenized: Vec<Vec<String>> = docs.iter().map(|d| tokenize(d)).collect();

        let terms: BTreeSet<&str> = tokenized.iter().flatten().map(String::as_str).collect();
        let vocabulary: HashMap<String, usize> = terms
            .iter()
            .enumerate()
            .map(|(id, term)| (term.to_string(), id))
            .collect();

        let mut df = vec![0u32; vocabulary.len()];
        for tokens in &tokenized {
            let unique: BTreeSet<usize> = tokens.iter().map(|t| vocabulary[t]).collect();
            for id in unique {
                df[id] += 1;
            }
        }

        let n = docs.len() as f64;
        let idf: Vec<f32> = df
            .iter()
            .map(|&d| (((1.0 + n) / (1.0 + f64::from(d))).ln() + 1.0) as f32)
            .collect();

        let vectorizer = Self { vocabulary, idf };
        let vectors = tokenized.iter().map(|t| vectorizer.weigh(t)).collect();
        (vectorizer, vectors)
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    fn weigh(&self, tokens: &[String]) -> SparseVec {
        let mut counts: BTreeMap<usize, u32> = BTreeMap::new();
        for token in tokens {
            if let Some(&id) = self.vocabulary.get(token) {
                *counts.entry(id).or_insert(0) += 1;
            }
        }

        let mut entries: Vec<(usize, f32)> = counts
            .into_iter()
            .map(|(id, count)| (id, count as f32 * self.idf[id]))
            .collect();

        let norm = entries.iter().map(|(_, v)| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (_, v) in entries.iter_mut() {
                *v /= norm;
            }
        }
        SparseVec { entries }
    }
}

/// slides x frames 相似度矩阵，行列与记录列表按位置一一对应
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl SimilarityMatrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, AlignError> {
        if data.len() != rows * cols {
            return Err(AlignError::MatrixShapeMismatch {
                expected: (rows, cols),
                actual: (data.len() / cols.max(1), cols),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }
}

/// 在并集上拟合 TF-IDF，计算每个幻灯片与每个帧的余弦相似度
pub fn cross_similarity(
    slide_texts: &[&str],
    frame_texts: &[&str],
) -> Result<SimilarityMatrix, AlignError> {
    let docs: Vec<&str> = slide_texts.iter().chain(frame_texts.iter()).copied().collect();
    let (vectorizer, vectors) = TfidfVectorizer::fit_transform(&docs);
    debug!(
        "TF-IDF: {} docs, {} terms",
        docs.len(),
        vectorizer.vocabulary_len()
    );

    let (slide_vecs, frame_vecs) = vectors.split_at(slide_texts.len());

    let rows: Vec<Vec<f32>> = slide_vecs
        .par_iter()
        .map(|s| {
            frame_vecs
                .iter()
                .map(|f| s.dot(f).clamp(0.0, 1.0) as f32)
                .collect()
        })
        .collect();

    let data: Vec<f32> = rows.into_iter().flatten().collect();
    SimilarityMatrix::new(slide_texts.len(), frame_texts.len(), data)
}
