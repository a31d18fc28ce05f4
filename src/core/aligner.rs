use crate::core::error::AlignError;
use crate::core::similarity::SimilarityMatrix;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub slide_index: usize,
    pub chosen_frame_index: u64,
    pub score: f32,
    /// score <= threshold
    pub flagged: bool,
}

/// 每个幻灯片独立取最佳帧。并列时取扫描顺序中第一个最大值（帧下标最小）
pub fn align(
    matrix: &SimilarityMatrix,
    frame_indices: &[u64],
    threshold: f32,
) -> Result<Vec<AlignmentResult>, AlignError> {
    if frame_indices.len() != matrix.cols() || matrix.cols() == 0 {
        return Err(AlignError::MatrixShapeMismatch {
            expected: (matrix.rows(), frame_indices.len()),
            actual: (matrix.rows(), matrix.cols()),
        });
    }

    let results = (0..matrix.rows())
        .map(|i| {
            let (best_col, score) = best_in_row(matrix.row(i));
            AlignmentResult {
                slide_index: i,
                chosen_frame_index: frame_indices[best_col],
                score,
                flagged: score <= threshold,
            }
        })
        .collect();

    Ok(results)
}

fn best_in_row(row: &[f32]) -> (usize, f32) {
    let mut best = (0, row[0]);
    for (j, &value) in row.iter().enumerate().skip(1) {
        if value > best.1 {
            best = (j, value);
        }
    }
    best
}
