use clausegraph_core::{NodeId, Result};
use rayon::prelude::*;
use std::cmp::Ordering;

use crate::VectorError;

/// Guards the division when a vector has zero length.
const NORM_EPS: f32 = 1e-12;

/// A training node selected for a similarity edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub node_id: NodeId,
    pub score: f32,
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale to unit length; a zero vector stays zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v).max(NORM_EPS);
    v.iter().map(|x| x / norm).collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch(a.len(), b.len()).into());
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    Ok(dot / (l2_norm(a).max(NORM_EPS) * l2_norm(b).max(NORM_EPS)))
}

/// Cosine similarity of `query` against every row of a row-major `matrix` of width `dim`.
pub fn cosine_scores(query: &[f32], matrix: &[f32], dim: usize) -> Result<Vec<f32>> {
    if dim == 0 {
        return Err(VectorError::EmptyVector.into());
    }
    if query.len() != dim {
        return Err(VectorError::DimensionMismatch(dim, query.len()).into());
    }
    if matrix.len() % dim != 0 {
        return Err(VectorError::DimensionMismatch(dim, matrix.len() % dim).into());
    }

    let unit_query = l2_normalize(query);
    Ok(matrix
        .par_chunks(dim)
        .map(|row| {
            let mut dot = 0.0f32;
            let mut norm_sq = 0.0f32;
            for (&x, &q) in row.iter().zip(&unit_query) {
                dot += x * q;
                norm_sq += x * x;
            }
            dot / norm_sq.sqrt().max(NORM_EPS)
        })
        .collect())
}

/// Highest `k` scores, descending; equal scores are ordered by ascending node id.
///
/// `k` larger than the candidate count returns every candidate. NaN scores rank last.
pub fn select_top_k(scores: &[f32], k: usize) -> Vec<Neighbor> {
    let mut ranked: Vec<Neighbor> = scores
        .iter()
        .enumerate()
        .map(|(node_id, &score)| Neighbor { node_id, score })
        .collect();

    let by_rank = |a: &Neighbor, b: &Neighbor| -> Ordering {
        let score_a = if a.score.is_nan() { f32::NEG_INFINITY } else { a.score };
        let score_b = if b.score.is_nan() { f32::NEG_INFINITY } else { b.score };
        score_b
            .total_cmp(&score_a)
            .then_with(|| a.node_id.cmp(&b.node_id))
    };

    let k = k.min(ranked.len());
    if k == 0 {
        return Vec::new();
    }
    if k < ranked.len() {
        ranked.select_nth_unstable_by(k - 1, by_rank);
        ranked.truncate(k);
    }
    ranked.sort_by(by_rank);
    ranked
}

pub fn top_k_cosine(query: &[f32], matrix: &[f32], dim: usize, k: usize) -> Result<Vec<Neighbor>> {
    let scores = cosine_scores(query, matrix, dim)?;
    Ok(select_top_k(&scores, k))
}
