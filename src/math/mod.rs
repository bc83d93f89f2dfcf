// Vector math primitives shared by the store and the embedding chain.
// Everything here is strict: mismatched inputs are an error, never a guess.


use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MathError {
    #[error("Vector dimensions do not match: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("Operation requires a non-empty vector")]
    EmptyInput,
}

/// A single scored candidate produced by [`top_k`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredIndex {
    pub index: usize,
    pub similarity: f32,
}

/// An 8-bit quantized vector together with the range needed to restore it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedVector {
    pub values: Vec<u8>,
    pub min: f32,
    pub max: f32,
}

fn check_lengths(a: &[f32], b: &[f32]) -> Result<(), MathError> {
    if a.len() != b.len() {
        return Err(MathError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    if a.is_empty() {
        return Err(MathError::EmptyInput);
    }
    Ok(())
}

#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32, MathError> {
    check_lengths(a, b)?;
    Ok(a.iter().zip(b).map(|(x, y)| x * y).sum())
}

#[inline]
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine of the angle between two vectors, in `[-1, 1]`.
///
/// A zero vector on either side scores 0.0 rather than NaN.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, MathError> {
    let dot = dot_product(a, b)?;
    let denom = magnitude(a) * magnitude(b);
    if denom == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / denom).clamp(-1.0, 1.0))
}

#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32, MathError> {
    check_lengths(a, b)?;
    Ok(a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt())
}

/// Scale a vector to unit length. The zero vector is returned unchanged.
#[inline]
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = magnitude(v);
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

#[inline]
pub fn normalize_in_place(v: &mut [f32]) {
    let norm = magnitude(v);
    if norm == 0.0 {
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Map each component onto `0..=255` using the vector's own min/max
#[inline]
pub fn quantize(v: &[f32]) -> QuantizedVector {
    let (min, max) = v
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &x| {
            (lo.min(x), hi.max(x))
        });
    if v.is_empty() {
        return QuantizedVector {
            values: Vec::new(),
            min: 0.0,
            max: 0.0,
        };
    }

    let range = max - min;
    let values = v
        .iter()
        .map(|&x| {
            if range == 0.0 {
                0
            } else {
                (((x - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8
            }
        })
        .collect();

    QuantizedVector { values, min, max }
}

/// Restore an approximation of the original vector. Precision is `range / 255`.
#[inline]
pub fn dequantize(q: &QuantizedVector) -> Vec<f32> {
    let range = q.max - q.min;
    q.values
        .iter()
        .map(|&b| (f32::from(b) / 255.0).mul_add(range, q.min))
        .collect()
}

/// Score every candidate against `query`, keep those at or above `min_similarity`,
/// and return the best `k` in descending order. Equal scores keep candidate order.
#[inline]
pub fn top_k<V: AsRef<[f32]>>(
    query: &[f32],
    candidates: &[V],
    k: usize,
    min_similarity: f32,
) -> Result<Vec<ScoredIndex>, MathError> {
    let mut scored = Vec::with_capacity(candidates.len());
    for (index, candidate) in candidates.iter().enumerate() {
        let similarity = cosine_similarity(query, candidate.as_ref())?;
        if similarity >= min_similarity {
            scored.push(ScoredIndex { index, similarity });
        }
    }

    sort_descending(&mut scored, |s| s.similarity);
    scored.truncate(k);
    Ok(scored)
}

/// Stable descending sort on an `f32` key; NaN sorts last
#[inline]
pub fn sort_descending<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> f32,
{
    items.sort_by(|a, b| {
        key(b)
            .partial_cmp(&key(a))
            .unwrap_or_else(|| key(a).is_nan().cmp(&key(b).is_nan()))
    });
}
