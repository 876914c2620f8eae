use std::{fmt, str::FromStr};

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Similarity metric of a nearest-neighbour index.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Inner product over L2-normalized vectors. Similarity in `[-1, 1]`.
    #[default]
    Cosine,
    /// Raw inner product.
    #[value(name = "ip")]
    #[serde(rename = "ip")]
    InnerProduct,
    /// Euclidean distance, reported as `1 / (1 + d²)` so higher is closer
    /// and the value lies in `(0, 1]`.
    L2,
}

impl IndexKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::InnerProduct => "ip",
            Self::L2 => "l2",
        }
    }

    /// Whether vectors are L2-normalized on insert and query.
    pub fn normalizes(self) -> bool {
        self == Self::Cosine
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "ip" | "inner_product" => Ok(Self::InnerProduct),
            "l2" => Ok(Self::L2),
            other => {
                Err(Error::Config(format!("unknown index kind '{other}'")))
            }
        }
    }
}

/// A nearest-neighbour index over fixed-dimension embeddings.
///
/// Row `i` of the index is the passage with `vector_id == i`.
pub trait NearestNeighbors: Send + Sync {
    fn dimension(&self) -> usize;

    fn kind(&self) -> IndexKind;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append vectors; each must have exactly [`Self::dimension`] entries.
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()>;

    /// Return up to `k` `(vector_id, similarity)` pairs, most similar first.
    /// Equal similarities keep index order.
    fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<(u64, f32)>>;
}

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Exact (brute-force) index. Scores every row with one matrix product.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    kind: IndexKind,
    dimension: usize,
    /// Row-major `[len, dimension]`.
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize, kind: IndexKind) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::out_of_range("dimension", 0, ">= 1"));
        }
        Ok(Self {
            kind,
            dimension,
            data: Vec::new(),
        })
    }

    /// Rebuild an index from rows previously read through [`Self::vector`].
    /// Rows are taken as stored, without re-normalizing.
    pub fn from_rows(
        dimension: usize,
        kind: IndexKind,
        data: Vec<f32>,
    ) -> Result<Self> {
        let mut index = Self::new(dimension, kind)?;
        if data.len() % dimension != 0 {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: data.len() % dimension,
            });
        }
        index.data = data;
        Ok(index)
    }

    /// The stored (possibly normalized) vector for `vector_id`.
    pub fn vector(&self, vector_id: u64) -> Option<&[f32]> {
        let start =
            usize::try_from(vector_id).ok()?.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn scores(&self, query: &[f32]) -> Result<Vec<f32>> {
        let rows = self.len();
        let device = default_device();
        let matrix =
            Tensor::from_slice(&self.data, (rows, self.dimension), &device)?;
        let column = Tensor::from_slice(query, (self.dimension, 1), &device)?;

        // [rows, 1] = matrix @ query
        let dots = matrix.matmul(&column)?.flatten_all()?.to_vec1::<f32>()?;

        match self.kind {
            IndexKind::Cosine | IndexKind::InnerProduct => Ok(dots),
            IndexKind::L2 => {
                let row_norms = matrix.sqr()?.sum(1)?.to_vec1::<f32>()?;
                let query_norm: f32 = query.iter().map(|x| x * x).sum();
                Ok(dots
                    .iter()
                    .zip(row_norms)
                    .map(|(dot, norm)| {
                        let squared = (norm - 2.0 * dot + query_norm).max(0.0);
                        1.0 / (1.0 + squared)
                    })
                    .collect())
            }
        }
    }
}

impl NearestNeighbors for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn kind(&self) -> IndexKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        for vector in vectors {
            self.check_dimension(vector)?;
        }
        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            if self.kind.normalizes() {
                self.data.extend(normalized(vector));
            } else {
                self.data.extend_from_slice(vector);
            }
        }
        Ok(())
    }

    fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        self.check_dimension(embedding)?;
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = if self.kind.normalizes() {
            normalized(embedding)
        } else {
            embedding.to_vec()
        };

        let mut ranked: Vec<(u64, f32)> = self
            .scores(&query)?
            .into_iter()
            .enumerate()
            .map(|(i, score)| (i as u64, score))
            .collect();

        // Stable sort keeps index order among equal scores.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(k);
        Ok(ranked)
    }
}

/// L2-normalize a vector. Zero vectors are returned unchanged.
pub fn normalized(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|x| x / norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(kind: IndexKind, rows: &[[f32; 3]]) -> FlatIndex {
        let mut index = FlatIndex::new(3, kind).unwrap();
        let vectors: Vec<Vec<f32>> = rows.iter().map(|r| r.to_vec()).collect();
        index.add(&vectors).unwrap();
        index
    }

    #[test]
    fn cosine_ranks_by_angle() {
        let index = index_with(
            IndexKind::Cosine,
            &[[0.0, 1.0, 0.0], [2.0, 0.0, 0.0], [1.0, 1.0, 0.0]],
        );
        let hits = index.query(&[3.0, 0.0, 0.0], 3).unwrap();
        let ids: Vec<u64> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 0]);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert!(hits[2].1.abs() < 1e-6);
    }

    #[test]
    fn inner_product_keeps_magnitude() {
        let index = index_with(
            IndexKind::InnerProduct,
            &[[1.0, 0.0, 0.0], [5.0, 0.0, 0.0]],
        );
        let hits = index.query(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].0, 1);
        assert!((hits[0].1 - 5.0).abs() < 1e-6);
    }

    #[test]
    fn l2_reports_closeness() {
        let index = index_with(
            IndexKind::L2,
            &[[10.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
        );
        let hits = index.query(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].0, 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert!((hits[1].1 - 1.0 / 82.0).abs() < 1e-6);
    }

    #[test]
    fn ties_keep_index_order() {
        let index = index_with(
            IndexKind::InnerProduct,
            &[[1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
        );
        let hits = index.query(&[1.0, 0.0, 0.0], 3).unwrap();
        let ids: Vec<u64> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn k_truncates() {
        let index = index_with(
            IndexKind::Cosine,
            &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        );
        assert_eq!(index.query(&[1.0, 1.0, 1.0], 2).unwrap().len(), 2);
        assert!(index.query(&[1.0, 1.0, 1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = FlatIndex::new(3, IndexKind::Cosine).unwrap();
        let err = index.add(&[vec![1.0, 2.0]]).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert!(index.is_empty());

        let err = index.query(&[1.0; 4], 1).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { actual: 4, .. }));
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = FlatIndex::new(3, IndexKind::L2).unwrap();
        assert!(index.query(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn zero_dimension_is_out_of_range() {
        assert!(matches!(
            FlatIndex::new(0, IndexKind::Cosine),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn cosine_rows_are_stored_normalized() {
        let index = index_with(IndexKind::Cosine, &[[3.0, 4.0, 0.0]]);
        let row = index.vector(0).unwrap();
        assert!((row[0] - 0.6).abs() < 1e-6);
        assert!((row[1] - 0.8).abs() < 1e-6);
        assert!(index.vector(1).is_none());
    }

    #[test]
    fn kind_round_trips_through_str() {
        let kinds = [IndexKind::Cosine, IndexKind::InnerProduct, IndexKind::L2];
        for kind in kinds {
            assert_eq!(kind.as_str().parse::<IndexKind>().unwrap(), kind);
        }
    }
}
