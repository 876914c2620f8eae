use crate::{
    error::{Error, Result},
    index::normalized,
    text_util::{Matching, fold_str},
};

/// Default output dimension of [`HashingEmbedder`].
pub const DEFAULT_DIMENSION: usize = 256;

const TOKEN_WEIGHT: f32 = 1.0;
const BIGRAM_WEIGHT: f32 = 0.5;

/// Turns text into fixed-dimension vectors.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.encode(t)).collect()
    }
}

/// Feature-hashing embedder.
///
/// Each case-folded whitespace token and each character bigram inside a
/// token is hashed into one of `dimension` buckets with a signed weight.
/// The result is L2-normalized. Output depends only on the input text and
/// the dimension, so vectors stored on disk stay valid across runs.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    name: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::out_of_range("dimension", 0, ">= 1"));
        }
        Ok(Self {
            dimension,
            name: format!("hashing-{dimension}"),
        })
    }

    fn accumulate(&self, feature: &str, weight: f32, out: &mut [f32]) {
        let hash = fnv1a(feature.as_bytes());
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        out[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            name: format!("hashing-{DEFAULT_DIMENSION}"),
        }
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = vec![0.0f32; self.dimension];
        let folded = fold_str(text, Matching::CaseInsensitive);

        for token in folded.split_whitespace() {
            self.accumulate(token, TOKEN_WEIGHT, &mut out);

            let chars: Vec<char> = token.chars().collect();
            for pair in chars.windows(2) {
                let bigram: String = pair.iter().collect();
                self.accumulate(&bigram, BIGRAM_WEIGHT, &mut out);
            }
        }

        Ok(normalized(&out))
    }
}

/// 64-bit FNV-1a.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn output_has_requested_dimension_and_unit_norm() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let v = embedder.encode("도로의 설계속도는 안전성을 고려한다.").unwrap();
        assert_eq!(v.len(), 64);
        let norm = dot(&v, &v).sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[test]
    fn encoding_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.encode("차로폭 기준").unwrap();
        let b = embedder.encode("차로폭 기준").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn case_is_folded() {
        let embedder = HashingEmbedder::default();
        assert_eq!(
            embedder.encode("Design Speed").unwrap(),
            embedder.encode("design speed").unwrap()
        );
    }

    #[test]
    fn shared_terms_are_more_similar() {
        let embedder = HashingEmbedder::default();
        let query = embedder.encode("설계속도 기준").unwrap();
        let related = embedder.encode("설계속도는 도로 기준이다").unwrap();
        let unrelated = embedder.encode("배수시설 유지관리").unwrap();
        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(8).unwrap();
        assert_eq!(embedder.encode("   ").unwrap(), vec![0.0; 8]);
    }

    #[test]
    fn batch_matches_single() {
        let embedder = HashingEmbedder::new(32).unwrap();
        let texts = vec!["a b".to_string(), "c d".to_string()];
        let batch = embedder.encode_batch(&texts).unwrap();
        assert_eq!(batch[1], embedder.encode("c d").unwrap());
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }

    #[test]
    fn model_name_includes_dimension() {
        let embedder = HashingEmbedder::new(128).unwrap();
        assert_eq!(embedder.model_name(), "hashing-128");
    }
}
