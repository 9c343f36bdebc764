//! Vector quantization codecs (spec section 4.H): scalar, binary, and
//! product quantization behind one contract, plus an observability
//! wrapper transparent to any of them.

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod binary;
pub mod observability;
pub mod product;
pub mod scalar;

pub use binary::BinaryQuantizer;
pub use observability::ObservableQuantizer;
pub use product::ProductQuantizer;
pub use scalar::ScalarQuantizer;

/// Per-codec parameters needed to interpret a [`QuantizedVectors`]
/// stream without the training-time [`Quantizer`] instance at hand
/// (spec section 6, "Stream metadata" column).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QuantizerMetadata {
    /// Per-coordinate affine parameters for scalar codecs.
    Scalar { scale: Vec<f32>, offset: Vec<f32> },
    /// Single learned threshold for the binary codec.
    Binary { threshold: f32 },
    /// `M` codebooks of `K` centroids each, `d/M` floats per centroid,
    /// for product quantization.
    Product { codebooks: Vec<Vec<Vec<f32>>> },
    /// Codec carries no extra stream metadata.
    None,
}

/// Encoded output of a [`Quantizer::encode`] call: one packed byte run
/// per input vector, all the same length for a given trained codec,
/// tagged with the [`QuantizerMetadata`] needed to decode the stream
/// on its own (spec section 3's "tagged container" requirement).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizedVectors {
    pub codes: Vec<Vec<u8>>,
    pub dimension: usize,
    pub metadata: QuantizerMetadata,
}

impl QuantizedVectors {
    pub fn new(codes: Vec<Vec<u8>>, dimension: usize) -> Self {
        Self { codes, dimension, metadata: QuantizerMetadata::None }
    }

    pub fn with_metadata(codes: Vec<Vec<u8>>, dimension: usize, metadata: QuantizerMetadata) -> Self {
        Self { codes, dimension, metadata }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Serializes the stream metadata header per spec section 6: a
    /// little-endian float32 scale then offset per coordinate for
    /// scalar streams, a single little-endian float32 threshold for
    /// binary streams, or the full `M × K × (d/M)` codebook for
    /// product streams. Returns an empty header when the codec
    /// carries none.
    pub fn metadata_bytes(&self) -> Vec<u8> {
        match &self.metadata {
            QuantizerMetadata::None => Vec::new(),
            QuantizerMetadata::Scalar { scale, offset } => {
                let mut out = Vec::with_capacity((scale.len() + offset.len()) * 4);
                for s in scale {
                    out.extend_from_slice(&s.to_le_bytes());
                }
                for o in offset {
                    out.extend_from_slice(&o.to_le_bytes());
                }
                out
            }
            QuantizerMetadata::Binary { threshold } => threshold.to_le_bytes().to_vec(),
            QuantizerMetadata::Product { codebooks } => {
                let mut out = Vec::new();
                for codebook in codebooks {
                    for centroid in codebook {
                        for v in centroid {
                            out.extend_from_slice(&v.to_le_bytes());
                        }
                    }
                }
                out
            }
        }
    }

    /// Concatenates the stream metadata header with every packed
    /// per-vector code run, in the order they appear in `codes`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.metadata_bytes();
        for code in &self.codes {
            out.extend_from_slice(code);
        }
        out
    }
}

/// Uniform contract every codec in this module implements (spec
/// section 4.H). Training and encoding are CPU-bound and synchronous;
/// [`observability::ObservableQuantizer`] is what wraps these calls
/// with spans and metrics when the caller wants that.
pub trait Quantizer: Send + Sync {
    /// Short, stable identifier used in spans/metrics (e.g. `"scalar_8bit"`).
    fn quantizer_type(&self) -> &'static str;

    fn dimension(&self) -> usize;

    fn is_trained(&self) -> bool;

    /// Ratio of original (32-bit float) size to encoded size.
    fn compression_ratio(&self) -> f64;

    fn train(&mut self, vectors: &[Vec<f32>]) -> Result<()>;

    fn encode(&self, vectors: &[Vec<f32>]) -> Result<QuantizedVectors>;

    fn decode(&self, qv: &QuantizedVectors) -> Result<Vec<Vec<f32>>>;

    /// Distance from `query` to each row of `candidates`. Codecs that
    /// support asymmetric distance computation (product quantization)
    /// precompute a table from `query` once and reuse it per candidate.
    fn compute_distance(&self, query: &[f32], candidates: &QuantizedVectors) -> Result<Vec<f32>>;
}

pub(crate) fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

pub(crate) fn read_f32_le(bytes: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("4-byte slice"))
}

pub(crate) fn min_max(vectors: &[Vec<f32>], dimension: usize) -> (Vec<f32>, Vec<f32>) {
    let mut min = vec![f32::INFINITY; dimension];
    let mut max = vec![f32::NEG_INFINITY; dimension];
    for v in vectors {
        for i in 0..dimension {
            min[i] = min[i].min(v[i]);
            max[i] = max[i].max(v[i]);
        }
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_of_identical_vectors_is_zero() {
        assert_eq!(euclidean(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn min_max_tracks_per_coordinate_extremes() {
        let vectors = vec![vec![1.0, 5.0], vec![3.0, 2.0], vec![-1.0, 9.0]];
        let (min, max) = min_max(&vectors, 2);
        assert_eq!(min, vec![-1.0, 2.0]);
        assert_eq!(max, vec![3.0, 9.0]);
    }
}
