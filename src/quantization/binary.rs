//! Binary quantization (spec section 4.H): a single learned threshold,
//! one bit per coordinate, MSB-first packing. Distance and the
//! supplementary set operations all stay in packed-byte space.

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};

use super::{QuantizedVectors, Quantizer, QuantizerMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdMethod {
    Mean,
    Median,
}

#[derive(Debug, Clone)]
pub struct BinaryQuantizer {
    dimension: usize,
    method: ThresholdMethod,
    explicit_threshold: Option<f32>,
    threshold: f32,
    trained: bool,
}

impl BinaryQuantizer {
    pub fn new(dimension: usize, method: ThresholdMethod) -> Self {
        Self { dimension, method, explicit_threshold: None, threshold: 0.0, trained: false }
    }

    pub fn with_explicit_threshold(mut self, threshold: f32) -> Self {
        self.explicit_threshold = Some(threshold);
        self
    }

    fn footprint(&self) -> usize {
        self.dimension.div_ceil(8)
    }

    fn pack(&self, bits: &[bool]) -> Vec<u8> {
        let mut out = vec![0u8; self.footprint()];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                out[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        out
    }

    fn unpack(&self, packed: &[u8]) -> Vec<bool> {
        (0..self.dimension).map(|i| (packed[i / 8] >> (7 - (i % 8))) & 1 == 1).collect()
    }

    fn encode_one(&self, v: &[f32]) -> Vec<u8> {
        let bits: Vec<bool> = v.iter().map(|&x| x >= self.threshold).collect();
        self.pack(&bits)
    }

    /// Bitwise AND of two packed vectors of the same footprint.
    pub fn and(&self, a: &[u8], b: &[u8]) -> Vec<u8> {
        a.iter().zip(b).map(|(x, y)| x & y).collect()
    }

    pub fn or(&self, a: &[u8], b: &[u8]) -> Vec<u8> {
        a.iter().zip(b).map(|(x, y)| x | y).collect()
    }

    pub fn xor(&self, a: &[u8], b: &[u8]) -> Vec<u8> {
        a.iter().zip(b).map(|(x, y)| x ^ y).collect()
    }

    pub fn hamming_weight(&self, a: &[u8]) -> u32 {
        a.iter().map(|b| b.count_ones()).sum()
    }

    pub fn hamming_distance(&self, a: &[u8], b: &[u8]) -> u32 {
        self.hamming_weight(&self.xor(a, b))
    }

    /// |A ∧ B| / |A ∨ B|, defined as 1.0 for two all-zero vectors.
    pub fn jaccard(&self, a: &[u8], b: &[u8]) -> f32 {
        let union = self.hamming_weight(&self.or(a, b));
        if union == 0 {
            return 1.0;
        }
        self.hamming_weight(&self.and(a, b)) as f32 / union as f32
    }

    /// |A ∧ B| / sqrt(|A| * |B|), defined as 0.0 when either side is empty.
    pub fn cosine(&self, a: &[u8], b: &[u8]) -> f32 {
        let wa = self.hamming_weight(a);
        let wb = self.hamming_weight(b);
        if wa == 0 || wb == 0 {
            return 0.0;
        }
        self.hamming_weight(&self.and(a, b)) as f32 / ((wa as f32) * (wb as f32)).sqrt()
    }
}

impl Quantizer for BinaryQuantizer {
    fn quantizer_type(&self) -> &'static str {
        "binary"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn compression_ratio(&self) -> f64 {
        32.0
    }

    fn train(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(threshold) = self.explicit_threshold {
            self.threshold = threshold;
            self.trained = true;
            return Ok(());
        }
        if vectors.is_empty() {
            return Err(FabricError::InsufficientData("binary quantizer requires at least one training vector".into()));
        }
        for v in vectors {
            if v.len() != self.dimension {
                return Err(FabricError::InvalidDimension(format!("expected {}, got {}", self.dimension, v.len())));
            }
        }

        let mut all_values: Vec<f32> = vectors.iter().flatten().copied().collect();
        self.threshold = match self.method {
            ThresholdMethod::Mean => all_values.iter().sum::<f32>() / all_values.len() as f32,
            ThresholdMethod::Median => {
                all_values.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let mid = all_values.len() / 2;
                if all_values.len() % 2 == 0 {
                    (all_values[mid - 1] + all_values[mid]) / 2.0
                } else {
                    all_values[mid]
                }
            }
        };
        self.trained = true;
        Ok(())
    }

    fn encode(&self, vectors: &[Vec<f32>]) -> Result<QuantizedVectors> {
        if !self.trained {
            return Err(FabricError::NotTrained);
        }
        let codes = vectors
            .iter()
            .map(|v| {
                if v.len() != self.dimension {
                    return Err(FabricError::InvalidDimension(format!("expected {}, got {}", self.dimension, v.len())));
                }
                Ok(self.encode_one(v))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(QuantizedVectors::with_metadata(codes, self.dimension, QuantizerMetadata::Binary { threshold: self.threshold }))
    }

    fn decode(&self, qv: &QuantizedVectors) -> Result<Vec<Vec<f32>>> {
        if !self.trained {
            return Err(FabricError::NotTrained);
        }
        Ok(qv
            .codes
            .iter()
            .map(|packed| self.unpack(packed).into_iter().map(|b| if b { 1.0 } else { 0.0 }).collect())
            .collect())
    }

    fn compute_distance(&self, query: &[f32], candidates: &QuantizedVectors) -> Result<Vec<f32>> {
        if !self.trained {
            return Err(FabricError::NotTrained);
        }
        let query_code = self.encode_one(query);
        Ok(candidates.codes.iter().map(|packed| self.hamming_distance(&query_code, packed) as f32).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_threshold_round_trip() {
        let mut q = BinaryQuantizer::new(4, ThresholdMethod::Mean);
        let training = vec![vec![0.0, 1.0, 0.0, 1.0], vec![1.0, 1.0, 0.0, 0.0]];
        q.train(&training).unwrap();
        let encoded = q.encode(&[vec![1.0, 1.0, 1.0, 1.0]]).unwrap();
        let decoded = q.decode(&encoded).unwrap();
        assert_eq!(decoded[0].len(), 4);
    }

    #[test]
    fn explicit_threshold_skips_training_data() {
        let mut q = BinaryQuantizer::new(2, ThresholdMethod::Mean).with_explicit_threshold(0.5);
        q.train(&[]).unwrap();
        let encoded = q.encode(&[vec![0.6, 0.4]]).unwrap();
        let decoded = q.decode(&encoded).unwrap();
        assert_eq!(decoded[0], vec![1.0, 0.0]);
    }

    #[test]
    fn hamming_distance_counts_differing_bits() {
        let q = BinaryQuantizer::new(8, ThresholdMethod::Mean);
        let a = vec![0b1111_0000];
        let b = vec![0b1010_0000];
        assert_eq!(q.hamming_distance(&a, &b), 2);
    }

    #[test]
    fn jaccard_of_two_zero_vectors_is_one() {
        let q = BinaryQuantizer::new(8, ThresholdMethod::Mean);
        let zero = vec![0u8];
        assert_eq!(q.jaccard(&zero, &zero), 1.0);
    }

    #[test]
    fn cosine_is_zero_when_either_side_empty() {
        let q = BinaryQuantizer::new(8, ThresholdMethod::Mean);
        let zero = vec![0u8];
        let nonzero = vec![0b1111_1111];
        assert_eq!(q.cosine(&zero, &nonzero), 0.0);
    }

    #[test]
    fn median_threshold_differs_from_mean_on_skewed_data() {
        let mut q_mean = BinaryQuantizer::new(1, ThresholdMethod::Mean);
        let mut q_median = BinaryQuantizer::new(1, ThresholdMethod::Median);
        let skewed: Vec<Vec<f32>> = vec![vec![1.0], vec![2.0], vec![3.0], vec![100.0]];
        q_mean.train(&skewed).unwrap();
        q_median.train(&skewed).unwrap();
        assert!(q_mean.threshold > q_median.threshold);
    }

    #[test]
    fn encode_tags_quantized_vectors_with_threshold() {
        let mut q = BinaryQuantizer::new(2, ThresholdMethod::Mean).with_explicit_threshold(0.5);
        q.train(&[]).unwrap();
        let encoded = q.encode(&[vec![0.6, 0.4]]).unwrap();
        match encoded.metadata {
            QuantizerMetadata::Binary { threshold } => assert_eq!(threshold, 0.5),
            _ => panic!("expected binary metadata"),
        }
    }
}
