//! Scalar quantization (spec section 4.H): per-coordinate affine
//! mapping to a fixed bit width, packed tightly. Distance stays in
//! code space — no dequantization — for every width but 1-bit, where
//! it degenerates to Hamming.

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};

use super::{min_max, read_f32_le, QuantizedVectors, Quantizer, QuantizerMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarBits {
    Eight,
    Four,
    Two,
    One,
}

impl ScalarBits {
    fn bits(self) -> u32 {
        match self {
            ScalarBits::Eight => 8,
            ScalarBits::Four => 4,
            ScalarBits::Two => 2,
            ScalarBits::One => 1,
        }
    }

    fn max_code(self) -> f32 {
        ((1u32 << self.bits()) - 1) as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarMode {
    Asymmetric,
    Symmetric,
}

#[derive(Debug, Clone)]
pub struct ScalarQuantizer {
    bits: ScalarBits,
    mode: ScalarMode,
    clip_range: Option<f32>,
    dimension: usize,
    trained: bool,
    scale: Vec<f32>,
    offset: Vec<f32>,
}

impl ScalarQuantizer {
    pub fn new(dimension: usize, bits: ScalarBits, mode: ScalarMode) -> Self {
        Self { bits, mode, clip_range: None, dimension, trained: false, scale: Vec::new(), offset: Vec::new() }
    }

    /// Clamps the observed per-coordinate min/max symmetrically to
    /// `[-clip, clip]` before deriving quantization parameters.
    pub fn with_clip_range(mut self, clip: f32) -> Self {
        self.clip_range = Some(clip.abs());
        self
    }

    fn footprint(&self) -> usize {
        (self.dimension * self.bits.bits() as usize).div_ceil(8)
    }

    fn pack(&self, codes: &[u32]) -> Vec<u8> {
        let mut out = vec![0u8; self.footprint()];
        match self.bits {
            ScalarBits::Eight => {
                for (i, &c) in codes.iter().enumerate() {
                    out[i] = c as u8;
                }
            }
            ScalarBits::Four => {
                for (i, &c) in codes.iter().enumerate() {
                    let byte = i / 2;
                    if i % 2 == 0 {
                        out[byte] |= (c as u8 & 0x0F) << 4;
                    } else {
                        out[byte] |= c as u8 & 0x0F;
                    }
                }
            }
            ScalarBits::Two => {
                for (i, &c) in codes.iter().enumerate() {
                    let byte = i / 4;
                    let lane = i % 4;
                    let shift = 6 - lane * 2;
                    out[byte] |= (c as u8 & 0x03) << shift;
                }
            }
            ScalarBits::One => {
                for (i, &c) in codes.iter().enumerate() {
                    if c != 0 {
                        let byte = i / 8;
                        let bit = 7 - (i % 8);
                        out[byte] |= 1 << bit;
                    }
                }
            }
        }
        out
    }

    fn unpack(&self, packed: &[u8]) -> Vec<u32> {
        let mut codes = Vec::with_capacity(self.dimension);
        match self.bits {
            ScalarBits::Eight => {
                for i in 0..self.dimension {
                    codes.push(packed[i] as u32);
                }
            }
            ScalarBits::Four => {
                for i in 0..self.dimension {
                    let byte = packed[i / 2];
                    let code = if i % 2 == 0 { (byte >> 4) & 0x0F } else { byte & 0x0F };
                    codes.push(code as u32);
                }
            }
            ScalarBits::Two => {
                for i in 0..self.dimension {
                    let byte = packed[i / 4];
                    let shift = 6 - (i % 4) * 2;
                    codes.push(((byte >> shift) & 0x03) as u32);
                }
            }
            ScalarBits::One => {
                for i in 0..self.dimension {
                    let byte = packed[i / 8];
                    let bit = 7 - (i % 8);
                    codes.push(((byte >> bit) & 1) as u32);
                }
            }
        }
        codes
    }

    fn encode_one(&self, v: &[f32]) -> Vec<u8> {
        let max_code = self.bits.max_code();
        let codes: Vec<u32> = (0..self.dimension)
            .map(|i| {
                let raw = v[i] * self.scale[i] + self.offset[i];
                raw.round().clamp(0.0, max_code) as u32
            })
            .collect();
        self.pack(&codes)
    }

    /// Serializes one already-encoded vector as `[scale][offset][data]`
    /// (spec section 6): little-endian float32 scale and offset arrays
    /// followed by the packed code bytes.
    pub fn to_bytes(&self, packed: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.dimension * 8 + packed.len());
        for s in &self.scale {
            out.extend_from_slice(&s.to_le_bytes());
        }
        for o in &self.offset {
            out.extend_from_slice(&o.to_le_bytes());
        }
        out.extend_from_slice(packed);
        out
    }

    /// Inverse of [`Self::to_bytes`]: splits a `[scale][offset][data]`
    /// buffer back into the packed code bytes for this quantizer's
    /// dimension, ignoring the embedded scale/offset (the caller's own
    /// trained parameters are authoritative for decode).
    pub fn data_from_bytes<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.dimension * 8..]
    }

    /// Reads the `[scale][offset]` header embedded by [`Self::to_bytes`]
    /// without requiring a trained quantizer.
    pub fn scale_offset_from_bytes(buf: &[u8], dimension: usize) -> (Vec<f32>, Vec<f32>) {
        let scale = (0..dimension).map(|i| read_f32_le(buf, i * 4)).collect();
        let offset_base = dimension * 4;
        let offset = (0..dimension).map(|i| read_f32_le(buf, offset_base + i * 4)).collect();
        (scale, offset)
    }
}

impl Quantizer for ScalarQuantizer {
    fn quantizer_type(&self) -> &'static str {
        match self.bits {
            ScalarBits::Eight => "scalar_8bit",
            ScalarBits::Four => "scalar_4bit",
            ScalarBits::Two => "scalar_2bit",
            ScalarBits::One => "scalar_1bit",
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn compression_ratio(&self) -> f64 {
        32.0 / self.bits.bits() as f64
    }

    fn train(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.is_empty() {
            return Err(FabricError::InsufficientData("scalar quantizer requires at least one training vector".into()));
        }
        for v in vectors {
            if v.len() != self.dimension {
                return Err(FabricError::InvalidDimension(format!("expected {}, got {}", self.dimension, v.len())));
            }
        }

        let (mut min, mut max) = min_max(vectors, self.dimension);
        if let Some(clip) = self.clip_range {
            for i in 0..self.dimension {
                min[i] = min[i].max(-clip);
                max[i] = max[i].min(clip);
            }
        }

        let max_code = self.bits.max_code();
        let mut scale = vec![0.0f32; self.dimension];
        let mut offset = vec![0.0f32; self.dimension];

        for i in 0..self.dimension {
            let range = (max[i] - min[i]).max(f32::EPSILON);
            match self.mode {
                ScalarMode::Asymmetric => {
                    scale[i] = max_code / range;
                    offset[i] = -min[i] * scale[i];
                }
                ScalarMode::Symmetric => {
                    let abs_max = min[i].abs().max(max[i].abs()).max(f32::EPSILON);
                    scale[i] = max_code / (2.0 * abs_max);
                    offset[i] = max_code / 2.0;
                }
            }
        }

        self.scale = scale;
        self.offset = offset;
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
        Ok(QuantizedVectors::with_metadata(
            codes,
            self.dimension,
            QuantizerMetadata::Scalar { scale: self.scale.clone(), offset: self.offset.clone() },
        ))
    }

    fn decode(&self, qv: &QuantizedVectors) -> Result<Vec<Vec<f32>>> {
        if !self.trained {
            return Err(FabricError::NotTrained);
        }
        Ok(qv
            .codes
            .iter()
            .map(|packed| {
                self.unpack(packed)
                    .into_iter()
                    .enumerate()
                    .map(|(i, code)| (code as f32 - self.offset[i]) / self.scale[i])
                    .collect()
            })
            .collect())
    }

    fn compute_distance(&self, query: &[f32], candidates: &QuantizedVectors) -> Result<Vec<f32>> {
        if !self.trained {
            return Err(FabricError::NotTrained);
        }
        let query_code = self.encode_one(query);
        let query_unpacked = self.unpack(&query_code);

        Ok(candidates
            .codes
            .iter()
            .map(|packed| match self.bits {
                ScalarBits::One => {
                    query_code.iter().zip(packed).map(|(a, b)| (a ^ b).count_ones()).sum::<u32>() as f32
                }
                _ => {
                    let candidate = self.unpack(packed);
                    query_unpacked
                        .iter()
                        .zip(&candidate)
                        .map(|(a, b)| {
                            let diff = *a as f32 - *b as f32;
                            diff * diff
                        })
                        .sum::<f32>()
                        .sqrt()
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn training_set() -> Vec<Vec<f32>> {
        vec![vec![0.0, -1.0, 2.0], vec![1.0, 0.0, 4.0], vec![0.5, 1.0, 3.0], vec![0.2, -0.5, 2.5]]
    }

    #[test]
    fn eight_bit_round_trip_is_close() {
        let mut q = ScalarQuantizer::new(3, ScalarBits::Eight, ScalarMode::Asymmetric);
        q.train(&training_set()).unwrap();
        let encoded = q.encode(&training_set()).unwrap();
        let decoded = q.decode(&encoded).unwrap();
        for (orig, dec) in training_set().iter().zip(&decoded) {
            for (o, d) in orig.iter().zip(dec) {
                assert!((o - d).abs() < 0.1, "orig {o} decoded {d}");
            }
        }
    }

    #[test]
    fn footprint_matches_spec_formula() {
        let q = ScalarQuantizer::new(5, ScalarBits::Four, ScalarMode::Asymmetric);
        assert_eq!(q.footprint(), 3);
        let q = ScalarQuantizer::new(5, ScalarBits::One, ScalarMode::Asymmetric);
        assert_eq!(q.footprint(), 1);
        let q = ScalarQuantizer::new(9, ScalarBits::One, ScalarMode::Asymmetric);
        assert_eq!(q.footprint(), 2);
    }

    #[test]
    fn four_bit_packs_high_then_low_nibble() {
        let mut q = ScalarQuantizer::new(2, ScalarBits::Four, ScalarMode::Symmetric);
        q.train(&[vec![-1.0, -1.0], vec![1.0, 1.0]]).unwrap();
        let encoded = q.encode(&[vec![1.0, -1.0]]).unwrap();
        assert_eq!(encoded.codes[0].len(), 1);
    }

    #[test]
    fn one_bit_distance_is_hamming() {
        let mut q = ScalarQuantizer::new(4, ScalarBits::One, ScalarMode::Asymmetric);
        q.train(&[vec![0.0, 0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0, 1.0]]).unwrap();
        let candidates = q.encode(&[vec![0.0, 0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0, 1.0]]).unwrap();
        let distances = q.compute_distance(&[0.0, 0.0, 0.0, 0.0], &candidates).unwrap();
        assert_eq!(distances[0], 0.0);
        assert_eq!(distances[1], 4.0);
    }

    #[test]
    fn compression_ratio_matches_bit_width() {
        assert_eq!(ScalarQuantizer::new(1, ScalarBits::Eight, ScalarMode::Asymmetric).compression_ratio(), 4.0);
        assert_eq!(ScalarQuantizer::new(1, ScalarBits::Four, ScalarMode::Asymmetric).compression_ratio(), 8.0);
        assert_eq!(ScalarQuantizer::new(1, ScalarBits::Two, ScalarMode::Asymmetric).compression_ratio(), 16.0);
        assert_eq!(ScalarQuantizer::new(1, ScalarBits::One, ScalarMode::Asymmetric).compression_ratio(), 32.0);
    }

    #[test]
    fn encode_before_train_fails() {
        let q = ScalarQuantizer::new(3, ScalarBits::Eight, ScalarMode::Asymmetric);
        assert!(matches!(q.encode(&training_set()), Err(FabricError::NotTrained)));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut q = ScalarQuantizer::new(3, ScalarBits::Eight, ScalarMode::Asymmetric);
        q.train(&training_set()).unwrap();
        assert!(q.encode(&[vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn encode_tags_quantized_vectors_with_scale_and_offset() {
        let mut q = ScalarQuantizer::new(3, ScalarBits::Eight, ScalarMode::Asymmetric);
        q.train(&training_set()).unwrap();
        let encoded = q.encode(&training_set()).unwrap();
        match encoded.metadata {
            crate::quantization::QuantizerMetadata::Scalar { scale, offset } => {
                assert_eq!(scale.len(), 3);
                assert_eq!(offset.len(), 3);
            }
            _ => panic!("expected scalar metadata"),
        }
    }

    #[test]
    fn per_vector_serialization_round_trips_scale_offset_and_data() {
        let mut q = ScalarQuantizer::new(3, ScalarBits::Eight, ScalarMode::Asymmetric);
        q.train(&training_set()).unwrap();
        let encoded = q.encode(&[vec![0.5, 1.0, 3.0]]).unwrap();
        let packed = &encoded.codes[0];

        let buf = q.to_bytes(packed);
        assert_eq!(buf.len(), 3 * 4 * 2 + packed.len());

        let (scale, offset) = ScalarQuantizer::scale_offset_from_bytes(&buf, 3);
        assert_eq!(scale, q.scale);
        assert_eq!(offset, q.offset);
        assert_eq!(q.data_from_bytes(&buf), packed.as_slice());
    }
}
