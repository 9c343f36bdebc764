//! Product quantization (spec section 4.H): `M` independently trained
//! subspace codebooks, K-means++ seeded, encoded as one centroid index
//! per subspace. Distance uses asymmetric distance computation (ADC):
//! a per-query M×K table of subspace-to-centroid distances, reused
//! across every candidate so a lookup replaces an O(d) computation.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};

use super::{QuantizedVectors, Quantizer, QuantizerMetadata};

const DEFAULT_MIN_TRAINING_SAMPLES: usize = 1000;
const DEFAULT_MAX_ITERATIONS: usize = 25;
const DEFAULT_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductQuantizerConfig {
    pub m: usize,
    pub nbits: u8,
    pub min_training_samples: usize,
    pub max_iterations: usize,
    pub tolerance: f32,
}

impl ProductQuantizerConfig {
    pub fn new(m: usize, nbits: u8) -> Self {
        Self {
            m,
            nbits,
            min_training_samples: DEFAULT_MIN_TRAINING_SAMPLES,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    dimension: usize,
    subdim: usize,
    config: ProductQuantizerConfig,
    codebooks: Vec<Vec<Vec<f32>>>,
    trained: bool,
}

impl ProductQuantizer {
    pub fn new(dimension: usize, config: ProductQuantizerConfig) -> Result<Self> {
        if config.m == 0 || dimension % config.m != 0 {
            return Err(FabricError::InvalidM(format!("dimension {dimension} is not divisible by M={}", config.m)));
        }
        if config.nbits == 0 || config.nbits > 16 {
            return Err(FabricError::InvalidNBits(format!("NBits must be in 1..=16, got {}", config.nbits)));
        }
        let subdim = dimension / config.m;
        Ok(Self { dimension, subdim, config, codebooks: Vec::new(), trained: false })
    }

    fn k(&self) -> usize {
        1usize << self.config.nbits
    }

    fn slice(&self, v: &[f32], m: usize) -> &[f32] {
        &v[m * self.subdim..(m + 1) * self.subdim]
    }

    fn nearest_centroid(codebook: &[Vec<f32>], point: &[f32]) -> usize {
        codebook
            .iter()
            .enumerate()
            .map(|(i, c)| (i, squared_distance(point, c)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .map(|(i, _)| i)
            .expect("codebook is never empty")
    }

    fn encode_one(&self, v: &[f32]) -> Vec<u8> {
        let indices: Vec<u32> = (0..self.config.m)
            .map(|m| Self::nearest_centroid(&self.codebooks[m], self.slice(v, m)) as u32)
            .collect();
        pack_fields(&indices, self.config.nbits as u32)
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn pack_fields(values: &[u32], nbits: u32) -> Vec<u8> {
    let total_bits = values.len() as u32 * nbits;
    let mut out = vec![0u8; total_bits.div_ceil(8) as usize];
    let mut bit_pos = 0u32;
    for &value in values {
        for b in (0..nbits).rev() {
            if (value >> b) & 1 == 1 {
                let byte = (bit_pos / 8) as usize;
                let shift = 7 - (bit_pos % 8);
                out[byte] |= 1 << shift;
            }
            bit_pos += 1;
        }
    }
    out
}

fn unpack_fields(packed: &[u8], count: usize, nbits: u32) -> Vec<u32> {
    let mut out = Vec::with_capacity(count);
    let mut bit_pos = 0u32;
    for _ in 0..count {
        let mut value = 0u32;
        for _ in 0..nbits {
            let byte = (bit_pos / 8) as usize;
            let shift = 7 - (bit_pos % 8);
            let bit = (packed[byte] >> shift) & 1;
            value = (value << 1) | bit as u32;
            bit_pos += 1;
        }
        out.push(value);
    }
    out
}

/// K-means++ seeding (D² sampling) followed by Lloyd iterations up to
/// `max_iterations` or until total centroid movement drops below
/// `tolerance`. Empty clusters keep their prior centroid.
fn train_codebook(points: &[Vec<f32>], k: usize, max_iterations: usize, tolerance: f32) -> Vec<Vec<f32>> {
    let mut rng = rand::thread_rng();
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())].clone());

    while centroids.len() < k {
        let weights: Vec<f32> = points
            .iter()
            .map(|p| centroids.iter().map(|c| squared_distance(p, c)).fold(f32::INFINITY, f32::min))
            .collect();
        let total: f32 = weights.iter().sum();

        let chosen = if total <= 0.0 {
            rng.gen_range(0..points.len())
        } else {
            let draw = rng.gen::<f32>() * total;
            let mut cumulative = 0.0;
            let mut idx = points.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                cumulative += w;
                if draw < cumulative {
                    idx = i;
                    break;
                }
            }
            idx
        };
        centroids.push(points[chosen].clone());
    }

    let dims = centroids[0].len();
    for _ in 0..max_iterations {
        let mut sums = vec![vec![0.0f32; dims]; k];
        let mut counts = vec![0usize; k];

        for p in points {
            let idx = ProductQuantizer::nearest_centroid(&centroids, p);
            counts[idx] += 1;
            for d in 0..dims {
                sums[idx][d] += p[d];
            }
        }

        let mut movement = 0.0f32;
        let mut next = Vec::with_capacity(k);
        for i in 0..k {
            let candidate = if counts[i] == 0 {
                centroids[i].clone()
            } else {
                sums[i].iter().map(|s| s / counts[i] as f32).collect()
            };
            movement += squared_distance(&centroids[i], &candidate).sqrt();
            next.push(candidate);
        }
        centroids = next;

        if movement < tolerance {
            break;
        }
    }

    centroids
}

impl Quantizer for ProductQuantizer {
    fn quantizer_type(&self) -> &'static str {
        "product"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn compression_ratio(&self) -> f64 {
        let encoded_bits = self.config.m as f64 * self.config.nbits as f64;
        (32.0 * self.dimension as f64) / encoded_bits
    }

    fn train(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() < self.config.min_training_samples {
            return Err(FabricError::InsufficientData(format!(
                "product quantizer requires at least {} training vectors, got {}",
                self.config.min_training_samples,
                vectors.len()
            )));
        }
        for v in vectors {
            if v.len() != self.dimension {
                return Err(FabricError::InvalidDimension(format!("expected {}, got {}", self.dimension, v.len())));
            }
        }

        let k = self.k();
        let mut codebooks = Vec::with_capacity(self.config.m);
        for m in 0..self.config.m {
            let slices: Vec<Vec<f32>> = vectors.iter().map(|v| self.slice(v, m).to_vec()).collect();
            codebooks.push(train_codebook(&slices, k, self.config.max_iterations, self.config.tolerance));
        }

        self.codebooks = codebooks;
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
            QuantizerMetadata::Product { codebooks: self.codebooks.clone() },
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
                let indices = unpack_fields(packed, self.config.m, self.config.nbits as u32);
                indices.iter().enumerate().flat_map(|(m, &idx)| self.codebooks[m][idx as usize].clone()).collect()
            })
            .collect())
    }

    fn compute_distance(&self, query: &[f32], candidates: &QuantizedVectors) -> Result<Vec<f32>> {
        if !self.trained {
            return Err(FabricError::NotTrained);
        }
        if query.len() != self.dimension {
            return Err(FabricError::InvalidDimension(format!("expected {}, got {}", self.dimension, query.len())));
        }

        let table: Vec<Vec<f32>> = (0..self.config.m)
            .map(|m| {
                let slice = self.slice(query, m);
                self.codebooks[m].iter().map(|centroid| squared_distance(slice, centroid).sqrt()).collect()
            })
            .collect();

        Ok(candidates
            .codes
            .iter()
            .map(|packed| {
                let indices = unpack_fields(packed, self.config.m, self.config.nbits as u32);
                indices
                    .iter()
                    .enumerate()
                    .map(|(m, &idx)| {
                        let d = table[m][idx as usize];
                        d * d
                    })
                    .sum::<f32>()
                    .sqrt()
            })
            .collect())
    }
}
