//! Distance metrics for HNSW search.
//!
//! Three spaces are supported: squared L2, inner product, and cosine. Cosine
//! is inner product over normalized vectors; the index normalizes a copy of
//! every inserted and queried vector, so no separate cosine formula exists.

use crate::config::NORMALIZE_EPSILON;
use crate::error::HnswError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Metric space of an index. Immutable after creation.
///
/// All spaces return a distance where **lower is closer**.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceType {
    /// Squared Euclidean distance. Range: \[0, ∞).
    L2,
    /// `1 - dot(a, b)`. Same ordering as the negative dot product.
    #[serde(rename = "ip", alias = "inner_product")]
    InnerProduct,
    /// Inner product over unit-normalized vectors. Range: \[0, 2\].
    Cosine,
}

impl SpaceType {
    /// Distance between two equal-length vectors.
    ///
    /// For [`SpaceType::Cosine`] both inputs must already be normalized
    /// (see [`SpaceType::prepare`]).
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "vector length mismatch");
        match self {
            SpaceType::L2 => euclidean_sq(a, b),
            SpaceType::InnerProduct | SpaceType::Cosine => 1.0 - dot_product(a, b),
        }
    }

    /// Whether vectors are normalized before storage and before every query.
    #[inline]
    pub fn normalizes(&self) -> bool {
        matches!(self, SpaceType::Cosine)
    }

    /// Returns the vector the index should store or search with: a
    /// normalized copy for cosine, the input itself otherwise.
    pub fn prepare<'a>(&self, vector: &'a [f32]) -> Cow<'a, [f32]> {
        if self.normalizes() {
            Cow::Owned(normalize(vector))
        } else {
            Cow::Borrowed(vector)
        }
    }

    /// One-byte tag used by the persisted format.
    pub(crate) fn to_code(self) -> u8 {
        match self {
            SpaceType::L2 => 0,
            SpaceType::InnerProduct => 1,
            SpaceType::Cosine => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SpaceType::L2),
            1 => Some(SpaceType::InnerProduct),
            2 => Some(SpaceType::Cosine),
            _ => None,
        }
    }
}

impl fmt::Display for SpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpaceType::L2 => "l2",
            SpaceType::InnerProduct => "ip",
            SpaceType::Cosine => "cosine",
        })
    }
}

impl FromStr for SpaceType {
    type Err = HnswError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(SpaceType::L2),
            "ip" | "inner_product" | "dot" => Ok(SpaceType::InnerProduct),
            "cosine" => Ok(SpaceType::Cosine),
            other => Err(HnswError::InvalidArgument(format!(
                "unknown space type '{other}' (expected l2, ip or cosine)"
            ))),
        }
    }
}

/// Returns `v / (‖v‖ + ε)`. A zero vector stays zero.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = dot_product(vector, vector).sqrt();
    let inv = 1.0 / (norm + NORMALIZE_EPSILON);
    vector.iter().map(|&x| x * inv).collect()
}

/// Squared Euclidean distance between two f32 slices.
#[inline]
#[allow(unreachable_code)]
pub fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
        {
            return unsafe { avx2::euclidean_sq(a, b) };
        }
    }
    portable_euclidean_sq(a, b)
}

/// Dot product between two f32 slices.
#[inline]
#[allow(unreachable_code)]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
        {
            return unsafe { avx2::dot_product(a, b) };
        }
    }
    portable_dot_product(a, b)
}

// Eight independent accumulators let the compiler vectorize the loop on
// targets without an explicit SIMD path.
fn portable_euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 8];
    let a_chunks = a.chunks_exact(8);
    let b_chunks = b.chunks_exact(8);
    let tail: f32 = a_chunks
        .remainder()
        .iter()
        .zip(b_chunks.remainder())
        .map(|(x, y)| (x - y) * (x - y))
        .sum();
    for (ca, cb) in a_chunks.zip(b_chunks) {
        for i in 0..8 {
            let d = ca[i] - cb[i];
            acc[i] += d * d;
        }
    }
    acc.iter().sum::<f32>() + tail
}

fn portable_dot_product(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 8];
    let a_chunks = a.chunks_exact(8);
    let b_chunks = b.chunks_exact(8);
    let tail: f32 = a_chunks
        .remainder()
        .iter()
        .zip(b_chunks.remainder())
        .map(|(x, y)| x * y)
        .sum();
    for (ca, cb) in a_chunks.zip(b_chunks) {
        for i in 0..8 {
            acc[i] += ca[i] * cb[i];
        }
    }
    acc.iter().sum::<f32>() + tail
}

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use std::arch::x86_64::*;

    #[target_feature(enable = "avx2")]
    unsafe fn hsum(v: __m256) -> f32 {
        let lo = _mm256_castps256_ps128(v);
        let hi = _mm256_extractf128_ps(v, 1);
        let s = _mm_add_ps(lo, hi);
        let s = _mm_add_ps(s, _mm_movehl_ps(s, s));
        let s = _mm_add_ss(s, _mm_shuffle_ps(s, s, 0x55));
        _mm_cvtss_f32(s)
    }

    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len().min(b.len());
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut acc0 = _mm256_setzero_ps();
        let mut acc1 = _mm256_setzero_ps();

        let blocks = len / 16;
        for i in 0..blocks {
            let off = i * 16;
            let d0 = _mm256_sub_ps(_mm256_loadu_ps(pa.add(off)), _mm256_loadu_ps(pb.add(off)));
            let d1 = _mm256_sub_ps(
                _mm256_loadu_ps(pa.add(off + 8)),
                _mm256_loadu_ps(pb.add(off + 8)),
            );
            acc0 = _mm256_fmadd_ps(d0, d0, acc0);
            acc1 = _mm256_fmadd_ps(d1, d1, acc1);
        }

        let mut sum = hsum(_mm256_add_ps(acc0, acc1));
        for i in blocks * 16..len {
            let d = *pa.add(i) - *pb.add(i);
            sum += d * d;
        }
        sum
    }

    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn dot_product(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len().min(b.len());
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut acc0 = _mm256_setzero_ps();
        let mut acc1 = _mm256_setzero_ps();

        let blocks = len / 16;
        for i in 0..blocks {
            let off = i * 16;
            acc0 = _mm256_fmadd_ps(
                _mm256_loadu_ps(pa.add(off)),
                _mm256_loadu_ps(pb.add(off)),
                acc0,
            );
            acc1 = _mm256_fmadd_ps(
                _mm256_loadu_ps(pa.add(off + 8)),
                _mm256_loadu_ps(pb.add(off + 8)),
                acc1,
            );
        }

        let mut sum = hsum(_mm256_add_ps(acc0, acc1));
        for i in blocks * 16..len {
            sum += *pa.add(i) * *pb.add(i);
        }
        sum
    }
}
