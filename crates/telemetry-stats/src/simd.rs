//! Vectorised reductions over `&[f64]`.
//!
//! Dispatch is selected once, at construction, via runtime feature detection
//! on x86_64 (`is_x86_feature_detected!("avx2")`) or unconditionally on
//! aarch64 (NEON is part of the baseline ABI there). Reductions only take the
//! vector path once the input is at least twice the vector width; shorter
//! slices fall through to the scalar loop, where the fixed setup cost of a
//! SIMD reduction (horizontal sum, remainder handling) isn't worth paying.

use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimdError {
    #[error("cannot reduce an empty slice")]
    EmptyInput,
    #[error("invalid reducer configuration")]
    InvalidConfig,
}

/// Which vector ISA a [`SimdReducer`] ended up selecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Avx2,
    Neon,
    Scalar,
}

/// Configuration for a [`SimdReducer`].
#[derive(Debug, Clone, Copy)]
pub struct SimdConfig {
    /// Master switch; `false` forces the scalar path regardless of what the
    /// CPU supports.
    pub enable_simd: bool,
    /// Lane count used to decide the vectorise-or-not cutoff (`len >= 2 *
    /// vector_width`). Does not have to match the backend's native width.
    pub vector_width: usize,
}

impl Default for SimdConfig {
    fn default() -> Self {
        Self {
            enable_simd: true,
            vector_width: 4,
        }
    }
}

impl SimdConfig {
    pub fn validate(&self) -> Result<(), SimdError> {
        // vector_width of 0 would make the `len >= 2 * vector_width` cutoff
        // always true, silently defeating the "large datasets only" intent.
        if self.vector_width == 0 {
            return Err(SimdError::InvalidConfig);
        }
        Ok(())
    }
}

/// Running counters for how often the vector path actually got taken.
#[derive(Debug, Default)]
pub struct ReducerStats {
    total_ops: AtomicU64,
    simd_ops: AtomicU64,
    scalar_ops: AtomicU64,
    elements_processed: AtomicU64,
}

impl ReducerStats {
    fn record(&self, took_simd: bool, len: usize) {
        self.total_ops.fetch_add(1, Ordering::Relaxed);
        self.elements_processed.fetch_add(len as u64, Ordering::Relaxed);
        if took_simd {
            self.simd_ops.fetch_add(1, Ordering::Relaxed);
        } else {
            self.scalar_ops.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total_operations(&self) -> u64 {
        self.total_ops.load(Ordering::Relaxed)
    }

    pub fn simd_operations(&self) -> u64 {
        self.simd_ops.load(Ordering::Relaxed)
    }

    pub fn scalar_operations(&self) -> u64 {
        self.scalar_ops.load(Ordering::Relaxed)
    }

    pub fn elements_processed(&self) -> u64 {
        self.elements_processed.load(Ordering::Relaxed)
    }

    /// Percentage (0.0-100.0) of operations that took the vector path.
    pub fn simd_utilization(&self) -> f64 {
        let total = self.total_operations();
        if total == 0 {
            return 0.0;
        }
        (self.simd_operations() as f64 / total as f64) * 100.0
    }

    pub fn reset(&self) {
        self.total_ops.store(0, Ordering::Relaxed);
        self.simd_ops.store(0, Ordering::Relaxed);
        self.scalar_ops.store(0, Ordering::Relaxed);
        self.elements_processed.store(0, Ordering::Relaxed);
    }
}

/// A full statistical summary of a slice, as computed by [`SimdReducer::summary`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

/// SIMD-accelerated reductions (`sum`, `mean`, `min`, `max`, `variance`) with
/// a scalar fallback.
///
/// Capability detection happens once at construction, not per call — the
/// CPU's feature set doesn't change at runtime, so there's no reason to pay
/// for `is_x86_feature_detected!`'s cache-miss-prone check on every
/// reduction.
pub struct SimdReducer {
    config: SimdConfig,
    backend: Backend,
    stats: ReducerStats,
}

impl Default for SimdReducer {
    fn default() -> Self {
        Self::new(SimdConfig::default())
    }
}

impl SimdReducer {
    pub fn new(config: SimdConfig) -> Self {
        let backend = detect_backend(&config);
        Self {
            config,
            backend,
            stats: ReducerStats::default(),
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn stats(&self) -> &ReducerStats {
        &self.stats
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    fn should_vectorize(&self, len: usize) -> bool {
        self.backend != Backend::Scalar && len >= 2 * self.config.vector_width
    }

    pub fn sum(&self, data: &[f64]) -> Result<f64, SimdError> {
        if data.is_empty() {
            return Err(SimdError::EmptyInput);
        }
        let take_simd = self.should_vectorize(data.len());
        let result = if take_simd {
            match self.backend {
                Backend::Avx2 => unsafe { sum_avx2(data) },
                Backend::Neon => neon_sum(data),
                Backend::Scalar => unreachable!(),
            }
        } else {
            sum_scalar(data)
        };
        self.stats.record(take_simd, data.len());
        Ok(result)
    }

    pub fn mean(&self, data: &[f64]) -> Result<f64, SimdError> {
        let sum = self.sum(data)?;
        Ok(sum / data.len() as f64)
    }

    /// Returns `+∞` for an empty slice, matching the identity element of a
    /// min-reduction rather than erroring.
    pub fn min(&self, data: &[f64]) -> Result<f64, SimdError> {
        let take_simd = self.should_vectorize(data.len());
        let result = if take_simd {
            match self.backend {
                Backend::Avx2 => unsafe { min_avx2(data) },
                Backend::Neon => neon_min(data),
                Backend::Scalar => unreachable!(),
            }
        } else {
            data.iter().copied().fold(f64::INFINITY, f64::min)
        };
        self.stats.record(take_simd, data.len());
        Ok(result)
    }

    /// Returns `-∞` for an empty slice, matching the identity element of a
    /// max-reduction rather than erroring.
    pub fn max(&self, data: &[f64]) -> Result<f64, SimdError> {
        let take_simd = self.should_vectorize(data.len());
        let result = if take_simd {
            match self.backend {
                Backend::Avx2 => unsafe { max_avx2(data) },
                Backend::Neon => neon_max(data),
                Backend::Scalar => unreachable!(),
            }
        } else {
            data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        };
        self.stats.record(take_simd, data.len());
        Ok(result)
    }

    /// Variance via a single scalar pass over the precomputed mean. The
    /// donor's SIMD variance combines per-lane partial moments (a
    /// parallel-axis / Chan's-formula generalization of Welford); this crate
    /// keeps that combination scalar here since `data` is already fully
    /// materialized (unlike the streaming case in [`crate::online`]) and a
    /// second vector pass over `(x - mean)^2` buys little once `sum` has
    /// already paid for one.
    pub fn variance(&self, data: &[f64]) -> Result<f64, SimdError> {
        if data.is_empty() {
            return Err(SimdError::EmptyInput);
        }
        if data.len() == 1 {
            return Ok(0.0);
        }
        let mean = self.mean(data)?;
        let sum_sq_diff: f64 = data.iter().map(|v| (v - mean) * (v - mean)).sum();
        Ok(sum_sq_diff / (data.len() - 1) as f64)
    }

    pub fn summary(&self, data: &[f64]) -> Result<Summary, SimdError> {
        if data.is_empty() {
            return Err(SimdError::EmptyInput);
        }
        let sum = self.sum(data)?;
        let count = data.len();
        let mean = sum / count as f64;
        let min = self.min(data)?;
        let max = self.max(data)?;
        let variance = self.variance(data)?;
        Ok(Summary {
            count,
            sum,
            mean,
            variance,
            std_dev: variance.sqrt(),
            min,
            max,
        })
    }
}

fn detect_backend(config: &SimdConfig) -> Backend {
    if !config.enable_simd {
        return Backend::Scalar;
    }
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return Backend::Avx2;
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        return Backend::Neon;
    }
    #[allow(unreachable_code)]
    Backend::Scalar
}

fn sum_scalar(data: &[f64]) -> f64 {
    data.iter().sum()
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn sum_avx2(data: &[f64]) -> f64 {
    use std::arch::x86_64::*;

    const LANES: usize = 4;
    let chunks = data.len() / LANES;
    let mut acc = _mm256_setzero_pd();
    for i in 0..chunks {
        let v = _mm256_loadu_pd(data.as_ptr().add(i * LANES));
        acc = _mm256_add_pd(acc, v);
    }
    let mut lanes = [0.0f64; LANES];
    _mm256_storeu_pd(lanes.as_mut_ptr(), acc);
    let mut total: f64 = lanes.iter().sum();
    for &v in &data[chunks * LANES..] {
        total += v;
    }
    total
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn min_avx2(data: &[f64]) -> f64 {
    use std::arch::x86_64::*;

    const LANES: usize = 4;
    let chunks = data.len() / LANES;
    let mut acc = _mm256_set1_pd(f64::INFINITY);
    for i in 0..chunks {
        let v = _mm256_loadu_pd(data.as_ptr().add(i * LANES));
        acc = _mm256_min_pd(acc, v);
    }
    let mut lanes = [0.0f64; LANES];
    _mm256_storeu_pd(lanes.as_mut_ptr(), acc);
    let mut result = lanes.iter().copied().fold(f64::INFINITY, f64::min);
    for &v in &data[chunks * LANES..] {
        result = result.min(v);
    }
    result
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn max_avx2(data: &[f64]) -> f64 {
    use std::arch::x86_64::*;

    const LANES: usize = 4;
    let chunks = data.len() / LANES;
    let mut acc = _mm256_set1_pd(f64::NEG_INFINITY);
    for i in 0..chunks {
        let v = _mm256_loadu_pd(data.as_ptr().add(i * LANES));
        acc = _mm256_max_pd(acc, v);
    }
    let mut lanes = [0.0f64; LANES];
    _mm256_storeu_pd(lanes.as_mut_ptr(), acc);
    let mut result = lanes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    for &v in &data[chunks * LANES..] {
        result = result.max(v);
    }
    result
}

#[cfg(not(target_arch = "x86_64"))]
#[allow(dead_code)]
unsafe fn sum_avx2(data: &[f64]) -> f64 {
    sum_scalar(data)
}

#[cfg(not(target_arch = "x86_64"))]
#[allow(dead_code)]
unsafe fn min_avx2(data: &[f64]) -> f64 {
    data.iter().copied().fold(f64::INFINITY, f64::min)
}

#[cfg(not(target_arch = "x86_64"))]
#[allow(dead_code)]
unsafe fn max_avx2(data: &[f64]) -> f64 {
    data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

#[cfg(target_arch = "aarch64")]
fn neon_sum(data: &[f64]) -> f64 {
    use std::arch::aarch64::*;

    const LANES: usize = 2;
    let chunks = data.len() / LANES;
    unsafe {
        let mut acc = vdupq_n_f64(0.0);
        for i in 0..chunks {
            let v = vld1q_f64(data.as_ptr().add(i * LANES));
            acc = vaddq_f64(acc, v);
        }
        let mut total = vgetq_lane_f64(acc, 0) + vgetq_lane_f64(acc, 1);
        for &v in &data[chunks * LANES..] {
            total += v;
        }
        total
    }
}

#[cfg(target_arch = "aarch64")]
fn neon_min(data: &[f64]) -> f64 {
    use std::arch::aarch64::*;

    const LANES: usize = 2;
    let chunks = data.len() / LANES;
    unsafe {
        let mut acc = vdupq_n_f64(f64::INFINITY);
        for i in 0..chunks {
            let v = vld1q_f64(data.as_ptr().add(i * LANES));
            acc = vminq_f64(acc, v);
        }
        let mut result = vgetq_lane_f64(acc, 0).min(vgetq_lane_f64(acc, 1));
        for &v in &data[chunks * LANES..] {
            result = result.min(v);
        }
        result
    }
}

#[cfg(target_arch = "aarch64")]
fn neon_max(data: &[f64]) -> f64 {
    use std::arch::aarch64::*;

    const LANES: usize = 2;
    let chunks = data.len() / LANES;
    unsafe {
        let mut acc = vdupq_n_f64(f64::NEG_INFINITY);
        for i in 0..chunks {
            let v = vld1q_f64(data.as_ptr().add(i * LANES));
            acc = vmaxq_f64(acc, v);
        }
        let mut result = vgetq_lane_f64(acc, 0).max(vgetq_lane_f64(acc, 1));
        for &v in &data[chunks * LANES..] {
            result = result.max(v);
        }
        result
    }
}

#[cfg(not(target_arch = "aarch64"))]
#[allow(dead_code)]
fn neon_sum(data: &[f64]) -> f64 {
    sum_scalar(data)
}

#[cfg(not(target_arch = "aarch64"))]
#[allow(dead_code)]
fn neon_min(data: &[f64]) -> f64 {
    data.iter().copied().fold(f64::INFINITY, f64::min)
}

#[cfg(not(target_arch = "aarch64"))]
#[allow(dead_code)]
fn neon_max(data: &[f64]) -> f64 {
    data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_input() {
        let reducer = SimdReducer::default();
        assert_eq!(reducer.sum(&[]), Err(SimdError::EmptyInput));
        assert_eq!(reducer.mean(&[]), Err(SimdError::EmptyInput));
        assert_eq!(reducer.variance(&[]), Err(SimdError::EmptyInput));
    }

    #[test]
    fn min_max_on_empty_slice_return_infinities() {
        let reducer = SimdReducer::default();
        assert_eq!(reducer.min(&[]), Ok(f64::INFINITY));
        assert_eq!(reducer.max(&[]), Ok(f64::NEG_INFINITY));
    }

    #[test]
    fn min_max_on_nonempty_single_element_degenerate_to_that_element() {
        let reducer = SimdReducer::default();
        assert_eq!(reducer.min(&[5.0]).unwrap(), 5.0);
        assert_eq!(reducer.max(&[5.0]).unwrap(), 5.0);
    }

    #[test]
    fn sum_matches_scalar_reference() {
        let data: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let reducer = SimdReducer::default();
        let expected: f64 = data.iter().sum();
        assert!((reducer.sum(&data).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn mean_min_max_on_known_vector() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let reducer = SimdReducer::default();
        assert!((reducer.sum(&data).unwrap() - 36.0).abs() < 1e-10);
        assert!((reducer.mean(&data).unwrap() - 4.5).abs() < 1e-10);
        assert_eq!(reducer.min(&data).unwrap(), 1.0);
        assert_eq!(reducer.max(&data).unwrap(), 8.0);
    }

    #[test]
    fn variance_of_single_element_is_zero() {
        let reducer = SimdReducer::default();
        assert_eq!(reducer.variance(&[42.0]).unwrap(), 0.0);
    }

    #[test]
    fn summary_matches_component_calls() {
        let data = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let reducer = SimdReducer::default();
        let summary = reducer.summary(&data).unwrap();
        assert_eq!(summary.count, 8);
        assert!((summary.mean - reducer.mean(&data).unwrap()).abs() < 1e-9);
        assert!((summary.std_dev - summary.variance.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn scalar_path_is_selected_when_disabled() {
        let reducer = SimdReducer::new(SimdConfig {
            enable_simd: false,
            vector_width: 4,
        });
        assert_eq!(reducer.backend(), Backend::Scalar);
        let data: Vec<f64> = (0..64).map(|i| i as f64).collect();
        reducer.sum(&data).unwrap();
        assert_eq!(reducer.stats().simd_operations(), 0);
        assert_eq!(reducer.stats().scalar_operations(), 1);
    }

    #[test]
    fn short_slices_take_the_scalar_path_even_with_simd_enabled() {
        let reducer = SimdReducer::new(SimdConfig {
            enable_simd: true,
            vector_width: 8,
        });
        let data = vec![1.0, 2.0, 3.0];
        reducer.sum(&data).unwrap();
        assert_eq!(reducer.stats().simd_operations(), 0);
    }
}
