//! Single-pass streaming estimators: running mean/variance (Welford) and
//! approximate quantiles (the P² piecewise-parabolic algorithm). Both run in
//! O(1) time and space per observation — neither buffers the stream (beyond
//! P²'s five-observation startup) or requires a second pass.

use serde::{Deserialize, Serialize};

/// Welford's online algorithm for mean, variance, min, max and sum.
///
/// Updating the mean via `mean += delta / count` rather than `sum / count`
/// keeps the running computation numerically stable for long streams where
/// `sum` alone would lose precision to cancellation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OnlineStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    sum: f64,
}

impl OnlineStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }

    pub fn add(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;

        self.sum += value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance (Bessel-corrected). Zero until at least two samples
    /// have been observed.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Number of markers the P² algorithm tracks: two extremes, the target
/// quantile, and one marker on either side of it.
const MARKER_COUNT: usize = 5;

/// Streaming quantile estimator (Jain & Chlamtac's P², "The P² Algorithm for
/// Dynamic Calculation of Quantiles and Histograms Without Storing
/// Observations", 1985).
///
/// Maintains five markers — minimum, `p/2`, `p`, `(1+p)/2`, and maximum —
/// whose heights are nudged towards the target quantile by a parabolic (or,
/// failing that, linear) interpolation on every observation after the first
/// five, which are buffered and sorted to seed the markers.
#[derive(Debug, Clone)]
pub struct QuantileEstimator {
    p: f64,
    count: u64,
    /// Marker heights (`q_`).
    q: [f64; MARKER_COUNT],
    /// Marker positions, as integers (`n_`).
    n: [i64; MARKER_COUNT],
    /// Desired marker positions, real-valued (`n_prime_`).
    np: [f64; MARKER_COUNT],
    /// Per-observation increment to the desired positions (`dn_`).
    dn: [f64; MARKER_COUNT],
    /// Buffered observations while `count < MARKER_COUNT`.
    startup: Vec<f64>,
}

impl QuantileEstimator {
    /// `p` must lie in `(0.0, 1.0)`; out-of-range values are clamped.
    pub fn new(p: f64) -> Self {
        let p = p.clamp(0.000_1, 0.999_9);
        let mut est = Self {
            p,
            count: 0,
            q: [0.0; MARKER_COUNT],
            n: [0; MARKER_COUNT],
            np: [0.0; MARKER_COUNT],
            dn: [0.0; MARKER_COUNT],
            startup: Vec::with_capacity(MARKER_COUNT),
        };
        est.init_markers();
        est
    }

    fn init_markers(&mut self) {
        self.n = [1, 2, 3, 4, 5];
        self.np = [
            1.0,
            1.0 + 2.0 * self.p,
            1.0 + 4.0 * self.p,
            3.0 + 2.0 * self.p,
            5.0,
        ];
        self.dn = [0.0, self.p / 2.0, self.p, (1.0 + self.p) / 2.0, 1.0];
    }

    pub fn add_observation(&mut self, x: f64) {
        self.count += 1;

        if (self.count as usize) <= MARKER_COUNT {
            self.startup.push(x);
            if self.count as usize == MARKER_COUNT {
                self.startup.sort_by(|a, b| a.partial_cmp(b).unwrap());
                self.q.copy_from_slice(&self.startup);
            }
            return;
        }

        // Step 1: find the cell k containing x, clamping extremes into the
        // outer markers.
        let k = if x < self.q[0] {
            self.q[0] = x;
            0
        } else if x < self.q[1] {
            0
        } else if x < self.q[2] {
            1
        } else if x < self.q[3] {
            2
        } else if x <= self.q[4] {
            3
        } else {
            self.q[4] = x;
            3
        };

        // Step 2: increment positions of markers above the cell.
        for n in self.n.iter_mut().skip(k + 1) {
            *n += 1;
        }

        // Step 3: update desired positions.
        for i in 0..MARKER_COUNT {
            self.np[i] += self.dn[i];
        }

        // Step 4: adjust the heights of the three inner markers.
        for i in 1..MARKER_COUNT - 1 {
            let d = self.np[i] - self.n[i] as f64;
            let right_gap = self.n[i + 1] - self.n[i];
            let left_gap = self.n[i - 1] - self.n[i];

            if (d >= 1.0 && right_gap > 1) || (d <= -1.0 && left_gap < -1) {
                let d_sign = if d >= 0.0 { 1 } else { -1 };
                let parabolic = self.parabolic(i, d_sign);
                let new_height = if self.q[i - 1] < parabolic && parabolic < self.q[i + 1] {
                    parabolic
                } else {
                    self.linear(i, d_sign)
                };
                self.q[i] = new_height;
                self.n[i] += d_sign as i64;
            }
        }
    }

    fn parabolic(&self, i: usize, d: i32) -> f64 {
        let d = d as f64;
        let n = &self.n;
        let q = &self.q;
        q[i] + d / (n[i + 1] - n[i - 1]) as f64
            * ((n[i] - n[i - 1] + d as i64) as f64 * (q[i + 1] - q[i]) / (n[i + 1] - n[i]) as f64
                + (n[i + 1] - n[i] - d as i64) as f64 * (q[i] - q[i - 1])
                    / (n[i] - n[i - 1]) as f64)
    }

    fn linear(&self, i: usize, d: i32) -> f64 {
        let d = d as f64;
        let neighbor = (i as i64 + d as i64) as usize;
        self.q[i] + d * (self.q[neighbor] - self.q[i]) / (self.n[neighbor] - self.n[i]) as f64
    }

    /// Returns `None` until at least one observation has been added.
    pub fn quantile(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        if (self.count as usize) < MARKER_COUNT {
            let mut sorted = self.startup.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let idx = ((sorted.len() - 1) as f64 * self.p).round() as usize;
            return Some(sorted[idx]);
        }
        Some(self.q[2])
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.q = [0.0; MARKER_COUNT];
        self.startup.clear();
        self.init_markers();
    }

    pub fn target_percentile(&self) -> f64 {
        self.p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_naive_mean_and_variance() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut stats = OnlineStats::new();
        for v in values {
            stats.add(v);
        }
        assert!((stats.mean() - 5.0).abs() < 1e-9);
        // sample variance (n-1 denominator) of this well-known example is 4.57142857...
        assert!((stats.variance() - 32.0 / 7.0).abs() < 1e-9);
        assert_eq!(stats.min(), 2.0);
        assert_eq!(stats.max(), 9.0);
        assert_eq!(stats.sum(), 40.0);
        assert_eq!(stats.count(), 8);
    }

    #[test]
    fn empty_stats_report_zero_variance() {
        let stats = OnlineStats::new();
        assert_eq!(stats.variance(), 0.0);
        assert_eq!(stats.min(), 0.0);
        assert_eq!(stats.max(), 0.0);
    }

    #[test]
    fn reset_clears_accumulated_state() {
        let mut stats = OnlineStats::new();
        stats.add(1.0);
        stats.add(2.0);
        stats.reset();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.mean(), 0.0);
    }

    #[test]
    fn quantile_is_none_before_any_observation() {
        let est = QuantileEstimator::new(0.5);
        assert_eq!(est.quantile(), None);
    }

    #[test]
    fn quantile_converges_near_median_for_uniform_stream() {
        let mut est = QuantileEstimator::new(0.5);
        for i in 1..=1000 {
            est.add_observation(i as f64);
        }
        let median = est.quantile().unwrap();
        // P^2 is an approximation; for a uniform 1..1000 stream the true
        // median is ~500.5, allow a generous tolerance.
        assert!((median - 500.5).abs() < 50.0, "median estimate was {median}");
    }

    #[test]
    fn quantile_during_startup_interpolates_sorted_buffer() {
        let mut est = QuantileEstimator::new(0.5);
        est.add_observation(3.0);
        est.add_observation(1.0);
        est.add_observation(2.0);
        // count == 3 < MARKER_COUNT, should interpolate the sorted buffer [1,2,3]
        assert_eq!(est.quantile(), Some(2.0));
    }

    #[test]
    fn reset_restores_startup_buffering_behavior() {
        let mut est = QuantileEstimator::new(0.9);
        for i in 1..=100 {
            est.add_observation(i as f64);
        }
        est.reset();
        assert_eq!(est.quantile(), None);
        est.add_observation(5.0);
        assert_eq!(est.quantile(), Some(5.0));
    }

    #[test]
    fn out_of_range_percentile_is_clamped() {
        let est = QuantileEstimator::new(5.0);
        assert!(est.target_percentile() < 1.0);
        let est = QuantileEstimator::new(-1.0);
        assert!(est.target_percentile() > 0.0);
    }
}
