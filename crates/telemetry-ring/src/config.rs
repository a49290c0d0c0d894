use thiserror::Error;

/// Configuration for a [`crate::Ring`] or the [`crate::Channel`] wrapping it.
///
/// `capacity` must be a non-zero power of two (slot index is computed via a
/// mask, not a modulo). `max_producers` bounds how many [`crate::Producer`]
/// handles [`crate::Channel::register`] will hand out before it starts
/// returning [`crate::ChannelError::TooManyProducers`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    capacity: usize,
    pub max_producers: usize,
    pub enable_metrics: bool,
}

/// Error constructing a [`Config`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `capacity` was zero.
    #[error("capacity must be non-zero")]
    ZeroCapacity,
    /// `capacity` was not a power of two (slot indexing relies on masking).
    #[error("capacity {0} is not a power of two")]
    CapacityNotPowerOfTwo(usize),
}

impl Config {
    /// Creates a new configuration.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or not a power of two. Use [`Config::try_new`]
    /// to handle this as a recoverable error instead.
    #[must_use]
    pub fn new(capacity: usize, max_producers: usize, enable_metrics: bool) -> Self {
        Self::try_new(capacity, max_producers, enable_metrics)
            .expect("invalid ring configuration")
    }

    /// Fallible constructor: validates `capacity` before returning.
    pub fn try_new(
        capacity: usize,
        max_producers: usize,
        enable_metrics: bool,
    ) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if !capacity.is_power_of_two() {
            return Err(ConfigError::CapacityNotPowerOfTwo(capacity));
        }
        Ok(Self {
            capacity,
            max_producers,
            enable_metrics,
        })
    }

    /// Returns the configured ring capacity (always a power of two).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the bitmask used to wrap a sequence number into a slot index.
    #[inline]
    pub(crate) fn mask(&self) -> usize {
        self.capacity - 1
    }
}

impl Default for Config {
    /// 1024-slot ring, up to 16 producers, metrics enabled.
    fn default() -> Self {
        Self {
            capacity: 1024,
            max_producers: 16,
            enable_metrics: true,
        }
    }
}

/// Low-latency preset: a 4K-slot ring (fits comfortably in L1/L2), 16 producers,
/// metrics disabled to keep the hot path free of atomic increments.
pub const LOW_LATENCY_CONFIG: Config = Config {
    capacity: 4096,
    max_producers: 16,
    enable_metrics: false,
};

/// High-throughput preset: a 256K-slot ring, 32 producers, metrics enabled so
/// backpressure and drop rates stay observable under load.
pub const HIGH_THROUGHPUT_CONFIG: Config = Config {
    capacity: 262_144,
    max_producers: 32,
    enable_metrics: true,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_capacity() {
        assert_eq!(
            Config::try_new(0, 1, false).unwrap_err(),
            ConfigError::ZeroCapacity
        );
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert_eq!(
            Config::try_new(100, 1, false).unwrap_err(),
            ConfigError::CapacityNotPowerOfTwo(100)
        );
    }

    #[test]
    fn mask_matches_capacity_minus_one() {
        let cfg = Config::new(16, 4, false);
        assert_eq!(cfg.mask(), 15);
    }
}
