use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for a [`crate::Ring`]/[`crate::Channel`].
///
/// All counters use `Relaxed` ordering: they are monitoring data, not
/// synchronization, so only the final value after a `snapshot()` matters.
#[derive(Debug, Default)]
pub struct Metrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    batches_sent: AtomicU64,
    batches_received: AtomicU64,
    reserve_spins: AtomicU64,
    push_failures: AtomicU64,
    pop_failures: AtomicU64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_messages_sent(&self, n: u64) {
        self.messages_sent.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_messages_received(&self, n: u64) {
        self.messages_received.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_batches_sent(&self, n: u64) {
        self.batches_sent.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_batches_received(&self, n: u64) {
        self.batches_received.fetch_add(n, Ordering::Relaxed);
    }

    /// Records one CAS retry or backoff step on the hot path.
    #[inline]
    pub fn add_spin(&self) {
        self.reserve_spins.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a `push` rejected because the ring was full.
    #[inline]
    pub fn add_push_failure(&self) {
        self.push_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a `pop` rejected because the ring was empty.
    #[inline]
    pub fn add_pop_failure(&self) {
        self.pop_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_received: self.batches_received.load(Ordering::Relaxed),
            reserve_spins: self.reserve_spins.load(Ordering::Relaxed),
            push_failures: self.push_failures.load(Ordering::Relaxed),
            pop_failures: self.pop_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Metrics`], suitable for exposing to a caller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub batches_sent: u64,
    pub batches_received: u64,
    pub reserve_spins: u64,
    pub push_failures: u64,
    pub pop_failures: u64,
}

impl MetricsSnapshot {
    /// Merges another snapshot's counters into this one (for aggregating
    /// across producers/rings).
    pub fn merge(&mut self, other: &MetricsSnapshot) {
        self.messages_sent += other.messages_sent;
        self.messages_received += other.messages_received;
        self.batches_sent += other.batches_sent;
        self.batches_received += other.batches_received;
        self.reserve_spins += other.reserve_spins;
        self.push_failures += other.push_failures;
        self.pop_failures += other.pop_failures;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let m = Metrics::new();
        m.add_messages_sent(3);
        m.add_messages_received(2);
        m.add_push_failure();
        let snap = m.snapshot();
        assert_eq!(snap.messages_sent, 3);
        assert_eq!(snap.messages_received, 2);
        assert_eq!(snap.push_failures, 1);
    }

    #[test]
    fn merge_sums_fields() {
        let mut a = MetricsSnapshot {
            messages_sent: 1,
            ..Default::default()
        };
        let b = MetricsSnapshot {
            messages_sent: 2,
            messages_received: 5,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.messages_sent, 3);
        assert_eq!(a.messages_received, 5);
    }
}
