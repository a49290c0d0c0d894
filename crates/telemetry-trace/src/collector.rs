//! Span ingestion: wraps a [`telemetry_ring::Channel`] of [`Span`] so each
//! tracing call-site gets its own lock-free producer handle.

use crate::span::Span;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use telemetry_ring::{Channel, ChannelError, Config, Producer};
use thiserror::Error;

/// Configuration for a [`SpanCollector`].
#[derive(Debug, Clone, Copy)]
pub struct CollectorConfig {
    pub ring: Config,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self { ring: Config::default() }
    }
}

/// Counters tracking span ingestion and consumption.
#[derive(Debug, Default)]
pub struct CollectorMetrics {
    pub spans_submitted: AtomicU64,
    pub spans_dropped: AtomicU64,
    pub spans_consumed: AtomicU64,
}

/// Error registering a new producer with a [`SpanCollector`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("collector reached its producer limit: {0}")]
    RegistrationFailed(String),
}

/// Error submitting a span through a [`SpanProducer`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The producer's ring is full; the caller should back off and retry.
    #[error("collector ring is full")]
    Full,
    /// The collector has been closed.
    #[error("collector is closed")]
    Closed,
}

/// Span ingestion point: one lock-free [`Channel<Span>`] shared by every
/// registered [`SpanProducer`], drained by a single consumer loop.
pub struct SpanCollector {
    channel: Channel<Span>,
    metrics: Arc<CollectorMetrics>,
}

impl SpanCollector {
    #[must_use]
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            channel: Channel::new(config.ring),
            metrics: Arc::new(CollectorMetrics::default()),
        }
    }

    /// Registers a new ingestion point.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::RegistrationFailed`] if the collector
    /// has already handed out `max_producers` handles.
    pub fn register(&self) -> Result<SpanProducer, RegistrationError> {
        let producer = self
            .channel
            .register()
            .map_err(|e: ChannelError| RegistrationError::RegistrationFailed(e.to_string()))?;
        Ok(SpanProducer {
            producer,
            metrics: Arc::clone(&self.metrics),
        })
    }

    /// Drains up to `max` spans, invoking `handler` with each, owned.
    /// Returns the number consumed.
    pub fn consume_all_up_to(&self, max: usize, mut handler: impl FnMut(Span)) -> usize {
        let metrics = &self.metrics;
        let n = self.channel.consume_all_up_to_owned(max, |span| handler(span));
        metrics.spans_consumed.fetch_add(n as u64, Ordering::Relaxed);
        n
    }

    /// Drains every currently-readable span, invoking `handler` with each,
    /// owned. Returns the number consumed.
    pub fn consume_all(&self, mut handler: impl FnMut(Span)) -> usize {
        let n = self.channel.consume_all_owned(|span| handler(span));
        self.metrics.spans_consumed.fetch_add(n as u64, Ordering::Relaxed);
        n
    }

    /// Collector-wide ingestion/consumption counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<CollectorMetrics> {
        &self.metrics
    }

    /// Closes the collector; registered producers will start rejecting
    /// submissions with [`SubmitError::Closed`].
    pub fn close(&self) {
        self.channel.close();
    }

    /// True once [`SpanCollector::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

/// A single producer's handle into a [`SpanCollector`]'s ring.
///
/// Does not implement `Clone`: each handle owns one dedicated SPSC ring
/// slot, and cloning would let two threads race writes into the same ring,
/// violating its single-producer invariant.
pub struct SpanProducer {
    producer: Producer<Span>,
    metrics: Arc<CollectorMetrics>,
}

impl SpanProducer {
    /// Attempts to submit `span` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Closed`] if the collector has been closed, or
    /// [`SubmitError::Full`] if the producer's ring has no free slot.
    pub fn try_submit_span(&self, span: Span) -> Result<(), SubmitError> {
        if self.producer.is_closed() {
            return Err(SubmitError::Closed);
        }
        if self.producer.push(span) {
            self.metrics.spans_submitted.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.metrics.spans_dropped.fetch_add(1, Ordering::Relaxed);
            Err(SubmitError::Full)
        }
    }

    /// Producer id within the collector's ring set.
    #[must_use]
    pub fn id(&self) -> usize {
        self.producer.id()
    }
}
