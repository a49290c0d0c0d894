//! Lock-free ring buffers and a fixed-block memory pool for the telemetry
//! ingestion hot path.
//!
//! This crate provides two complementary primitives:
//!
//! - [`Channel`]/[`Ring`]: a ring-decomposed MPSC channel, where each producer
//!   owns a dedicated SPSC ring. Producer-producer contention is eliminated
//!   entirely because producers never touch each other's cache lines.
//! - [`mpmc::Queue`]: a genuine bounded MPMC queue (Vyukov-style, CAS per
//!   slot) for call sites that need multiple independent consumers, such as
//!   fan-out metric ingestion.
//!
//! [`pool::BlockPool`] is a fixed-block allocator for the same hot path,
//! sitting alongside the ring primitives so callers that need to avoid the
//! global allocator for small, uniformly-sized records can do so.
//!
//! # Example
//!
//! ```
//! use telemetry_ring::{Channel, Config};
//! use std::mem::MaybeUninit;
//!
//! let channel = Channel::<u64>::new(Config::default());
//! let producer = channel.register().unwrap();
//!
//! producer.push(42);
//!
//! if let Some(mut reservation) = producer.reserve(1) {
//!     reservation.as_mut_slice()[0] = MaybeUninit::new(43);
//!     reservation.commit();
//! }
//!
//! let consumed = channel.consume_all(|item: &u64| {
//!     let _ = item;
//! });
//! assert_eq!(consumed, 2);
//! ```

mod backoff;
mod channel;
mod config;
mod invariants;
mod metrics;
pub mod mpmc;
pub mod pool;
mod reservation;
mod ring;

pub use backoff::Backoff;
pub use channel::{Channel, ChannelError, Producer};
pub use config::{Config, ConfigError, HIGH_THROUGHPUT_CONFIG, LOW_LATENCY_CONFIG};
pub use metrics::{Metrics, MetricsSnapshot};
pub use mpmc::{MpmcConfig, MpmcStats, Queue, QueueError};
pub use pool::{BlockPool, PoolConfig, PoolError, PoolStats};
pub use reservation::Reservation;
pub use ring::Ring;
