//! A fixed-block memory pool for the metric ingestion hot path.
//!
//! Pre-allocates chunks of uniformly-sized, aligned blocks and hands them out
//! from a free list, avoiding the global allocator (and its fragmentation)
//! for workloads that allocate and free many same-sized records. When the
//! free list runs dry the pool grows by doubling, up to `max_blocks`.

use std::alloc::{alloc, dealloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Configuration for a [`BlockPool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Number of blocks allocated up front.
    pub initial_blocks: usize,
    /// Upper bound on total blocks the pool will grow to (0 = unlimited).
    pub max_blocks: usize,
    /// Size of each block, in bytes. Must be a multiple of 8.
    pub block_size: usize,
    /// Alignment for each chunk allocation. Must be a power of two.
    pub alignment: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_blocks: 256,
            max_blocks: 4096,
            block_size: 64,
            alignment: 8,
        }
    }
}

impl PoolConfig {
    /// Validates the configuration's invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.initial_blocks == 0 {
            return Err(PoolError::InvalidConfig("initial_blocks must be non-zero"));
        }
        if self.max_blocks != 0 && self.max_blocks < self.initial_blocks {
            return Err(PoolError::InvalidConfig(
                "max_blocks must be >= initial_blocks, or 0 for unlimited",
            ));
        }
        if self.block_size == 0 || self.block_size % 8 != 0 {
            return Err(PoolError::InvalidConfig("block_size must be a non-zero multiple of 8"));
        }
        if self.alignment == 0 || !self.alignment.is_power_of_two() {
            return Err(PoolError::InvalidConfig("alignment must be a power of two"));
        }
        Ok(())
    }
}

/// Error constructing or operating on a [`BlockPool`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// Configuration failed validation.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(&'static str),
    /// The pool could not grow any further (`max_blocks` reached, or the
    /// allocator itself failed).
    #[error("memory pool exhausted")]
    Exhausted,
    /// `deallocate` was called with a pointer this pool did not hand out.
    #[error("pointer does not belong to this pool")]
    NotOwned,
}

/// Snapshot of pool operation counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
    pub total_allocations: u64,
    pub total_deallocations: u64,
    pub allocation_failures: u64,
    pub peak_usage: u64,
}

impl PoolStats {
    /// Fraction of allocation attempts that succeeded, in `[0.0, 100.0]`.
    /// Returns `100.0` when no allocations have been attempted yet.
    #[must_use]
    pub fn allocation_success_rate(&self) -> f64 {
        let total = self.total_allocations + self.allocation_failures;
        if total == 0 {
            return 100.0;
        }
        (self.total_allocations as f64 / total as f64) * 100.0
    }
}

struct Chunk {
    ptr: *mut u8,
    layout: Layout,
    blocks: usize,
}

struct PoolInner {
    free_blocks: Vec<*mut u8>,
    chunks: Vec<Chunk>,
    total_blocks: usize,
}

#[derive(Default)]
struct Counters {
    total_allocations: AtomicUsize,
    total_deallocations: AtomicUsize,
    allocation_failures: AtomicUsize,
    peak_usage: AtomicUsize,
}

/// A thread-safe fixed-block allocator.
///
/// Blocks are untyped `*mut u8` of `block_size` bytes; callers are
/// responsible for reading/writing within that size and for running
/// destructors before returning a block via [`BlockPool::deallocate`].
pub struct BlockPool {
    config: PoolConfig,
    inner: Mutex<PoolInner>,
    counters: Counters,
}

unsafe impl Send for BlockPool {}
unsafe impl Sync for BlockPool {}

impl BlockPool {
    /// Creates a pool with the given configuration, pre-allocating
    /// `config.initial_blocks` blocks.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if the configuration is invalid,
    /// or [`PoolError::Exhausted`] if the initial chunk allocation fails.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let chunk = alloc_chunk(config.initial_blocks, config.block_size, config.alignment)?;
        let free_blocks = blocks_in_chunk(&chunk, config.block_size);

        Ok(Self {
            config,
            inner: Mutex::new(PoolInner {
                free_blocks,
                total_blocks: config.initial_blocks,
                chunks: vec![chunk],
            }),
            counters: Counters::default(),
        })
    }

    /// Allocates one block, growing the pool if the free list is empty.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] if the pool has hit `max_blocks` or
    /// the allocator fails while growing.
    pub fn allocate(&self) -> Result<*mut u8, PoolError> {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");

        if inner.free_blocks.is_empty() && !self.grow(&mut inner) {
            self.counters.allocation_failures.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::Exhausted);
        }

        let block = inner.free_blocks.pop().expect("grow() guarantees a free block");
        self.counters.total_allocations.fetch_add(1, Ordering::Relaxed);
        self.update_peak_usage(&inner);
        Ok(block)
    }

    /// Returns a block to the free list.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotOwned`] if `ptr` was not handed out by this
    /// pool.
    pub fn deallocate(&self, ptr: *mut u8) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        if !is_owned_block(&inner.chunks, self.config.block_size, ptr) {
            return Err(PoolError::NotOwned);
        }
        inner.free_blocks.push(ptr);
        self.counters.total_deallocations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a block and move-constructs `value` into it, returning an
    /// owning typed pointer. The caller must eventually pass the pointer to
    /// [`BlockPool::deallocate_object`] to run `T`'s destructor and return
    /// the block.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if `size_of::<T>()` exceeds the
    /// pool's `block_size`, or propagates [`BlockPool::allocate`]'s errors.
    pub fn allocate_object<T>(&self, value: T) -> Result<*mut T, PoolError> {
        if std::mem::size_of::<T>() > self.config.block_size {
            return Err(PoolError::InvalidConfig("object size exceeds block size"));
        }
        let block = self.allocate()?.cast::<T>();
        unsafe {
            block.write(value);
        }
        Ok(block)
    }

    /// Drops the object at `obj` and returns its block to the pool.
    ///
    /// # Safety
    ///
    /// `obj` must have been produced by [`BlockPool::allocate_object`] on
    /// this pool and not already deallocated.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotOwned`] if `obj` was not handed out by this
    /// pool.
    pub unsafe fn deallocate_object<T>(&self, obj: *mut T) -> Result<(), PoolError> {
        std::ptr::drop_in_place(obj);
        self.deallocate(obj.cast::<u8>())
    }

    /// Number of blocks currently on the free list.
    #[must_use]
    pub fn available_blocks(&self) -> usize {
        self.inner.lock().expect("pool mutex poisoned").free_blocks.len()
    }

    /// Total number of blocks the pool has ever grown to.
    #[must_use]
    pub fn total_blocks(&self) -> usize {
        self.inner.lock().expect("pool mutex poisoned").total_blocks
    }

    /// Size of each block, in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Snapshot of operation counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_allocations: self.counters.total_allocations.load(Ordering::Relaxed) as u64,
            total_deallocations: self.counters.total_deallocations.load(Ordering::Relaxed) as u64,
            allocation_failures: self.counters.allocation_failures.load(Ordering::Relaxed) as u64,
            peak_usage: self.counters.peak_usage.load(Ordering::Relaxed) as u64,
        }
    }

    /// Resets all operation counters to zero.
    pub fn reset_stats(&self) {
        self.counters.total_allocations.store(0, Ordering::Relaxed);
        self.counters.total_deallocations.store(0, Ordering::Relaxed);
        self.counters.allocation_failures.store(0, Ordering::Relaxed);
        self.counters.peak_usage.store(0, Ordering::Relaxed);
    }

    fn grow(&self, inner: &mut PoolInner) -> bool {
        if self.config.max_blocks != 0 && inner.total_blocks >= self.config.max_blocks {
            return false;
        }
        let remaining = if self.config.max_blocks == 0 {
            inner.total_blocks
        } else {
            self.config.max_blocks - inner.total_blocks
        };
        let new_blocks = remaining.min(inner.total_blocks).max(1);

        let Ok(chunk) = alloc_chunk(new_blocks, self.config.block_size, self.config.alignment) else {
            return false;
        };
        inner.free_blocks.extend(blocks_in_chunk(&chunk, self.config.block_size));
        inner.total_blocks += chunk.blocks;
        inner.chunks.push(chunk);
        true
    }

    fn update_peak_usage(&self, inner: &PoolInner) {
        let current_usage = inner.total_blocks - inner.free_blocks.len();
        let mut peak = self.counters.peak_usage.load(Ordering::Relaxed);
        while current_usage > peak {
            match self.counters.peak_usage.compare_exchange_weak(
                peak,
                current_usage,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => peak = observed,
            }
        }
    }
}

impl Drop for BlockPool {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().expect("pool mutex poisoned");
        for chunk in &inner.chunks {
            unsafe {
                dealloc(chunk.ptr, chunk.layout);
            }
        }
    }
}

fn alloc_chunk(blocks: usize, block_size: usize, alignment: usize) -> Result<Chunk, PoolError> {
    let chunk_size = blocks.checked_mul(block_size).ok_or(PoolError::Exhausted)?;
    let layout = Layout::from_size_align(chunk_size, alignment).map_err(|_| PoolError::Exhausted)?;
    let ptr = unsafe { alloc(layout) };
    if ptr.is_null() {
        return Err(PoolError::Exhausted);
    }
    Ok(Chunk { ptr, layout, blocks })
}

fn blocks_in_chunk(chunk: &Chunk, block_size: usize) -> Vec<*mut u8> {
    (0..chunk.blocks)
        .map(|i| unsafe { chunk.ptr.add(i * block_size) })
        .collect()
}

fn is_owned_block(chunks: &[Chunk], block_size: usize, ptr: *mut u8) -> bool {
    chunks.iter().any(|chunk| {
        let start = chunk.ptr as usize;
        let end = start + chunk.blocks * block_size;
        let addr = ptr as usize;
        addr >= start && addr < end && (addr - start) % block_size == 0
    })
}
