// allocator.rs — Host memory allocation for bounds-query buffers
//
// The allocation pair the bounds-query protocol uses to move a descriptor
// from QUERIED to ALLOCATED. Any type implementing `HostAllocator` can be
// substituted; `CountingAllocator` adds bookkeeping and an optional byte
// limit for leak checks and failure injection.
//
// Preconditions: `free` receives memory produced by `alloc` of the same
//   allocator.
// Postconditions: allocated memory is zero-filled.
// Failure modes: `alloc` returns `AllocError` when the request cannot be
//   satisfied.
// Side effects: process heap allocation.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ── Host memory ─────────────────────────────────────────────────────────────

/// An owned block of host memory backing a buffer descriptor.
pub struct HostMemory {
    bytes: Box<[u8]>,
}

impl HostMemory {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Address of the first byte, for display only.
    pub fn address(&self) -> usize {
        self.bytes.as_ptr() as usize
    }
}

impl fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostMemory({} bytes at {:#x})", self.len(), self.address())
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocError {
    pub requested: usize,
    pub reason: String,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to allocate {} bytes: {}", self.requested, self.reason)
    }
}

impl std::error::Error for AllocError {}

// ── Allocators ──────────────────────────────────────────────────────────────

pub trait HostAllocator {
    fn alloc(&self, size: usize) -> Result<HostMemory, AllocError>;
    fn free(&self, memory: HostMemory);
}

fn zeroed(size: usize) -> Result<HostMemory, AllocError> {
    let mut bytes = Vec::new();
    bytes.try_reserve_exact(size).map_err(|e| AllocError {
        requested: size,
        reason: e.to_string(),
    })?;
    bytes.resize(size, 0);
    Ok(HostMemory {
        bytes: bytes.into_boxed_slice(),
    })
}

/// The process heap.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl HostAllocator for SystemAllocator {
    fn alloc(&self, size: usize) -> Result<HostMemory, AllocError> {
        zeroed(size)
    }

    fn free(&self, memory: HostMemory) {
        drop(memory);
    }
}

#[derive(Debug, Default)]
struct AllocStats {
    live: AtomicUsize,
    live_bytes: AtomicUsize,
    total_allocs: AtomicUsize,
    total_frees: AtomicUsize,
}

/// Heap allocator that tracks live allocations. Clones share counters.
#[derive(Debug, Clone, Default)]
pub struct CountingAllocator {
    stats: Arc<AllocStats>,
    limit: Option<usize>,
}

impl CountingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any allocation that would take live bytes above `limit`.
    pub fn with_limit(limit: usize) -> Self {
        CountingAllocator {
            stats: Arc::default(),
            limit: Some(limit),
        }
    }

    pub fn live_allocations(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }

    pub fn live_bytes(&self) -> usize {
        self.stats.live_bytes.load(Ordering::SeqCst)
    }

    pub fn total_allocations(&self) -> usize {
        self.stats.total_allocs.load(Ordering::SeqCst)
    }

    pub fn total_frees(&self) -> usize {
        self.stats.total_frees.load(Ordering::SeqCst)
    }
}

impl HostAllocator for CountingAllocator {
    fn alloc(&self, size: usize) -> Result<HostMemory, AllocError> {
        if let Some(limit) = self.limit {
            let live = self.live_bytes();
            if live + size > limit {
                return Err(AllocError {
                    requested: size,
                    reason: format!("limit of {limit} bytes reached ({live} live)"),
                });
            }
        }
        let memory = zeroed(size)?;
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        self.stats.live_bytes.fetch_add(size, Ordering::SeqCst);
        self.stats.total_allocs.fetch_add(1, Ordering::SeqCst);
        Ok(memory)
    }

    fn free(&self, memory: HostMemory) {
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
        self.stats.live_bytes.fetch_sub(memory.len(), Ordering::SeqCst);
        self.stats.total_frees.fetch_add(1, Ordering::SeqCst);
        drop(memory);
    }
}
