//! Allocation extent registry.
//!
//! The allocator is external to this crate; it publishes the extent of every
//! live allocation here so the bounds-checked copies can look them up.
//! Pointers outside every registered extent are treated as untracked.
//!
//! Mutating the map may itself call the exported `memcpy`. Lookups made by
//! the thread that holds the write lock therefore report untracked instead of
//! waiting on a lock they already hold.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

/// Extent of a tracked allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationExtent {
    /// Base address of the tracked allocation.
    pub base: usize,
    /// Allocation length in bytes.
    pub len: usize,
}

impl AllocationExtent {
    /// One past the last byte of the allocation.
    #[must_use]
    pub fn end(self) -> usize {
        self.base.saturating_add(self.len)
    }

    /// Returns true if `addr` lies inside `[base, base + len)`.
    #[must_use]
    pub fn contains(self, addr: usize) -> bool {
        (self.base..self.end()).contains(&addr)
    }

    /// Remaining bytes from `addr` to end of allocation.
    #[must_use]
    pub fn remaining(self, addr: usize) -> Option<usize> {
        if !self.contains(addr) {
            return None;
        }
        Some(self.end() - addr)
    }
}

impl fmt::Display for AllocationExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}+{:#x}", self.base, self.len)
    }
}

thread_local! {
    static MUTATING: Cell<bool> = const { Cell::new(false) };
}

struct MutationGuard;

impl MutationGuard {
    fn enter() -> Self {
        MUTATING.with(|flag| flag.set(true));
        Self
    }
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        MUTATING.with(|flag| flag.set(false));
    }
}

fn mutating_on_this_thread() -> bool {
    MUTATING.with(Cell::get)
}

/// Concurrent allocation extent registry, keyed by base address.
#[derive(Debug)]
pub struct BoundsRegistry {
    extents: RwLock<BTreeMap<usize, AllocationExtent>>,
    // Lets lookups skip the lock entirely while nothing is registered.
    tracked: AtomicUsize,
}

impl Default for BoundsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundsRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            extents: parking_lot::const_rwlock(BTreeMap::new()),
            tracked: AtomicUsize::new(0),
        }
    }

    /// Register a live allocation. Zero-length allocations are ignored;
    /// re-registering a base replaces its extent.
    pub fn register(&self, base: *const c_void, len: usize) {
        if base.is_null() || len == 0 {
            return;
        }
        let base_addr = base as usize;
        let _guard = MutationGuard::enter();
        let mut extents = self.extents.write();
        if extents
            .insert(base_addr, AllocationExtent { base: base_addr, len })
            .is_none()
        {
            self.tracked.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Forget the allocation starting at `base`. Returns its extent if it
    /// was tracked.
    pub fn release(&self, base: *const c_void) -> Option<AllocationExtent> {
        let _guard = MutationGuard::enter();
        let removed = self.extents.write().remove(&(base as usize));
        if removed.is_some() {
            self.tracked.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Number of tracked allocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracked.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the allocation containing `ptr`, if any.
    #[must_use]
    pub fn lookup_containing(&self, ptr: *const c_void) -> Option<AllocationExtent> {
        if self.is_empty() || mutating_on_this_thread() {
            return None;
        }
        let addr = ptr as usize;
        let extents = self.extents.read();
        extents
            .range(..=addr)
            .next_back()
            .map(|(_, extent)| *extent)
            .filter(|extent| extent.contains(addr))
    }
}

static GLOBAL_REGISTRY: BoundsRegistry = BoundsRegistry::new();

/// Process-wide registry consulted by the bounds-checked copies.
#[must_use]
pub fn global_registry() -> &'static BoundsRegistry {
    &GLOBAL_REGISTRY
}
