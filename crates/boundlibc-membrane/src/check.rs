//! Bounds checks for pointer arguments of copy-like operations.

use std::ffi::c_void;
use std::fmt;

use thiserror::Error;

use crate::registry::{AllocationExtent, BoundsRegistry};

/// Which side of a copy a pointer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Source pointer (loads).
    Read,
    /// Destination pointer (stores).
    Write,
}

impl Access {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "source",
            Self::Write => "destination",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pointer range that runs past the end of its tracked allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{access} {addr:#x}+{len:#x} out of bounds of allocation {extent}")]
pub struct BoundsViolation {
    pub access: Access,
    pub addr: usize,
    pub len: usize,
    pub extent: AllocationExtent,
}

/// Check that `[ptr, ptr + len)` stays inside the allocation containing
/// `ptr`. Untracked pointers pass: only registered allocations have known
/// bounds.
pub fn check_bounds(
    registry: &BoundsRegistry,
    ptr: *const c_void,
    len: usize,
    access: Access,
) -> Result<(), BoundsViolation> {
    let Some(extent) = registry.lookup_containing(ptr) else {
        return Ok(());
    };
    let addr = ptr as usize;
    match extent.remaining(addr) {
        Some(remaining) if len <= remaining => Ok(()),
        _ => Err(BoundsViolation {
            access,
            addr,
            len,
            extent,
        }),
    }
}

/// Checks for one copy of `len` bytes, as enabled by the two flags.
/// The destination is checked first.
pub fn check_copy(
    registry: &BoundsRegistry,
    dst: *const c_void,
    src: *const c_void,
    len: usize,
    check_reads: bool,
    check_writes: bool,
) -> Result<(), BoundsViolation> {
    if check_writes {
        check_bounds(registry, dst, len, Access::Write)?;
    }
    if check_reads {
        check_bounds(registry, src, len, Access::Read)?;
    }
    Ok(())
}
