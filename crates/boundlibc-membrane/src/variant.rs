//! Selection of one implementation out of a fixed set, by bounds-check level.

use crate::config::{BoundsCheckLevel, bounds_check_level};

/// Pick the candidate matching `level`.
///
/// Candidates are passed strongest enforcement first: read-write, write-only,
/// none. `Unknown` means the policy cache broke its contract; the process is
/// aborted on the spot rather than running an arbitrary variant.
#[inline(always)]
pub fn function_variant<F: Copy>(
    level: BoundsCheckLevel,
    read_write: F,
    write_only: F,
    none: F,
) -> F {
    match level {
        BoundsCheckLevel::ReadWrite => read_write,
        BoundsCheckLevel::WriteOnly => write_only,
        BoundsCheckLevel::None => none,
        BoundsCheckLevel::Unknown => std::process::abort(),
    }
}

/// The three interchangeable implementations of one entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantSet<F> {
    /// Checks source and destination.
    pub read_write: F,
    /// Checks the destination only.
    pub write_only: F,
    /// Checks nothing.
    pub none: F,
}

impl<F: Copy> VariantSet<F> {
    #[must_use]
    pub const fn new(read_write: F, write_only: F, none: F) -> Self {
        Self {
            read_write,
            write_only,
            none,
        }
    }

    /// Variant for an explicit level.
    #[inline]
    pub fn select(&self, level: BoundsCheckLevel) -> F {
        function_variant(level, self.read_write, self.write_only, self.none)
    }

    /// Variant for the process policy, resolving it on first use.
    #[inline]
    pub fn select_current(&self) -> F {
        self.select(bounds_check_level())
    }
}
