//! # boundlibc-membrane
//!
//! Policy layer behind the bounds-checked `memcpy` of boundlibc.
//!
//! - [`config`]: the process-wide bounds-check level, parsed once from
//!   `LIBC_BOUNDS_CHECKS` and cached.
//! - [`variant`]: picks one of three implementations for a level.
//! - [`registry`] and [`check`]: allocation extents published by the
//!   allocator, and the checks the copy variants run against them.

pub mod check;
pub mod config;
pub mod registry;
pub mod variant;

pub use check::{Access, BoundsViolation, check_bounds, check_copy};
pub use config::{BOUNDS_CHECKS_ENV, BoundsCheckLevel, bounds_check_level};
pub use registry::{AllocationExtent, BoundsRegistry, global_registry};
pub use variant::{VariantSet, function_variant};
