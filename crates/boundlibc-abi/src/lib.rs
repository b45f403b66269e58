// The copy loops in this crate implement `memcpy`; LLVM must not lower them
// back into calls to it.
#![no_builtins]
// All extern "C" ABI exports accept raw pointers from C callers with C
// semantics, so per-function safety docs would be redundant boilerplate.
#![allow(clippy::missing_safety_doc)]
//! # boundlibc-abi
//!
//! `extern "C"` boundary for boundlibc.
//!
//! This crate produces a `cdylib` that exports `memcpy`. The exported symbol
//! is bound, once per process, to one of three copy variants that differ in
//! which pointer arguments they bounds check:
//!
//! ```text
//! LIBC_BOUNDS_CHECKS -> policy cache -> variant selector -> resolver -> memcpy
//! ```
//!
//! | value            | variant                     |
//! |------------------|-----------------------------|
//! | `0`              | no checks                   |
//! | `1`, unset, other| destination checked         |
//! | `2`              | source and destination      |

mod macros;

mod util;

pub mod copy_variants;
pub mod registry_abi;
pub mod resolver;

// Gated behind cfg(not(test)) because it exports the unmangled `memcpy`
// symbol, which would shadow the host libc in the test binary.
#[cfg(not(test))]
pub mod string_abi;

pub use copy_variants::{MEMCPY_VARIANTS, MemcpyFn};
pub use resolver::{ResolutionState, dispatch_memcpy, memcpy_resolver, resolution_state};
