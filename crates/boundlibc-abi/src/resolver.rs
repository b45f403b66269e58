//! Binding of the public `memcpy` to one bounds-checking variant.
//!
//! [`memcpy_resolver`] asks the variant selector for the implementation
//! matching the process policy. The exported `memcpy` calls
//! [`dispatch_memcpy`], which resolves through a guarded slot on first use
//! and jumps straight to the cached variant afterwards.
//!
//! Slot lifecycle: `Unresolved -> Resolving -> Resolved`. `Resolving` is
//! never stored; it is the window in which racing first callers compute the
//! variant. They all compute the same one, so each simply stores it. A copy
//! nested inside that window on the resolving thread runs unchecked.

use std::cell::Cell;
use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::copy_variants::{MEMCPY_VARIANTS, MemcpyFn, UNCHECKED};

/// Observable state of the dispatch slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    /// No call has resolved the variant yet.
    Unresolved,
    /// The slot holds the variant for the rest of the process.
    Resolved,
}

// Null until resolved. Variants are code, not data published by the storing
// thread, so relaxed ordering is enough.
static RESOLVED_MEMCPY: AtomicPtr<()> = AtomicPtr::new(std::ptr::null_mut());

thread_local! {
    static RESOLVING: Cell<bool> = const { Cell::new(false) };
}

/// Resolver for `memcpy`: the variant matching `LIBC_BOUNDS_CHECKS`.
///
/// Safe to call before `main`, from any thread, any number of times. C code
/// that binds its own entry points can call the result directly.
#[unsafe(no_mangle)]
pub extern "C" fn boundlibc_memcpy_resolver() -> MemcpyFn {
    memcpy_resolver()
}

/// Rust-callable twin of [`boundlibc_memcpy_resolver`].
#[inline]
pub fn memcpy_resolver() -> MemcpyFn {
    MEMCPY_VARIANTS.select_current()
}

/// Current state of the dispatch slot.
#[must_use]
pub fn resolution_state() -> ResolutionState {
    if RESOLVED_MEMCPY.load(Ordering::Relaxed).is_null() {
        ResolutionState::Unresolved
    } else {
        ResolutionState::Resolved
    }
}

/// The bound `memcpy` variant, resolving it on first use.
#[must_use]
#[inline]
pub fn resolved_memcpy() -> MemcpyFn {
    let raw = RESOLVED_MEMCPY.load(Ordering::Relaxed);
    if raw.is_null() {
        return resolve_slot();
    }
    // SAFETY: the slot only ever holds a `MemcpyFn` stored by `resolve_slot`.
    unsafe { std::mem::transmute::<*mut (), MemcpyFn>(raw) }
}

#[cold]
#[inline(never)]
fn resolve_slot() -> MemcpyFn {
    if RESOLVING.with(Cell::get) {
        return UNCHECKED;
    }
    RESOLVING.with(|flag| flag.set(true));
    let resolved = memcpy_resolver();
    RESOLVED_MEMCPY.store(resolved as *mut (), Ordering::Relaxed);
    RESOLVING.with(|flag| flag.set(false));
    resolved
}

/// Guarded `memcpy` entry: one relaxed load and an indirect call.
///
/// # Safety
///
/// Same contract as C `memcpy`.
pub unsafe extern "C" fn dispatch_memcpy(
    dst: *mut c_void,
    src: *const c_void,
    n: usize,
) -> *mut c_void {
    unsafe { resolved_memcpy()(dst, src, n) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_resolves_and_copies() {
        let src = *b"bounds-checked";
        let mut dst = [0_u8; 14];
        // SAFETY: both buffers are 14 bytes.
        let ret = unsafe {
            dispatch_memcpy(
                dst.as_mut_ptr().cast::<c_void>(),
                src.as_ptr().cast::<c_void>(),
                src.len(),
            )
        };
        assert_eq!(ret, dst.as_mut_ptr().cast::<c_void>());
        assert_eq!(dst, src);
        assert_eq!(resolution_state(), ResolutionState::Resolved);
    }

    #[test]
    fn resolved_slot_never_changes() {
        let first = resolved_memcpy() as usize;
        assert_eq!(resolution_state(), ResolutionState::Resolved);
        for _ in 0..8 {
            assert_eq!(resolved_memcpy() as usize, first);
        }
    }

    #[test]
    fn nested_resolution_takes_the_unchecked_copy() {
        RESOLVING.with(|flag| flag.set(true));
        let nested = resolve_slot();
        RESOLVING.with(|flag| flag.set(false));

        let src = [0x11_u8; 24];
        let mut dst = [0_u8; 24];
        // SAFETY: both buffers are 24 bytes.
        unsafe {
            nested(
                dst.as_mut_ptr().cast::<c_void>(),
                src.as_ptr().cast::<c_void>(),
                24,
            )
        };
        assert_eq!(dst, src);
    }

    #[test]
    fn exported_resolver_returns_a_working_copy() {
        let resolved = boundlibc_memcpy_resolver();
        let src = *b"resolver";
        let mut dst = [0_u8; 8];
        // SAFETY: both buffers are 8 bytes.
        let ret = unsafe {
            resolved(
                dst.as_mut_ptr().cast::<c_void>(),
                src.as_ptr().cast::<c_void>(),
                8,
            )
        };
        assert_eq!(ret, dst.as_mut_ptr().cast::<c_void>());
        assert_eq!(dst, src);
    }

    #[test]
    fn concurrent_first_calls_copy_correctly() {
        let handles: Vec<_> = (0..8_u8)
            .map(|seed| {
                std::thread::spawn(move || {
                    let src = [seed; 64];
                    let mut dst = [0_u8; 64];
                    // SAFETY: both buffers are 64 bytes.
                    unsafe {
                        dispatch_memcpy(
                            dst.as_mut_ptr().cast::<c_void>(),
                            src.as_ptr().cast::<c_void>(),
                            64,
                        );
                    }
                    (dst == src, resolved_memcpy() as usize)
                })
            })
            .collect();
        let results: Vec<(bool, usize)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|(copied, _)| *copied));
        let first = results[0].1;
        assert!(results.iter().all(|(_, f)| *f == first));
    }
}
