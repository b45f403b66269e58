//! ABI layer for `memcpy`.
//!
//! The exported symbol is a thin guard in front of the resolved variant: one
//! relaxed load, then an indirect call.

use std::ffi::c_void;

use crate::macros::abi_fn;
use crate::resolver::dispatch_memcpy;

abi_fn! {
    /// C `memcpy` -- copies `n` bytes from `src` to `dst` and returns `dst`.
    ///
    /// Bounds enforcement depends on `LIBC_BOUNDS_CHECKS`, fixed at the
    /// first call of the process.
    ///
    /// # Safety
    ///
    /// Caller must ensure `src` and `dst` are valid for `n` bytes and do not overlap.
    fn memcpy(dst: *mut c_void, src: *const c_void, n: usize) -> *mut c_void {
        dispatch_memcpy(dst, src, n)
    }
}
