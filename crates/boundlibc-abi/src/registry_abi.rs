//! ABI layer through which an external allocator publishes allocation
//! extents, and through which C code can query the active policy.

use std::ffi::{c_int, c_void};

use boundlibc_membrane::config::bounds_check_level;
use boundlibc_membrane::registry::global_registry;

use crate::macros::abi_fn;

abi_fn! {
    /// Record `[base, base + len)` as a live allocation. Later bounds-checked
    /// copies that start inside it must stay inside it.
    ///
    /// Must not be called while the allocator holds a lock that `memcpy`
    /// could need: registration may allocate.
    fn boundlibc_register_allocation(base: *const c_void, len: usize) {
        global_registry().register(base, len);
    }
}

abi_fn! {
    /// Forget the allocation starting at `base`. Returns 1 if it was tracked,
    /// 0 otherwise.
    fn boundlibc_release_allocation(base: *const c_void) -> c_int {
        c_int::from(global_registry().release(base).is_some())
    }
}

abi_fn! {
    /// Active bounds-check level: 1 = none, 2 = write-only, 3 = read-write.
    /// Resolves the policy if no copy has done so yet.
    fn boundlibc_bounds_check_level() -> c_int {
        bounds_check_level() as c_int
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_release_round_trip() {
        let buf = vec![0_u8; 48];
        let base = buf.as_ptr().cast::<c_void>();
        // SAFETY: base points at a live 48-byte buffer.
        unsafe {
            boundlibc_register_allocation(base, buf.len());
            let inner = buf.as_ptr().wrapping_add(40).cast::<c_void>();
            assert_eq!(global_registry().lookup_containing(inner).unwrap().len, 48);
            assert_eq!(boundlibc_release_allocation(base), 1);
            assert_eq!(boundlibc_release_allocation(base), 0);
        }
    }

    #[test]
    fn level_query_is_resolved() {
        // SAFETY: no pointer arguments.
        let level = unsafe { boundlibc_bounds_check_level() };
        assert!((1..=3).contains(&level), "level {level}");
        assert_eq!(level, bounds_check_level() as c_int);
    }
}
