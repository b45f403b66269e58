//! The three `memcpy` implementations the resolver chooses between.
//!
//! All of them are one generic copy instantiated over two flags: whether
//! the source (reads) and the destination (writes) are checked against the
//! allocation registry. A failed check prints a diagnostic and aborts.
//!
//! The checks live outside this `no_builtins` crate, so the compiler may
//! lower their moves into calls to the exported `memcpy`. Such a nested call
//! finds the thread's check flag set and copies without checking.

use std::cell::Cell;
use std::ffi::c_void;

use boundlibc_membrane::check::{BoundsViolation, check_copy};
use boundlibc_membrane::registry::global_registry;
use boundlibc_membrane::variant::VariantSet;

use crate::util::{HEX_BUF_LEN, format_hex, write_stderr};

/// Signature shared by `memcpy` and every variant.
pub type MemcpyFn = unsafe extern "C" fn(*mut c_void, *const c_void, usize) -> *mut c_void;

/// Checks source and destination.
pub const READ_WRITE_CHECKED: MemcpyFn = bounds_checked_memcpy::<true, true>;
/// Checks the destination only.
pub const WRITE_CHECKED: MemcpyFn = bounds_checked_memcpy::<false, true>;
/// No checks.
pub const UNCHECKED: MemcpyFn = bounds_checked_memcpy::<false, false>;

/// Variant set in selector order.
pub const MEMCPY_VARIANTS: VariantSet<MemcpyFn> =
    VariantSet::new(READ_WRITE_CHECKED, WRITE_CHECKED, UNCHECKED);

const WORD: usize = size_of::<usize>();

thread_local! {
    // Set while this thread is inside a check, up to and including the report.
    static IN_CHECK: Cell<bool> = const { Cell::new(false) };
}

/// Plain forward copy. The crate is `no_builtins`, so this loop is never
/// turned back into a call to `memcpy`.
///
/// # Safety
///
/// `src` must be readable and `dst` writable for `n` bytes; the ranges must
/// not overlap.
#[inline(always)]
unsafe fn raw_copy(dst: *mut u8, src: *const u8, n: usize) {
    let mut i = 0;
    if (dst as usize | src as usize) % WORD == 0 {
        while i + WORD <= n {
            // SAFETY: both pointers are word aligned and `i + WORD <= n`.
            unsafe {
                dst.add(i)
                    .cast::<usize>()
                    .write(src.add(i).cast::<usize>().read());
            }
            i += WORD;
        }
    }
    while i < n {
        // SAFETY: `i < n`.
        unsafe { *dst.add(i) = *src.add(i) };
        i += 1;
    }
}

#[cold]
#[inline(never)]
fn report_violation(violation: &BoundsViolation) -> ! {
    let mut hex = [0_u8; HEX_BUF_LEN];
    write_stderr(b"memcpy with ");
    write_stderr(violation.access.as_str().as_bytes());
    write_stderr(b" out of bounds of heap allocation\n\tpointer ");
    write_stderr(format_hex(violation.addr, &mut hex));
    write_stderr(b", length ");
    write_stderr(format_hex(violation.len, &mut hex));
    write_stderr(b", allocation base ");
    write_stderr(format_hex(violation.extent.base, &mut hex));
    write_stderr(b", size ");
    write_stderr(format_hex(violation.extent.len, &mut hex));
    write_stderr(b"\n");
    // SAFETY: abort never returns and has no preconditions.
    unsafe { libc::abort() }
}

/// `memcpy` with the selected pointer bounds enforced.
///
/// # Safety
///
/// Same contract as C `memcpy`: `src` readable and `dst` writable for `n`
/// bytes, no overlap. The checks catch violations of registered extents
/// only.
pub unsafe extern "C" fn bounds_checked_memcpy<const CHECK_READS: bool, const CHECK_WRITES: bool>(
    dst: *mut c_void,
    src: *const c_void,
    n: usize,
) -> *mut c_void {
    if (CHECK_READS || CHECK_WRITES) && !IN_CHECK.with(Cell::get) {
        IN_CHECK.with(|flag| flag.set(true));
        if let Err(violation) = check_copy(
            global_registry(),
            dst.cast_const(),
            src,
            n,
            CHECK_READS,
            CHECK_WRITES,
        ) {
            report_violation(&violation);
        }
        IN_CHECK.with(|flag| flag.set(false));
    }
    if n != 0 {
        // SAFETY: caller upholds the memcpy contract.
        unsafe { raw_copy(dst.cast::<u8>(), src.cast::<u8>(), n) };
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy_with(variant: MemcpyFn, dst: &mut [u8], src: &[u8], n: usize) -> *mut c_void {
        // SAFETY: callers pass n <= min(dst.len(), src.len()).
        unsafe {
            variant(
                dst.as_mut_ptr().cast::<c_void>(),
                src.as_ptr().cast::<c_void>(),
                n,
            )
        }
    }

    #[test]
    fn every_variant_copies_exactly_n_bytes() {
        let src: Vec<u8> = (0..=255).collect();
        for variant in [READ_WRITE_CHECKED, WRITE_CHECKED, UNCHECKED] {
            for n in [1_usize, 7, 8, 9, 63, 64, 200] {
                let mut dst = vec![0xEE_u8; 256];
                let ret = copy_with(variant, &mut dst, &src, n);
                assert_eq!(ret, dst.as_mut_ptr().cast::<c_void>());
                assert_eq!(&dst[..n], &src[..n], "n={n}");
                assert!(dst[n..].iter().all(|&b| b == 0xEE), "n={n} wrote past end");
            }
        }
    }

    #[test]
    fn unaligned_copies_are_byte_exact() {
        let src: Vec<u8> = (0..64).collect();
        let mut dst = vec![0_u8; 64];
        for variant in [READ_WRITE_CHECKED, WRITE_CHECKED, UNCHECKED] {
            dst.fill(0);
            copy_with(variant, &mut dst[3..], &src[5..], 40);
            assert_eq!(&dst[3..43], &src[5..45]);
            assert_eq!(&dst[..3], &[0, 0, 0]);
            assert!(dst[43..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn zero_length_returns_dst_untouched() {
        let mut dst = [9_u8; 4];
        let src = [1_u8; 4];
        for variant in [READ_WRITE_CHECKED, WRITE_CHECKED, UNCHECKED] {
            let ret = copy_with(variant, &mut dst, &src, 0);
            assert_eq!(ret, dst.as_mut_ptr().cast::<c_void>());
            assert_eq!(dst, [9_u8; 4]);
        }
    }

    #[test]
    fn in_bounds_copy_of_tracked_buffers_passes_checks() {
        let src = vec![0x5A_u8; 32];
        let mut dst = vec![0_u8; 32];
        let registry = global_registry();
        registry.register(src.as_ptr().cast::<c_void>(), src.len());
        registry.register(dst.as_ptr().cast::<c_void>(), dst.len());

        copy_with(READ_WRITE_CHECKED, &mut dst, &src, 32);
        assert_eq!(dst, src);
        assert!(!IN_CHECK.with(Cell::get));

        registry.release(src.as_ptr().cast::<c_void>());
        registry.release(dst.as_ptr().cast::<c_void>());
    }

    #[test]
    fn nested_copy_inside_a_check_skips_checks() {
        let src = vec![0x3C_u8; 64];
        let mut dst = vec![0_u8; 64];
        let registry = global_registry();
        registry.register(src.as_ptr().cast::<c_void>(), 16);
        registry.register(dst.as_ptr().cast::<c_void>(), 16);

        // Both sides overrun their registered extents; outside a check this
        // would abort.
        IN_CHECK.with(|flag| flag.set(true));
        copy_with(READ_WRITE_CHECKED, &mut dst, &src, 32);
        assert!(IN_CHECK.with(Cell::get), "nested copy must not clear the flag");
        IN_CHECK.with(|flag| flag.set(false));

        assert_eq!(&dst[..32], &src[..32]);
        assert!(dst[32..].iter().all(|&b| b == 0));

        registry.release(src.as_ptr().cast::<c_void>());
        registry.release(dst.as_ptr().cast::<c_void>());
    }
}
