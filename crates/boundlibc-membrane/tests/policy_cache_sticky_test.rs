//! Integration test: the resolved bounds-check level survives later
//! in-process changes to `LIBC_BOUNDS_CHECKS`.
//!
//! Kept as the only test in this binary because it mutates the process
//! environment.

use boundlibc_membrane::config::{cached_level, resolve_from_environ};
use boundlibc_membrane::{BOUNDS_CHECKS_ENV, BoundsCheckLevel, bounds_check_level};

fn different_value(level: BoundsCheckLevel) -> &'static str {
    match level {
        BoundsCheckLevel::ReadWrite => "0",
        _ => "2",
    }
}

#[test]
fn level_is_fixed_after_first_resolution() {
    let first = bounds_check_level();
    assert_ne!(first, BoundsCheckLevel::Unknown);
    assert_eq!(cached_level(), first);

    // SAFETY: no other thread in this test binary touches the environment.
    unsafe { std::env::set_var(BOUNDS_CHECKS_ENV, different_value(first)) };
    assert_ne!(resolve_from_environ(), first, "uncached walk sees the new value");

    for _ in 0..3 {
        assert_eq!(bounds_check_level(), first);
    }

    // SAFETY: as above.
    unsafe { std::env::remove_var(BOUNDS_CHECKS_ENV) };
    assert_eq!(bounds_check_level(), first);
}
