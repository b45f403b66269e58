//! Bounds-check policy configuration.
//!
//! The policy is set via the `LIBC_BOUNDS_CHECKS` environment variable:
//! - `0`: no bounds checks on pointer arguments.
//! - `1` (default): only the destination (store) pointer is bounds checked.
//!   Unset, empty and unrecognized values also select this level.
//! - `2`: source and destination pointers are both bounds checked.
//!
//! Only the first byte of the value is significant, so `20` selects
//! read-write checks and `1x` selects write-only checks.
//!
//! The variable is read once per process, on the first call that needs the
//! policy, by walking the raw `environ` table. `std::env::var` is not usable
//! here: it allocates and copies, and both paths can call back into the
//! `memcpy` that is being resolved.

use std::ffi::{CStr, c_char};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};

/// Environment variable holding the bounds-check policy.
pub const BOUNDS_CHECKS_ENV: &str = "LIBC_BOUNDS_CHECKS";

// Prefix of a matching `environ` entry: the exact key followed by `=`.
const ENTRY_PREFIX: &[u8] = b"LIBC_BOUNDS_CHECKS=";

/// Level used when no entry selects one. Fails toward enforcement.
pub const DEFAULT_LEVEL: BoundsCheckLevel = BoundsCheckLevel::WriteOnly;

/// Which pointer arguments are bounds checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BoundsCheckLevel {
    /// `environ` has not been parsed yet. Never returned by
    /// [`bounds_check_level`].
    Unknown = 0,
    /// No bounds checks.
    None = 1,
    /// Only stores are bounds checked.
    WriteOnly = 2,
    /// Loads and stores are bounds checked.
    ReadWrite = 3,
}

impl BoundsCheckLevel {
    /// All resolved levels, strongest enforcement first.
    pub const RESOLVED: [Self; 3] = [Self::ReadWrite, Self::WriteOnly, Self::None];

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::None,
            2 => Self::WriteOnly,
            3 => Self::ReadWrite,
            _ => Self::Unknown,
        }
    }

    /// Returns true if source pointers are checked at this level.
    #[must_use]
    pub const fn checks_reads(self) -> bool {
        matches!(self, Self::ReadWrite)
    }

    /// Returns true if destination pointers are checked at this level.
    #[must_use]
    pub const fn checks_writes(self) -> bool {
        matches!(self, Self::ReadWrite | Self::WriteOnly)
    }

    /// Stable lowercase name, used in logs and the harness probe output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::None => "none",
            Self::WriteOnly => "write-only",
            Self::ReadWrite => "read-write",
        }
    }

    /// Inverse of [`as_str`](Self::as_str).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "unknown" => Some(Self::Unknown),
            "none" => Some(Self::None),
            "write-only" => Some(Self::WriteOnly),
            "read-write" => Some(Self::ReadWrite),
            _ => None,
        }
    }
}

impl fmt::Display for BoundsCheckLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map the first byte of a `LIBC_BOUNDS_CHECKS` value to a level.
///
/// `b'0'` and `b'2'` are the only bytes that move away from the default;
/// `b'1'`, a NUL (empty value) and anything malformed give
/// [`BoundsCheckLevel::WriteOnly`].
#[must_use]
pub const fn level_from_value_byte(byte: u8) -> BoundsCheckLevel {
    match byte {
        b'0' => BoundsCheckLevel::None,
        b'2' => BoundsCheckLevel::ReadWrite,
        _ => BoundsCheckLevel::WriteOnly,
    }
}

/// Level selected by a single `NAME=VALUE` entry, or `None` if the entry is
/// for some other variable.
#[must_use]
pub fn level_from_entry(entry: &[u8]) -> Option<BoundsCheckLevel> {
    let value = entry.strip_prefix(ENTRY_PREFIX)?;
    Some(level_from_value_byte(value.first().copied().unwrap_or(0)))
}

/// Resolve the level from a snapshot of `NAME=VALUE` entries.
///
/// The last matching entry wins. No match gives [`DEFAULT_LEVEL`].
pub fn resolve_from_entries<I, E>(entries: I) -> BoundsCheckLevel
where
    I: IntoIterator<Item = E>,
    E: AsRef<[u8]>,
{
    entries
        .into_iter()
        .filter_map(|entry| level_from_entry(entry.as_ref()))
        .last()
        .unwrap_or(DEFAULT_LEVEL)
}

/// Iterator over the entries of a null-terminated `NAME=VALUE` table such as
/// `environ`. Yields borrowed bytes; allocates nothing.
struct RawEntries<'a> {
    cursor: *const *const c_char,
    _table: PhantomData<&'a CStr>,
}

impl RawEntries<'_> {
    /// # Safety
    ///
    /// `table` must be null or point to a null-terminated array of
    /// NUL-terminated strings that stay alive and unmodified while the
    /// iterator and its items are in use.
    unsafe fn new(table: *const *const c_char) -> Self {
        Self {
            cursor: table,
            _table: PhantomData,
        }
    }
}

impl<'a> Iterator for RawEntries<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_null() {
            return None;
        }
        // SAFETY: `new`'s contract; the cursor never moves past the null
        // terminator.
        let entry = unsafe { *self.cursor };
        if entry.is_null() {
            self.cursor = std::ptr::null();
            return None;
        }
        // SAFETY: `entry` was not the terminator, so the next slot exists.
        self.cursor = unsafe { self.cursor.add(1) };
        // SAFETY: every non-null slot is a NUL-terminated string.
        Some(unsafe { CStr::from_ptr(entry) }.to_bytes())
    }
}

#[cfg(not(target_vendor = "apple"))]
unsafe fn environ_table() -> *const *const c_char {
    unsafe extern "C" {
        static mut environ: *const *const c_char;
    }
    // SAFETY: plain read of the pointer value; no reference is formed.
    unsafe { environ }
}

#[cfg(target_vendor = "apple")]
unsafe fn environ_table() -> *const *const c_char {
    unsafe extern "C" {
        fn _NSGetEnviron() -> *mut *mut *mut c_char;
    }
    // SAFETY: _NSGetEnviron always returns a valid pointer to the table slot.
    unsafe { (*_NSGetEnviron()).cast_const().cast() }
}

/// Resolve the level from the live process environment, bypassing the cache.
///
/// Walks `environ` directly through the same fold as
/// [`resolve_from_entries`]; allocates nothing and calls nothing that could
/// re-enter `memcpy`. The environment must not be mutated concurrently.
#[must_use]
pub fn resolve_from_environ() -> BoundsCheckLevel {
    // SAFETY: `environ` is either null or a null-terminated array of
    // NUL-terminated strings, per POSIX.
    resolve_from_entries(unsafe { RawEntries::new(environ_table()) })
}

// Single-assignment cache. Racing first calls all store the same value,
// computed from the same environment, so a relaxed store (not a CAS) is
// enough and nothing else is ordered against it.
static CACHED_LEVEL: AtomicU8 = AtomicU8::new(BoundsCheckLevel::Unknown as u8);

/// Current bounds-check level. Parses `environ` on the first call and
/// serves the cached value afterwards. Never returns `Unknown`.
#[must_use]
#[inline]
pub fn bounds_check_level() -> BoundsCheckLevel {
    let cached = BoundsCheckLevel::from_u8(CACHED_LEVEL.load(Ordering::Relaxed));
    if cached != BoundsCheckLevel::Unknown {
        return cached;
    }
    resolve_and_cache()
}

#[cold]
#[inline(never)]
fn resolve_and_cache() -> BoundsCheckLevel {
    let level = resolve_from_environ();
    CACHED_LEVEL.store(level as u8, Ordering::Relaxed);
    level
}

/// Peek at the cache without resolving. `Unknown` until the first
/// [`bounds_check_level`] call completes.
#[must_use]
pub fn cached_level() -> BoundsCheckLevel {
    BoundsCheckLevel::from_u8(CACHED_LEVEL.load(Ordering::Relaxed))
}
