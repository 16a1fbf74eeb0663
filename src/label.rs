//! Reserved label id space.
//!
//! The top of the `u64` range is reserved for sentinel values; everything
//! below [`MAX_ID`] is a regular, paintable label. Comparisons and fill
//! operations must test [`is_regular`] before acting on an id.

/// The background label.
pub const BACKGROUND: u64 = 0;

/// No valid label.
pub const INVALID: u64 = u64::MAX;

/// A read outside the volume bounds.
pub const OUTSIDE: u64 = u64::MAX - 1;

/// No paintable id at this location.
pub const TRANSPARENT: u64 = u64::MAX - 2;

/// Largest regular label id.
pub const MAX_ID: u64 = u64::MAX - 3;

/// True if `id` is a regular label, i.e. not a reserved sentinel.
#[inline]
pub fn is_regular(id: u64) -> bool {
    id <= MAX_ID
}
