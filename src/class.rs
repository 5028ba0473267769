//! Size-class table.
//!
//! Buckets `0..THRESHOLD` are "small" and double in size, starting at
//! [`BASE_UNIT`]. Buckets `THRESHOLD..LIST_MAX` are "large" and grow
//! linearly by [`LARGE_STEP`] on top of the first size past the small range.
//! [`LIST_MAX`] itself is the catch-all for anything bigger.
//!
//! ```text
//!  index:   0    1    2   ...   11   |   12      13    ...    23   |  24
//!  size:    8   16   32   ... 16384  | 45056   46080   ...  56320  |  any
//!           <------- doubling ------> <------- + 1024 -------->
//! ```
//!
//! Everything here has to agree with the batch growth of the arena and with
//! the search order of the allocation engine.

use crate::utils::WORD;

/// Payload size of the smallest class. Exactly one link pointer.
pub const BASE_UNIT: usize = WORD;

/// Index of the oversized catch-all bucket.
pub const LIST_MAX: usize = 24;

/// Number of free lists, catch-all included.
pub const LIST_COUNT: usize = LIST_MAX + 1;

/// First large bucket.
pub const THRESHOLD: usize = LIST_MAX / 2;

/// Linear step between two consecutive large classes.
pub const LARGE_STEP: usize = 2 * (1 << 9);

/// Relative tolerance of the near-fit search on large buckets.
pub const FIT_TOLERANCE: f64 = 1.21;

/// Additive slack of the near-fit search, divided by the requested size.
pub const FIT_SLACK: f64 = 100.0;

/// Blocks at least this big are handed back to the OS when freed at the break.
pub const FREE_TRIM_THRESHOLD: usize = BASE_UNIT << 19;

/// Blocks bigger than this may shrink in place when they sit at the break.
pub const RESIZE_TRIM_THRESHOLD: usize = 4938 * 29;

/// Shrinking to anything up to this size keeps the block where it is.
pub const RESIZE_SLACK_LIMIT: usize = BASE_UNIT << LIST_MAX;

/// Size of the first byte range past every small class.
const LARGE_BASE: usize = BASE_UNIT << THRESHOLD;

/// Whether `index` is one of the doubling classes.
#[inline]
pub const fn is_small(index: usize) -> bool {
    index < THRESHOLD
}

/// Nominal payload size of bucket `index`.
///
/// The catch-all has no upper bound so it reports `usize::MAX`.
#[inline]
pub const fn nominal_size(index: usize) -> usize {
    if is_small(index) {
        BASE_UNIT << index
    } else if index < LIST_MAX {
        LARGE_BASE + index * LARGE_STEP
    } else {
        usize::MAX
    }
}

/// Smallest bucket whose nominal size can hold `size` bytes.
///
/// Small classes are scanned first, then large ones, both ascending, and
/// anything that fits nowhere lands in [`LIST_MAX`].
pub fn classify(size: usize) -> usize {
    (0..LIST_MAX)
        .find(|&index| nominal_size(index) >= size)
        .unwrap_or(LIST_MAX)
}

/// Upper bound (exclusive) a free block of `actual` bytes must respect to be
/// handed out for a request of `requested` bytes, even when it is bigger.
///
/// The bound is `requested * (FIT_TOLERANCE + FIT_SLACK / requested)`,
/// truncated to an integer. It keeps a huge free block from being wasted on a
/// small request without paying for an exhaustive best-fit scan.
///
/// The product is computed in `f64` rather than `f32`. Every size below
/// `2^53` is exact in `f64`, whereas `f32` rounds anything past `2^24` to a
/// multiple of its spacing, so the bound can land one off from the `f32`
/// result on some sizes.
#[inline]
pub fn within_tolerance(requested: usize, actual: usize) -> bool {
    let factor = FIT_TOLERANCE + FIT_SLACK / requested as f64;
    let bound = (requested as f64 * factor) as usize;

    actual < bound
}
