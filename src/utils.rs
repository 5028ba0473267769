//! Rounding helpers shared by the engines and the global allocator.

use std::mem;

/// Width of the word every block footprint is rounded to.
pub(crate) const WORD: usize = mem::size_of::<usize>();

/// Rounds `value` up to the next multiple of `alignment`, a power of two.
///
/// Request sizes go through this with [`WORD`] so that every footprint keeps
/// the next header aligned. Over-aligned layouts use it on addresses.
pub fn align(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Same as [`align`] but reports `None` instead of wrapping around when
/// `value` sits too close to `usize::MAX`.
pub fn checked_align(value: usize, alignment: usize) -> Option<usize> {
    Some(value.checked_add(alignment - 1)? & !(alignment - 1))
}
