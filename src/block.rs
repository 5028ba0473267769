use std::{mem, ptr::NonNull};

use crate::list::Node;

/// Header size of a block: a single machine word holding the payload size.
/// Every pointer returned by the allocator sits this many bytes past the
/// start of its block.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

/// Metadata stored right before every payload handed to the user.
#[repr(C)]
pub(crate) struct Header {
    /// Size of the payload in bytes (the header itself is not included).
    pub size: usize,
}

/// Handle to a block, addressed by its payload pointer.
///
/// Every block is a header word followed by its payload. The pointer we give
/// to the user (and get back from them) always points right past the header,
/// so all the offset arithmetic lives here instead of being repeated in every
/// engine.
///
/// ```text
/// start                 payload
///   |                      |
///   v                      v
///   +----------------------+------------------------------+
///   |    Header (size)     |            Payload           |
///   +----------------------+------------------------------+
///   <----- HEADER_SIZE ----><------------ size ------------>
///                                                          ^
///                                                          |
///                                                         end
/// ```
///
/// While a block sits on a free list its payload is unused, so we store the
/// list [`Node`] there. The minimal class is the exception: its payload is
/// exactly one word, and we want the header and the link to never be read as
/// two independent fields at the same time. For that class the link takes
/// over the header word instead, and the header is written back when the
/// block leaves the list:
///
/// ```text
///   Free block (any other class)         Free block (minimal class)
///   +--------+------------------+        +--------+--------+
///   |  size  | next | ...       |        |  next  | unused |
///   +--------+------------------+        +--------+--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block(NonNull<u8>);

impl Block {
    /// Writes a header of `size` at `start` and returns the block whose
    /// payload begins right after it.
    ///
    /// **SAFETY**: `start` must be valid for writes of `HEADER_SIZE` bytes
    /// and aligned to a word.
    #[inline]
    pub unsafe fn encode(start: NonNull<u8>, size: usize) -> Self {
        unsafe {
            start.cast::<Header>().as_ptr().write(Header { size });
            Self(start.add(HEADER_SIZE))
        }
    }

    /// Wraps a payload pointer previously produced by [`Block::encode`].
    ///
    /// **SAFETY**: Caller must guarantee that `payload` came from `encode`.
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        Self(payload)
    }

    #[inline]
    pub fn payload(self) -> NonNull<u8> {
        self.0
    }

    /// First byte of the block, where its header lives.
    #[inline]
    pub fn start(self) -> NonNull<u8> {
        unsafe { self.0.sub(HEADER_SIZE) }
    }

    /// Reads the size stored in the header.
    #[inline]
    pub unsafe fn size(self) -> usize {
        unsafe { self.start().cast::<Header>().as_ref().size }
    }

    /// Rewrites the header in place; the payload pointer does not move.
    #[inline]
    pub unsafe fn set_size(self, size: usize) {
        unsafe { self.start().cast::<Header>().as_mut().size = size }
    }

    /// One past the last payload byte, according to the current header.
    #[inline]
    pub unsafe fn end(self) -> *mut u8 {
        unsafe { self.0.as_ptr().add(self.size()) }
    }

    /// Where the free list node of this block is written.
    #[inline]
    pub fn link_slot(self, minimal: bool) -> NonNull<Node> {
        if minimal {
            self.start().cast()
        } else {
            self.0.cast()
        }
    }

    /// Inverse of [`Block::link_slot`].
    #[inline]
    pub fn from_link_slot(node: NonNull<Node>, minimal: bool) -> Self {
        let slot = node.cast::<u8>();

        if minimal {
            Self(unsafe { slot.add(HEADER_SIZE) })
        } else {
            Self(slot)
        }
    }
}

/// Bytes of heap a block with a payload of `size` bytes occupies.
#[inline]
pub(crate) const fn footprint(size: usize) -> usize {
    HEADER_SIZE + size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode() {
        let mut backing = [0usize; 4];
        let start = NonNull::new(backing.as_mut_ptr()).unwrap().cast::<u8>();

        unsafe {
            let block = Block::encode(start, 24);

            assert_eq!(block.payload().as_ptr(), start.as_ptr().add(HEADER_SIZE));
            assert_eq!(block.start(), start);
            assert_eq!(block.size(), 24);
            assert_eq!(block.end(), start.as_ptr().add(HEADER_SIZE + 24));
        }
    }

    #[test]
    fn set_size_keeps_payload() {
        let mut backing = [0usize; 4];
        let start = NonNull::new(backing.as_mut_ptr()).unwrap().cast::<u8>();

        unsafe {
            let block = Block::encode(start, 24);
            let payload = block.payload();

            block.set_size(8);

            assert_eq!(Block::from_payload(payload).size(), 8);
            assert_eq!(backing[0], 8);
        }
    }

    #[test]
    fn minimal_link_overlaps_header() {
        let mut backing = [0usize; 2];
        let start = NonNull::new(backing.as_mut_ptr()).unwrap().cast::<u8>();

        unsafe {
            let block = Block::encode(start, HEADER_SIZE);

            assert_eq!(block.link_slot(true).cast::<u8>(), start);
            assert_eq!(block.link_slot(false).cast::<u8>(), block.payload());
            assert_eq!(Block::from_link_slot(block.link_slot(true), true), block);
            assert_eq!(Block::from_link_slot(block.link_slot(false), false), block);
        }
    }
}
