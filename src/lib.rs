//! # brkalloc
//!
//! A segregated free-list allocator that grows a single contiguous heap with
//! the program-break primitive and never relies on another allocator.
//!
//! Every block carries a one-word header with its payload size right before
//! the pointer handed out. Blocks are grouped in size classes: small classes
//! double in size, large ones grow by a fixed step, and one last catch-all
//! takes anything bigger (see [`class`]). Free blocks wait on one LIFO list
//! per class until a request of their class comes along.
//!
//! ```text
//!            +------------------------------------------------------+
//!  heap  --> | hdr | blk | hdr | blk | hdr |      blk      | ...    | <-- break
//!            +------------------------------------------------------+
//!                    ^                   ^
//!                    |                   |
//!   free lists: [1] -+             [12] -+
//! ```
//!
//! The allocator is single threaded: [`Heap`] is an owned value and every
//! operation takes `&mut self`. [`LockedHeap`] puts one behind a lock so it
//! can serve as the `#[global_allocator]`.
//!
//! ```rust
//! use brkalloc::{FixedBreak, Heap};
//!
//! let mut memory = vec![0u64; 8192];
//! let bytes = unsafe {
//!     std::slice::from_raw_parts_mut(memory.as_mut_ptr().cast::<u8>(), memory.len() * 8)
//! };
//! let mut heap = Heap::new(FixedBreak::new(bytes));
//!
//! let ptr = heap.allocate(100);
//! assert!(!ptr.is_null());
//!
//! let ptr = unsafe { heap.resize(ptr, 300) };
//! unsafe { heap.deallocate(ptr) };
//! ```

use std::{num::NonZeroUsize, ptr::{self, NonNull}};

use log::warn;

mod arena;
mod block;
pub mod class;
mod error;
mod freelist;
mod global;
mod kernel;
mod list;
mod stats;
mod utils;

#[cfg(all(feature = "c-api", unix))]
mod capi;

use crate::{
    arena::Arena,
    block::Block,
    class::{FREE_TRIM_THRESHOLD, RESIZE_SLACK_LIMIT, RESIZE_TRIM_THRESHOLD},
    freelist::FreeList,
    utils::{WORD, checked_align},
};

pub use crate::{
    block::HEADER_SIZE,
    error::{AllocError, Result},
    global::{LockedHeap, MIN_ALIGN},
    kernel::{FixedBreak, HeapGrower, SystemBreak},
    stats::HeapStats,
};

/// The allocator: free lists plus the arena they are carved from.
///
/// Nothing here is shared, so a fresh `Heap` over a fresh [`HeapGrower`] is a
/// completely independent allocator. Pointers must always go back to the heap
/// that produced them.
pub struct Heap<G: HeapGrower> {
    arena: Arena<G>,
    free_list: FreeList,
}

// Free blocks are only reachable through the heap itself, so sending the heap
// sends everything its pointers refer to.
unsafe impl<G: HeapGrower + Send> Send for Heap<G> {}

impl<G: HeapGrower> Heap<G> {
    /// Creates an empty heap. The grower is not touched until the first
    /// allocation.
    pub const fn new(grower: G) -> Self {
        Self {
            arena: Arena::new(grower),
            free_list: FreeList::new(),
        }
    }

    /// Allocates `size` bytes and returns a word-aligned pointer to them, or
    /// null when `size` is zero or the heap can not grow.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        let Some(size) = NonZeroUsize::new(size) else {
            return ptr::null_mut();
        };

        match self.try_allocate(size) {
            Ok(ptr) => ptr.as_ptr(),
            Err(err) => {
                warn!("allocate({size}) failed: {err}");
                ptr::null_mut()
            }
        }
    }

    /// Same as [`Heap::allocate`] but reports why it failed.
    pub fn try_allocate(&mut self, size: NonZeroUsize) -> Result<NonNull<u8>> {
        self.allocate_block(size.get()).map(Block::payload)
    }

    /// Allocates room for `count` elements of `size` bytes each and zeroes it.
    /// Returns null on overflow of `count * size`, on zero, or when the heap
    /// can not grow, and touches no memory in that case.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(size) else {
            warn!("zero_allocate({count}, {size}) overflows");
            return ptr::null_mut();
        };

        let ptr = self.allocate(total);

        if !ptr.is_null() {
            unsafe { ptr.write_bytes(0, total) };
        }

        ptr
    }

    /// Gives a block back to the heap. Null is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer obtained from this heap. Freeing
    /// anything else, or freeing twice, is undefined behaviour and goes
    /// undetected.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };

        unsafe { self.release(Block::from_payload(payload)) }
    }

    /// Changes the size of the block at `ptr` to `size` bytes.
    ///
    /// The content is preserved up to the smaller of both sizes. A null `ptr`
    /// behaves like [`Heap::allocate`], a zero `size` like
    /// [`Heap::deallocate`] (and returns null). When a new block can not be
    /// obtained null is returned and the original block is left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer obtained from this heap.
    pub unsafe fn resize(&mut self, ptr: *mut u8, size: usize) -> *mut u8 {
        let Some(payload) = NonNull::new(ptr) else {
            return self.allocate(size);
        };

        if size == 0 {
            unsafe { self.deallocate(ptr) };
            return ptr::null_mut();
        }

        match unsafe { self.resize_block(Block::from_payload(payload), size) } {
            Ok(block) => block.payload().as_ptr(),
            Err(err) => {
                warn!("resize({:p}, {size}) failed: {err}", ptr);
                ptr::null_mut()
            }
        }
    }

    /// Size recorded in the header of the block at `ptr`.
    ///
    /// This is never smaller than what was requested for it, and can be
    /// bigger (rounding, near-fit reuse, in-place shrinks).
    ///
    /// # Safety
    ///
    /// `ptr` must be a live pointer obtained from this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { Block::from_payload(ptr).size() }
    }

    /// Number of blocks sitting on the free lists.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Number of blocks sitting on the free list of one size class.
    pub fn free_count_of(&self, bucket: usize) -> usize {
        self.free_list.bucket_len(bucket)
    }

    pub fn stats(&self) -> HeapStats {
        self.arena.stats
    }

    pub fn grower(&self) -> &G {
        self.arena.grower()
    }

    /// Allocation engine.
    ///
    /// Small requests only ever look at the list of their own class, then
    /// grow. Larger ones run the near-fit search over every list from their
    /// class up before growing.
    fn allocate_block(&mut self, size: usize) -> Result<Block> {
        self.arena.init()?;

        let size = checked_align(size, WORD).ok_or(AllocError::SizeOverflow)?;
        let bucket = class::classify(size);

        if class::is_small(bucket) {
            if !self.free_list.is_empty(bucket) {
                if let Some(block) = self.free_list.pop_front(bucket) {
                    self.arena.stats.list_hits += 1;
                    return Ok(block);
                }
            }

            let block = self.arena.grow_small(bucket, &mut self.free_list)?;
            self.arena.stats.fresh_blocks += 1;

            return Ok(block);
        }

        if let Some(block) = self.free_list.remove_best_fit(size, bucket) {
            self.arena.stats.list_hits += 1;
            return Ok(block);
        }

        let block = self.arena.grow_large(size)?;
        self.arena.stats.fresh_blocks += 1;

        Ok(block)
    }

    /// Deallocation engine.
    ///
    /// **SAFETY**: `block` must be live and owned by this heap.
    unsafe fn release(&mut self, block: Block) {
        unsafe {
            let size = block.size();

            if size >= FREE_TRIM_THRESHOLD && self.arena.is_at_break(block) {
                match self.arena.trim(block) {
                    Ok(()) => return,
                    // The block is still ours, keep it on a list instead.
                    Err(err) => warn!("trim of {:p} failed: {err}", block.payload()),
                }
            }

            self.free_list.push_front(block, class::classify(size), size);
        }
    }

    /// Reallocation engine.
    ///
    /// **SAFETY**: `block` must be live and owned by this heap.
    unsafe fn resize_block(&mut self, block: Block, size: usize) -> Result<Block> {
        let new_size = checked_align(size, WORD).ok_or(AllocError::SizeOverflow)?;
        let old_size = unsafe { block.size() };

        if old_size == new_size {
            return Ok(block);
        }

        let shrinking = new_size < old_size;

        if shrinking
            && old_size > RESIZE_TRIM_THRESHOLD
            && !class::is_small(class::classify(new_size))
            && self.arena.is_at_break(block)
        {
            match unsafe { self.arena.shrink_at_break(block, new_size) } {
                Ok(()) => return Ok(block),
                Err(err) => warn!("in-place shrink of {:p} failed: {err}", block.payload()),
            }
        }

        // The header keeps the old size: the tail stays with the block and
        // comes back with it when it is freed.
        if shrinking && new_size <= RESIZE_SLACK_LIMIT {
            return Ok(block);
        }

        let new_block = self.allocate_block(new_size)?;

        unsafe {
            let count = old_size.min(new_size);
            ptr::copy_nonoverlapping(block.payload().as_ptr(), new_block.payload().as_ptr(), count);
            self.release(block);
        }

        Ok(new_block)
    }
}
