use std::ptr::NonNull;

use log::{debug, trace, warn};

use crate::{
    block::{Block, footprint},
    class::{self, LIST_COUNT},
    error::{AllocError, Result},
    freelist::FreeList,
    kernel::HeapGrower,
    stats::HeapStats,
    utils::{WORD, align},
};

/// Once a run counter goes past this value it falls back to [`RUN_BASELINE`].
const RUN_CEILING: u8 = 8;

/// Value a saturated run counter restarts from.
const RUN_BASELINE: u8 = 4;

/// Owner of the heap break. Every byte the allocator ever uses comes from
/// here, and large blocks sitting at the top of the heap go back through here.
///
/// Small classes grow in batches. Each batch holds `2^run` blocks of the
/// requested class followed by one "remainder" block of the class right below
/// it, and `run` grows with every batch so that busy classes ask the OS less
/// often:
///
/// ```text
///   old break                                                new break
///      |                                                         |
///      v                                                         v
///      +---------+---------+-----+---------+-----------+---------+
///      | class i | class i | ... | class i | class i-1 | class i |
///      +---------+---------+-----+---------+-----------+---------+
///      <------- 2^run - 1 blocks, freed --->  remainder  returned
/// ```
///
/// Large and oversized requests get exactly one block of the requested size.
pub(crate) struct Arena<G> {
    grower: G,
    /// Batch exponent of every small class.
    runs: [u8; LIST_COUNT],
    initialized: bool,
    pub stats: HeapStats,
}

impl<G: HeapGrower> Arena<G> {
    pub const fn new(grower: G) -> Self {
        Self {
            grower,
            runs: [0; LIST_COUNT],
            initialized: false,
            stats: HeapStats {
                grow_calls: 0,
                trim_calls: 0,
                bytes_grown: 0,
                bytes_trimmed: 0,
                list_hits: 0,
                fresh_blocks: 0,
            },
        }
    }

    pub fn grower(&self) -> &G {
        &self.grower
    }

    /// Current batch exponent of `bucket`.
    #[cfg(test)]
    pub fn run(&self, bucket: usize) -> u8 {
        self.runs[bucket]
    }

    /// First use of the heap: make sure the break is word aligned so that
    /// every header and payload we carve out of it is too.
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let brk = self.brk().ok_or(AllocError::OutOfMemory { requested: 0 })?;
        let addr = brk.as_ptr() as usize;
        let padding = align(addr, WORD) - addr;

        if padding != 0 {
            self.grow(padding)?;
        }

        debug!("heap initialised, break at {:p} (+{padding} bytes of padding)", brk);
        self.initialized = true;

        Ok(())
    }

    /// Current break.
    pub fn brk(&mut self) -> Option<NonNull<u8>> {
        unsafe { self.grower.sbrk(0) }
    }

    /// Whether `block` is the topmost thing on the heap.
    pub fn is_at_break(&mut self, block: Block) -> bool {
        let end = unsafe { block.end() };

        self.brk().is_some_and(|brk| brk.as_ptr() == end)
    }

    /// Moves the break forward by `bytes` and returns the start of the new
    /// region.
    fn grow(&mut self, bytes: usize) -> Result<NonNull<u8>> {
        let delta = isize::try_from(bytes).map_err(|_| AllocError::SizeOverflow)?;

        match unsafe { self.grower.sbrk(delta) } {
            Some(start) => {
                trace!("grew heap by {bytes} bytes at {:p}", start);
                self.stats.record_grow(bytes);
                Ok(start)
            }
            None => {
                warn!("heap growth of {bytes} bytes refused");
                Err(AllocError::OutOfMemory { requested: bytes })
            }
        }
    }

    /// Moves the break backward by `bytes`.
    ///
    /// **SAFETY**: the last `bytes` bytes below the break must be unused.
    unsafe fn shrink(&mut self, bytes: usize) -> Result<()> {
        let delta = isize::try_from(bytes).map_err(|_| AllocError::SizeOverflow)?;

        match unsafe { self.grower.sbrk(-delta) } {
            Some(_) => {
                trace!("trimmed heap by {bytes} bytes");
                self.stats.record_trim(bytes);
                Ok(())
            }
            None => {
                warn!("heap trim of {bytes} bytes refused");
                Err(AllocError::OutOfMemory { requested: bytes })
            }
        }
    }

    /// Grows the heap by one batch of `bucket` blocks (see [`Arena`]) and
    /// returns the topmost one. The rest are pushed to `free_list`.
    pub fn grow_small(&mut self, bucket: usize, free_list: &mut FreeList) -> Result<Block> {
        debug_assert!(class::is_small(bucket));

        let size = class::nominal_size(bucket);
        let run = self.runs[bucket];
        let count = 1usize << run;
        let remainder = (bucket > 0).then(|| class::nominal_size(bucket - 1));

        let bytes = footprint(size) * count + remainder.map_or(0, footprint);
        let mut cursor = self.grow(bytes)?;

        unsafe {
            for _ in 0..count - 1 {
                let block = Block::encode(cursor, size);
                free_list.push_front(block, bucket, size);
                cursor = cursor.add(footprint(size));
            }

            if let Some(remainder) = remainder {
                let block = Block::encode(cursor, remainder);
                free_list.push_front(block, bucket - 1, remainder);
                cursor = cursor.add(footprint(remainder));
            }

            self.runs[bucket] = if run + 1 > RUN_CEILING { RUN_BASELINE } else { run + 1 };

            Ok(Block::encode(cursor, size))
        }
    }

    /// Grows the heap by exactly one block of `size` bytes.
    pub fn grow_large(&mut self, size: usize) -> Result<Block> {
        let bytes = size.checked_add(footprint(0)).ok_or(AllocError::SizeOverflow)?;
        let start = self.grow(bytes)?;

        Ok(unsafe { Block::encode(start, size) })
    }

    /// Shrinks the topmost `block` to `new_size` bytes without moving it.
    ///
    /// **SAFETY**: `block` must be at the break and bigger than `new_size`.
    pub unsafe fn shrink_at_break(&mut self, block: Block, new_size: usize) -> Result<()> {
        unsafe {
            let old_size = block.size();
            debug_assert!(new_size < old_size);

            self.shrink(old_size - new_size)?;
            block.set_size(new_size);
        }

        Ok(())
    }

    /// Hands the whole topmost `block` back to the OS.
    ///
    /// **SAFETY**: `block` must be at the break and no longer in use.
    pub unsafe fn trim(&mut self, block: Block) -> Result<()> {
        unsafe {
            let bytes = footprint(block.size());
            self.shrink(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::HEADER_SIZE, kernel::FixedBreak};

    fn buffer(words: usize) -> Vec<usize> {
        vec![0; words]
    }

    fn fixed(words: &mut [usize]) -> FixedBreak<'_> {
        let len = words.len() * WORD;
        let bytes = unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), len) };

        FixedBreak::new(bytes)
    }

    #[test]
    fn first_batch_is_one_block_plus_remainder() {
        let mut words = buffer(1024);
        let mut arena = Arena::new(fixed(&mut words));
        let mut free_list = FreeList::new();
        arena.init().unwrap();

        let block = arena.grow_small(3, &mut free_list).unwrap();

        unsafe { assert_eq!(block.size(), class::nominal_size(3)) };
        // Only the remainder block of class 2 is left over.
        assert_eq!(free_list.len(), 1);
        assert_eq!(free_list.bucket_len(2), 1);
        assert_eq!(arena.run(3), 1);
        assert_eq!(arena.grower().used(), footprint(64) + footprint(32));
        assert!(arena.is_at_break(block));
    }

    #[test]
    fn batches_double_until_the_ceiling() {
        let mut words = buffer(64 * 1024);
        let mut arena = Arena::new(fixed(&mut words));
        let mut free_list = FreeList::new();
        arena.init().unwrap();

        for run in 0..=RUN_CEILING {
            let before = free_list.bucket_len(1);
            arena.grow_small(1, &mut free_list).unwrap();

            assert_eq!(free_list.bucket_len(1) - before, (1 << run) - 1);
        }

        assert_eq!(arena.run(1), RUN_BASELINE);
        // Every batch of class 1 also left one minimal block behind.
        assert_eq!(free_list.bucket_len(0), RUN_CEILING as usize + 1);
    }

    #[test]
    fn minimal_class_has_no_remainder() {
        let mut words = buffer(64);
        let mut arena = Arena::new(fixed(&mut words));
        let mut free_list = FreeList::new();
        arena.init().unwrap();

        arena.grow_small(0, &mut free_list).unwrap();

        assert_eq!(free_list.len(), 0);
        assert_eq!(arena.grower().used(), footprint(class::nominal_size(0)));
    }

    #[test]
    fn large_growth_is_exact_and_trimmable() {
        let mut words = buffer(16 * 1024);
        let mut arena = Arena::new(fixed(&mut words));
        arena.init().unwrap();

        let block = arena.grow_large(50_000).unwrap();

        assert_eq!(arena.grower().used(), HEADER_SIZE + 50_000);
        assert!(arena.is_at_break(block));

        unsafe {
            arena.shrink_at_break(block, 40_000).unwrap();
            assert_eq!(block.size(), 40_000);
            assert!(arena.is_at_break(block));

            arena.trim(block).unwrap();
        }

        assert_eq!(arena.grower().used(), 0);
        assert_eq!(arena.stats.heap_size(), 0);
        assert_eq!(arena.stats.trim_calls, 2);
    }

    #[test]
    fn refused_growth_is_out_of_memory() {
        let mut words = buffer(8);
        let mut arena = Arena::new(fixed(&mut words));
        arena.init().unwrap();

        assert_eq!(arena.grow_large(1024), Err(AllocError::OutOfMemory { requested: 1024 + HEADER_SIZE }));
        assert_eq!(arena.stats.grow_calls, 0);
    }

    #[test]
    fn init_aligns_the_break() {
        let mut words = buffer(8);
        let len = words.len() * WORD;
        let bytes = unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), len) };
        let mut arena = Arena::new(FixedBreak::new(&mut bytes[3..]));

        arena.init().unwrap();

        assert_eq!(arena.brk().unwrap().as_ptr().align_offset(WORD), 0);
        assert_eq!(arena.grower().used(), WORD - 3);
    }
}
