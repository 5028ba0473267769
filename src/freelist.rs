use crate::{
    block::Block,
    class::{self, LIST_COUNT, LIST_MAX, THRESHOLD},
    list::{Link, List, Node},
};

/// Segregated free lists, one LIFO [`List`] per size class.
///
/// This registry only stores links to blocks that already exist on the heap.
/// The reason behind this is that we don't actually need to store any
/// additional content for blocks which are free: the payload of a free block
/// is unused, so that's where its [`Node`] goes (see [`Block`] for the
/// minimal class exception).
///
/// ```text
///   lists[0]   --> [ 8 ] --> [ 8 ] --> [ 8 ]
///   lists[1]   --> [16 ]
///   lists[2]   --> (empty)
///     ...
///   lists[12]  --> [40000] --> [45056] --> [33000]
///     ...
///   lists[24]  --> [2 MiB]
/// ```
///
/// Small lists only ever hold blocks of exactly their nominal size. Large
/// lists hold any size between the previous nominal size and their own, and
/// the catch-all holds whatever is bigger.
pub(crate) struct FreeList {
    lists: [List; LIST_COUNT],
    /// Nodes across every list.
    count: usize,
}

impl FreeList {
    /// Creates a registry where every list is empty.
    pub const fn new() -> Self {
        Self {
            lists: [const { List::new() }; LIST_COUNT],
            count: 0,
        }
    }

    /// Total number of free blocks.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// It tells whether the list of `bucket` is empty or not.
    #[inline]
    pub fn is_empty(&self, bucket: usize) -> bool {
        self.lists[bucket].is_empty()
    }

    /// Number of free blocks in a single bucket.
    #[inline]
    pub fn bucket_len(&self, bucket: usize) -> usize {
        self.lists[bucket].len()
    }

    /// Removes the most recently freed block of `bucket`.
    ///
    /// Callers check [`FreeList::is_empty`] first, popping an empty list is a
    /// bug in the engines.
    pub fn pop_front(&mut self, bucket: usize) -> Option<Block> {
        let minimal = bucket == 0;
        let node = self.lists[bucket].pop();
        debug_assert!(node.is_some(), "pop on empty bucket {bucket}");

        let block = Block::from_link_slot(node?, minimal);
        self.count -= 1;

        if minimal {
            // The link overwrote the header while the block was free.
            unsafe { block.set_size(class::nominal_size(0)) };
        }

        Some(block)
    }

    /// Links `block` as the new head of `bucket`, recording `size` in its
    /// header first.
    ///
    /// **SAFETY**: `block` must be owned by the allocator and not on any list.
    pub unsafe fn push_front(&mut self, block: Block, bucket: usize, size: usize) {
        let minimal = size == class::nominal_size(0);
        debug_assert!(!minimal || bucket == 0);

        unsafe {
            if !minimal && block.size() != size {
                block.set_size(size);
            }

            self.lists[bucket].push(block.link_slot(minimal));
        }

        self.count += 1;
    }

    /// Near-fit search over the large buckets, starting at `from`.
    ///
    /// Within a bucket the first block that either matches `size` exactly or
    /// stays inside the tolerance band of [`class::within_tolerance`] wins.
    /// This is first-fit-within-tolerance, not best fit: the order blocks were
    /// freed in decides between two acceptable candidates.
    pub fn remove_best_fit(&mut self, size: usize, from: usize) -> Option<Block> {
        if self.count == 0 {
            return None;
        }

        for bucket in from.max(THRESHOLD)..=LIST_MAX {
            let list = &mut self.lists[bucket];
            let mut prev: Link<Node> = None;
            let mut found = None;

            for node in list.iter() {
                let candidate = Block::from_link_slot(node, false);
                let actual = unsafe { candidate.size() };

                if actual == size || (actual > size && class::within_tolerance(size, actual)) {
                    found = Some((prev, node, candidate));
                    break;
                }

                prev = Some(node);
            }

            if let Some((prev, node, block)) = found {
                unsafe { list.remove_after(prev, node) };
                self.count -= 1;

                return Some(block);
            }
        }

        // There is no free block we can use
        None
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use super::*;
    use crate::block::{HEADER_SIZE, footprint};

    /// Word-aligned scratch memory carved into blocks by hand.
    struct Scratch {
        words: Vec<usize>,
        used: usize,
    }

    impl Scratch {
        fn new(bytes: usize) -> Self {
            Self { words: vec![0; bytes / HEADER_SIZE], used: 0 }
        }

        fn block(&mut self, size: usize) -> Block {
            let start = unsafe {
                NonNull::new(self.words.as_mut_ptr()).unwrap().cast::<u8>().add(self.used)
            };
            self.used += footprint(size);
            assert!(self.used <= self.words.len() * HEADER_SIZE);

            unsafe { Block::encode(start, size) }
        }
    }

    #[test]
    fn push_pop_roundtrip_counts() {
        let mut scratch = Scratch::new(4096);
        let mut free_list = FreeList::new();
        let a = scratch.block(64);
        let b = scratch.block(64);

        unsafe {
            free_list.push_front(a, 3, 64);
            free_list.push_front(b, 3, 64);
        }

        assert_eq!(free_list.len(), 2);
        assert_eq!(free_list.bucket_len(3), 2);
        assert_eq!(free_list.pop_front(3), Some(b));
        assert_eq!(free_list.pop_front(3), Some(a));
        assert!(free_list.is_empty(3));
        assert_eq!(free_list.len(), 0);
    }

    #[test]
    fn minimal_class_restores_header() {
        let mut scratch = Scratch::new(256);
        let mut free_list = FreeList::new();
        let a = scratch.block(class::nominal_size(0));
        let b = scratch.block(class::nominal_size(0));

        unsafe {
            free_list.push_front(a, 0, class::nominal_size(0));
            free_list.push_front(b, 0, class::nominal_size(0));

            // The link lives where the header was, so the header of `a` is now
            // the null terminator of the list.
            assert_eq!(a.size(), 0);

            let popped = free_list.pop_front(0).unwrap();
            assert_eq!(popped, b);
            assert_eq!(popped.size(), class::nominal_size(0));

            let popped = free_list.pop_front(0).unwrap();
            assert_eq!(popped, a);
            assert_eq!(popped.size(), class::nominal_size(0));
        }
    }

    #[test]
    fn push_rewrites_stale_header() {
        let mut scratch = Scratch::new(1024);
        let mut free_list = FreeList::new();
        let a = scratch.block(128);

        unsafe {
            free_list.push_front(a, 3, 64);
            assert_eq!(a.size(), 64);
        }
    }

    #[test]
    fn best_fit_accepts_exact_and_near_sizes() {
        let mut scratch = Scratch::new(1 << 20);
        let mut free_list = FreeList::new();
        let huge = scratch.block(200_000);
        let near = scratch.block(47_000);

        unsafe {
            free_list.push_front(near, class::classify(47_000), 47_000);
            free_list.push_front(huge, LIST_MAX, 200_000);
        }

        // 46000 * 1.21 + 100 leaves plenty of room for 47000
        let request = 46_000;
        assert_eq!(free_list.remove_best_fit(request, class::classify(request)), Some(near));

        // 200000 is way out of the band for a 50000 request
        assert_eq!(free_list.remove_best_fit(50_000, class::classify(50_000)), None);
        assert_eq!(free_list.remove_best_fit(200_000, class::classify(200_000)), Some(huge));
        assert_eq!(free_list.len(), 0);
    }

    #[test]
    fn best_fit_takes_first_acceptable_not_smallest() {
        let mut scratch = Scratch::new(1 << 20);
        let mut free_list = FreeList::new();
        let bucket = class::classify(46_000);
        let tight = scratch.block(46_000);
        let loose = scratch.block(46_080);

        unsafe {
            free_list.push_front(tight, bucket, 46_000);
            free_list.push_front(loose, bucket, 46_080);
        }

        assert_eq!(free_list.remove_best_fit(45_900, bucket), Some(loose));
        assert_eq!(free_list.remove_best_fit(45_900, bucket), Some(tight));
    }

    #[test]
    fn best_fit_unlinks_from_the_middle() {
        let mut scratch = Scratch::new(1 << 20);
        let mut free_list = FreeList::new();
        let bucket = LIST_MAX;
        let a = scratch.block(100_000);
        let b = scratch.block(300_000);
        let c = scratch.block(100_000);

        unsafe {
            free_list.push_front(a, bucket, 100_000);
            free_list.push_front(b, bucket, 300_000);
            free_list.push_front(c, bucket, 100_000);
        }

        // c -> b -> a, only b matches
        assert_eq!(free_list.remove_best_fit(300_000, bucket), Some(b));
        assert_eq!(free_list.pop_front(bucket), Some(c));
        assert_eq!(free_list.pop_front(bucket), Some(a));
    }
}
