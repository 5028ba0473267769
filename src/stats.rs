//! Counters describing what the allocator did with the heap.
//!
//! The allocator is single threaded so these are plain integers, updated
//! inline by the engines and copied out by [`crate::Heap::stats`].

/// Snapshot of the allocator activity since the heap was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Successful calls that moved the break forward.
    pub grow_calls: usize,
    /// Successful calls that moved the break backward.
    pub trim_calls: usize,
    /// Bytes obtained from the heap-growth primitive.
    pub bytes_grown: usize,
    /// Bytes handed back to the heap-growth primitive.
    pub bytes_trimmed: usize,
    /// Allocations served from a free list.
    pub list_hits: usize,
    /// Allocations served by growing the heap.
    pub fresh_blocks: usize,
}

impl HeapStats {
    /// Bytes currently held between the initial and the current break.
    pub fn heap_size(&self) -> usize {
        self.bytes_grown - self.bytes_trimmed
    }

    pub(crate) fn record_grow(&mut self, bytes: usize) {
        self.grow_calls += 1;
        self.bytes_grown += bytes;
    }

    pub(crate) fn record_trim(&mut self, bytes: usize) {
        self.trim_calls += 1;
        self.bytes_trimmed += bytes;
    }
}
