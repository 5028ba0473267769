use std::{
    alloc::{GlobalAlloc, Layout},
    ptr,
};

use parking_lot::{Mutex, MutexGuard, const_mutex};

use crate::{
    Heap,
    kernel::HeapGrower,
    utils::{WORD, align},
};

/// Alignment every payload gets for free: each one starts one header word
/// past a word-aligned block.
pub const MIN_ALIGN: usize = WORD;

/// A [`Heap`] behind a single lock, so that it can be shared and installed
/// as the `#[global_allocator]`.
///
/// The heap itself assumes exclusive access to the break and to its free
/// lists for the whole duration of every call; the lock is what provides it.
///
/// ```rust,no_run
/// use brkalloc::{LockedHeap, SystemBreak};
///
/// #[global_allocator]
/// static ALLOCATOR: LockedHeap<SystemBreak> = LockedHeap::new(SystemBreak::new());
///
/// fn main() {}
/// ```
///
/// Layouts asking for more than [`MIN_ALIGN`] are served from a block
/// `align` bytes bigger than requested. The pointer handed out is rounded up
/// inside that block and the word right below it records where the block
/// really starts:
///
/// ```text
///   payload                          aligned
///      |                                |
///      v                                v
///      +-----------------------+--------+---------------------+-------+
///      |        padding        |  back  |    layout.size()    |       |
///      +-----------------------+--------+---------------------+-------+
///      <-------------- layout.size() + layout.align() ---------------->
/// ```
///
/// A logger that allocates must not be installed while this is the global
/// allocator: the allocator logs while holding its lock.
pub struct LockedHeap<G: HeapGrower>(Mutex<Heap<G>>);

impl<G: HeapGrower> LockedHeap<G> {
    pub const fn new(grower: G) -> Self {
        Self(const_mutex(Heap::new(grower)))
    }

    /// Exclusive access to the underlying heap.
    pub fn lock(&self) -> MutexGuard<'_, Heap<G>> {
        self.0.lock()
    }
}

#[inline]
fn needs_over_align(layout: Layout) -> bool {
    layout.align() > MIN_ALIGN
}

/// Carves a `layout.align()` aligned pointer out of a block returned by
/// `raw`, which is called with the padded size.
fn alloc_over_aligned(layout: Layout, raw: impl FnOnce(usize) -> *mut u8) -> *mut u8 {
    let Some(padded) = layout.size().checked_add(layout.align()) else {
        return ptr::null_mut();
    };

    let payload = raw(padded);
    if payload.is_null() {
        return payload;
    }

    // Both `payload` and `align` are multiples of a word, so the rounding
    // costs at most `align - WORD` bytes and the back pointer always fits.
    let offset = align(payload as usize + WORD, layout.align()) - payload as usize;

    unsafe {
        let aligned = payload.add(offset);
        aligned.cast::<*mut u8>().sub(1).write(payload);
        aligned
    }
}

/// Payload pointer of the block an over-aligned `ptr` was carved from.
///
/// **SAFETY**: `ptr` must come from [`alloc_over_aligned`].
#[inline]
unsafe fn block_of(ptr: *mut u8) -> *mut u8 {
    unsafe { ptr.cast::<*mut u8>().sub(1).read() }
}

unsafe impl<G: HeapGrower + Send> GlobalAlloc for LockedHeap<G> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut heap = self.lock();

        if needs_over_align(layout) {
            return alloc_over_aligned(layout, |size| heap.allocate(size));
        }

        heap.allocate(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let ptr = if needs_over_align(layout) {
            unsafe { block_of(ptr) }
        } else {
            ptr
        };

        unsafe { self.lock().deallocate(ptr) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let mut heap = self.lock();

        if needs_over_align(layout) {
            return alloc_over_aligned(layout, |size| heap.zero_allocate(1, size));
        }

        heap.zero_allocate(1, layout.size())
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let mut heap = self.lock();

        if !needs_over_align(layout) {
            return unsafe { heap.resize(ptr, new_size) };
        }

        // The aligned offset inside a moved block would differ, so over-aligned
        // blocks are always moved by hand.
        let Ok(new_layout) = Layout::from_size_align(new_size, layout.align()) else {
            return ptr::null_mut();
        };

        let new_ptr = alloc_over_aligned(new_layout, |size| heap.allocate(size));
        if !new_ptr.is_null() {
            unsafe {
                ptr::copy_nonoverlapping(ptr, new_ptr, layout.size().min(new_size));
                heap.deallocate(block_of(ptr));
            }
        }

        new_ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::FixedBreak;

    #[test]
    fn global_alloc_roundtrip() {
        let mut memory = vec![0usize; 1 << 14];
        let len = memory.len() * WORD;
        let bytes = unsafe { std::slice::from_raw_parts_mut(memory.as_mut_ptr().cast::<u8>(), len) };
        let allocator = LockedHeap::new(FixedBreak::new(bytes));

        unsafe {
            let layout = Layout::new::<[u64; 4]>();
            let ptr = allocator.alloc_zeroed(layout).cast::<[u64; 4]>();
            assert_eq!(*ptr, [0; 4]);

            (*ptr)[3] = 7;
            let ptr = allocator.realloc(ptr.cast(), layout, 256).cast::<u64>();
            assert_eq!(*ptr.add(3), 7);

            allocator.dealloc(ptr.cast(), Layout::from_size_align(256, 8).unwrap());
        }

        assert!(allocator.lock().free_count() > 0);
    }

    #[test]
    fn over_aligned_layouts_are_served() {
        let mut memory = vec![0usize; 1 << 14];
        let len = memory.len() * WORD;
        let bytes = unsafe { std::slice::from_raw_parts_mut(memory.as_mut_ptr().cast::<u8>(), len) };
        let allocator = LockedHeap::new(FixedBreak::new(bytes));

        // What a thread spawn asks for.
        let layout = Layout::from_size_align(1024, 64).unwrap();

        unsafe {
            let plain = allocator.alloc(Layout::new::<u64>());
            let first = allocator.alloc(layout);
            let second = allocator.alloc_zeroed(layout);

            assert!(!first.is_null() && !second.is_null());
            assert_eq!(first as usize % 64, 0);
            assert_eq!(second as usize % 64, 0);
            assert!((0..1024).all(|i| *second.add(i) == 0));

            first.write_bytes(0xab, 1024);
            second.write_bytes(0xcd, 1024);
            assert!((0..1024).all(|i| *first.add(i) == 0xab));

            let grown = allocator.realloc(first, layout, 4096);
            assert_eq!(grown as usize % 64, 0);
            assert!((0..1024).all(|i| *grown.add(i) == 0xab));
            assert!((0..1024).all(|i| *second.add(i) == 0xcd));

            let listed = allocator.lock().free_count();
            allocator.dealloc(grown, Layout::from_size_align(4096, 64).unwrap());
            allocator.dealloc(second, layout);
            allocator.dealloc(plain, Layout::new::<u64>());

            assert_eq!(allocator.lock().free_count(), listed + 3);
        }
    }

    #[test]
    fn page_aligned_layout_fits_its_block() {
        let mut memory = vec![0usize; 1 << 12];
        let len = memory.len() * WORD;
        let bytes = unsafe { std::slice::from_raw_parts_mut(memory.as_mut_ptr().cast::<u8>(), len) };
        let allocator = LockedHeap::new(FixedBreak::new(bytes));

        let layout = Layout::from_size_align(100, 4096).unwrap();

        unsafe {
            let ptr = allocator.alloc(layout);
            assert_eq!(ptr as usize % 4096, 0);

            let block = block_of(ptr);
            let usable = allocator.lock().usable_size(std::ptr::NonNull::new(block).unwrap());
            assert!(ptr as usize + 100 <= block as usize + usable);

            allocator.dealloc(ptr, layout);
        }
    }
}
