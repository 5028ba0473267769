//! C entry points, exported when the `c-api` feature is enabled.
//!
//! Building the `cdylib` with this feature gives a library that can replace
//! the C allocator of a process (`LD_PRELOAD=libbrkalloc.so ...`). All four
//! functions share one process-wide heap grown with [`SystemBreak`].

use std::ffi::c_void;

use crate::{LockedHeap, SystemBreak};

static HEAP: LockedHeap<SystemBreak> = LockedHeap::new(SystemBreak::new());

#[unsafe(no_mangle)]
pub extern "C" fn malloc(size: usize) -> *mut c_void {
    HEAP.lock().allocate(size).cast()
}

#[unsafe(no_mangle)]
pub extern "C" fn calloc(count: usize, size: usize) -> *mut c_void {
    HEAP.lock().zero_allocate(count, size).cast()
}

/// # Safety
///
/// `ptr` must be null or a live pointer returned by this library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    unsafe { HEAP.lock().deallocate(ptr.cast()) }
}

/// # Safety
///
/// `ptr` must be null or a live pointer returned by this library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    unsafe { HEAP.lock().resize(ptr.cast(), size).cast() }
}
