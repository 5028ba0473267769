use std::{marker::PhantomData, ptr::NonNull};

/// This trait provides an abstraction over the only system service the
/// allocator needs: moving the end of one contiguous heap. Our top level view
/// of this has nothing to do with the concrete implementations / APIs offered
/// by each kernel.
///
/// # Safety
///
/// Implementors promise that a successful growth by `delta` bytes makes
/// `[previous_break, previous_break + delta)` valid for reads and writes, and
/// that memory below the break is never moved or reused behind the
/// allocator's back.
pub unsafe trait HeapGrower {
    /// Moves the break by `delta` bytes and returns the break it had before
    /// the call. A positive `delta` grows the heap, a negative one shrinks it
    /// and zero only queries the current break.
    ///
    /// Failure is reported as `None` and never applies partially.
    ///
    /// **SAFETY**: a shrink must not release memory that is still in use.
    unsafe fn sbrk(&mut self, delta: isize) -> Option<NonNull<u8>>;
}

/// The process heap, moved with the classic program-break primitive.
///
/// This implementation is platform-dependant. On unix it is a thin wrapper
/// around [`libc::sbrk`]. Windows has no program break, so one is emulated
/// over a reserved range of address space whose pages are committed as the
/// break grows.
pub struct SystemBreak {
    #[cfg(windows)]
    emulated: windows::EmulatedBreak,
}

impl SystemBreak {
    pub const fn new() -> Self {
        Self {
            #[cfg(windows)]
            emulated: windows::EmulatedBreak::new(),
        }
    }
}

impl Default for SystemBreak {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
mod unix {
    use super::{HeapGrower, SystemBreak};

    use libc::{c_void, intptr_t, sbrk};

    use std::ptr::NonNull;

    unsafe impl HeapGrower for SystemBreak {
        unsafe fn sbrk(&mut self, delta: isize) -> Option<NonNull<u8>> {
            unsafe {
                let addr = sbrk(delta as intptr_t);

                if addr == usize::MAX as *mut c_void {
                    return None;
                }

                NonNull::new(addr.cast::<u8>())
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{HeapGrower, SystemBreak};
    use crate::utils::align;

    use windows::Win32::System::{Memory, SystemInformation};

    /// Address space reserved up front for the emulated break.
    const RESERVE: usize = if cfg!(target_pointer_width = "64") { 1 << 36 } else { 1 << 29 };

    /// Addresses are kept as integers so the break can live in a `static`.
    pub(super) struct EmulatedBreak {
        base: usize,
        brk: usize,
        committed: usize,
        page_size: usize,
    }

    impl EmulatedBreak {
        pub(super) const fn new() -> Self {
            Self { base: 0, brk: 0, committed: 0, page_size: 0 }
        }

        unsafe fn reserve(&mut self) -> bool {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());
                self.page_size = system_info.assume_init().dwPageSize as usize;

                let addr = Memory::VirtualAlloc(None, RESERVE, Memory::MEM_RESERVE, Memory::PAGE_READWRITE);
                self.base = addr as usize;
            }

            self.base != 0
        }
    }

    unsafe impl HeapGrower for SystemBreak {
        unsafe fn sbrk(&mut self, delta: isize) -> Option<NonNull<u8>> {
            let state = &mut self.emulated;

            if state.base == 0 && !unsafe { state.reserve() } {
                return None;
            }

            let new_brk = state.brk.checked_add_signed(delta).filter(|&brk| brk <= RESERVE)?;
            let wanted = align(new_brk, state.page_size);

            unsafe {
                if wanted > state.committed {
                    let addr = (state.base + state.committed) as *const c_void;
                    let len = wanted - state.committed;
                    let committed = Memory::VirtualAlloc(Some(addr), len, Memory::MEM_COMMIT, Memory::PAGE_READWRITE);

                    if committed.is_null() {
                        return None;
                    }
                } else if wanted < state.committed {
                    let addr = (state.base + wanted) as *mut c_void;
                    let _ = Memory::VirtualFree(addr, state.committed - wanted, Memory::MEM_DECOMMIT);
                }
            }

            let previous = state.base + state.brk;
            state.committed = wanted;
            state.brk = new_brk;

            NonNull::new(previous as *mut u8)
        }
    }

    impl Drop for EmulatedBreak {
        fn drop(&mut self) {
            if self.base != 0 {
                unsafe {
                    let _ = Memory::VirtualFree(self.base as *mut c_void, 0, Memory::MEM_RELEASE);
                }
            }
        }
    }
}

/// A break over a caller-provided buffer.
///
/// Useful when the process heap is off limits: tests, benchmarks, or hosts
/// without an operating system. Growth past the end of the buffer fails like
/// an exhausted system heap would.
pub struct FixedBreak<'a> {
    base: NonNull<u8>,
    len: usize,
    brk: usize,
    marker: PhantomData<&'a mut [u8]>,
}

// The buffer is exclusively borrowed for `'a`, so moving the break to
// another thread moves the only access to it.
unsafe impl Send for FixedBreak<'_> {}

impl<'a> FixedBreak<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            len: buffer.len(),
            base: NonNull::from(buffer).cast(),
            brk: 0,
            marker: PhantomData,
        }
    }

    /// Bytes currently below the break.
    pub fn used(&self) -> usize {
        self.brk
    }

    /// Size of the whole buffer.
    pub fn capacity(&self) -> usize {
        self.len
    }
}

unsafe impl HeapGrower for FixedBreak<'_> {
    unsafe fn sbrk(&mut self, delta: isize) -> Option<NonNull<u8>> {
        let new_brk = self.brk.checked_add_signed(delta).filter(|&brk| brk <= self.len)?;
        let previous = unsafe { self.base.add(self.brk) };

        self.brk = new_brk;

        Some(previous)
    }
}
