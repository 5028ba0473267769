use thiserror::Error;

/// Errors the allocation engines can report.
///
/// Neither of them corrupts the allocator: the free lists and the heap break
/// are left exactly as they were before the failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The heap-growth primitive refused to move the break.
    #[error("out of memory: could not grow the heap by {requested} bytes")]
    OutOfMemory { requested: usize },
    /// The requested size can not be represented once rounded and headed.
    #[error("requested size overflows the address space")]
    SizeOverflow,
}

pub type Result<T> = core::result::Result<T, AllocError>;
