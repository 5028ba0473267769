//! Walks a private heap through a few allocations and prints where every
//! block lands.

use brkalloc::{FixedBreak, Heap};

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    let mut memory = vec![0u64; 1 << 16];
    let len = memory.len() * 8;
    let bytes = unsafe { std::slice::from_raw_parts_mut(memory.as_mut_ptr().cast::<u8>(), len) };
    let mut heap = Heap::new(FixedBreak::new(bytes));

    let addr1 = heap.allocate(8);
    log_alloc(addr1, 8);

    let addr2 = heap.allocate(100);
    log_alloc(addr2, 100);

    let addr3 = heap.allocate(50_000);
    log_alloc(addr3, 50_000);

    unsafe {
        heap.deallocate(addr1);
        heap.deallocate(addr2);

        let addr3 = heap.resize(addr3, 60_000);
        log_alloc(addr3, 60_000);
        heap.deallocate(addr3);
    }

    let addr4 = heap.allocate(8);
    println!("Should be first addr {addr4:?}");

    println!("{:#?}", heap.stats());
    println!("Free blocks: {}", heap.free_count());
}
