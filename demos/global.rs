//! This example is designed to test the implementation of
//! the trait `GlobalAlloc` on our allocator. See [`LockedHeap`] to
//! see the actual trait implementation.

use std::thread;

use brkalloc::{LockedHeap, SystemBreak};

#[global_allocator]
static ALLOCATOR: LockedHeap<SystemBreak> = LockedHeap::new(SystemBreak::new());

fn main() {
    // Box example
    let val_box = Box::new(22);
    println!("Box Value: {}, At: {:p}", val_box, val_box);

    // Vec example
    let mut v = Vec::new();
    for i in 0..5 {
        v.push(i * 10);
        println!("Added {}; Capacity: {}; At: {:p}", v[i], v.capacity(), v.as_ptr());
    }

    // String example
    let msg = String::from("Heap Testing");
    println!("\nString '{}' - At: {:p}", msg, msg.as_ptr());

    let p1 = Box::new(2.22);
    let addr_p1 = format!("{:p}", p1);
    println!("P1 Allocated at: {}", addr_p1);

    drop(p1);
    println!("P1 Deallocated");

    let p2 = Box::new(2.22);
    let addr_p2 = format!("{:p}", p2);
    println!("P2 at: {}", addr_p2);

    // Reuse example: same class, same block
    let a = Box::new([0u8; 64]);
    let ptr_a = a.as_ptr();
    drop(a);

    let c = Box::new([0u8; 60]);
    let ptr_c = c.as_ptr();

    if ptr_a == ptr_c {
        println!("Correctly reused at {:p}", ptr_c);
    } else {
        println!("Not reused. A was at {:p} and C is at {:p}", ptr_a, ptr_c);
    }

    // Big blocks at the top of the heap go straight back to the OS
    let big = vec![1u8; 8 << 20];
    println!("Big block at {:p}", big.as_ptr());
    drop(big);

    // Thread example: spawning asks for over-aligned blocks
    let workers: Vec<_> = (0..4)
        .map(|i| {
            thread::spawn(move || {
                let v: Vec<u64> = (0..100).map(|n| n * i).collect();
                v.iter().sum::<u64>()
            })
        })
        .collect();

    for (i, worker) in workers.into_iter().enumerate() {
        println!("Thread {i} summed {}", worker.join().unwrap());
    }

    println!("{:#?}", ALLOCATOR.lock().stats());
}
