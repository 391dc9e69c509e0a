use std::ptr::NonNull;

use brkalloc::{HEADER_SIZE, Heap};

fn log_alloc(heap: &Heap<brkalloc::ReservedBreak>, size: usize, addr: NonNull<u8>) {
    println!("Requested {} bytes of memory", size);
    match heap.block_of(addr) {
        Some(block) => println!("Received {addr:?}, arena block at offset {}", block.offset.header()),
        None => println!("Received {addr:?}, mapped block"),
    }
}

fn dump(heap: &Heap<brkalloc::ReservedBreak>) {
    println!("Arena ({} bytes, header {} bytes):", heap.arena_len(), HEADER_SIZE);
    for block in heap.blocks() {
        println!("  {:>8} {:>8} {:?}", block.offset.header(), block.size, block.status);
    }
}

fn main() {
    env_logger::init();

    let mut heap = Heap::reserved(1 << 20);

    let a = heap.allocate(100).unwrap().unwrap();
    log_alloc(&heap, 100, a);

    let b = heap.allocate(200).unwrap().unwrap();
    log_alloc(&heap, 200, b);

    let c = heap.allocate(16).unwrap().unwrap();
    log_alloc(&heap, 16, c);
    dump(&heap);

    unsafe {
        heap.release(Some(a)).unwrap();
        heap.release(Some(b)).unwrap();
    }
    println!("\nReleased the first two blocks, they are merged:");
    dump(&heap);

    let d = heap.allocate(250).unwrap().unwrap();
    println!("\nA 250 byte request reuses {:?} (first block was {:?})", d, a);

    let d = unsafe { heap.resize(Some(d), 40).unwrap().unwrap() };
    println!("Shrunk in place to 40 bytes at {:?}", d);
    dump(&heap);

    unsafe {
        heap.release(Some(c)).unwrap();
        heap.release(Some(d)).unwrap();
    }
}
