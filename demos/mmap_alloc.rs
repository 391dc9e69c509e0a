use brkalloc::{Heap, INITIAL_CHUNK};

fn main() {
    env_logger::init();

    let mut heap = Heap::reserved(1 << 20);

    // Above the large object threshold: served by its own mapping.
    let big = heap.allocate(200_000).unwrap().unwrap();
    println!("200000 bytes at {:?}", big);
    println!("arena head after a large request: {:?}", heap.arena_head());

    // Zero-filled requests switch to mmap above one page.
    let zeroed = heap.zero_allocate(1024, 8).unwrap().unwrap();
    println!("8 KiB of zeroes at {:?} (in arena: {})", zeroed, heap.block_of(zeroed).is_some());

    // A small one creates the arena.
    let small = heap.allocate(64).unwrap().unwrap();
    println!("64 bytes at {:?}, arena is {} bytes", small, heap.arena_len());
    assert_eq!(INITIAL_CHUNK, heap.arena_len());

    unsafe {
        println!("Releasing mapped blocks");
        heap.release(Some(big)).unwrap();
        heap.release(Some(zeroed)).unwrap();
        heap.release(Some(small)).unwrap();
    }
}
