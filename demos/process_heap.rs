//! Uses the process heap, which on unix sits on the real program break.

use brkalloc::global;

fn main() {
    unsafe {
        let a = global::allocate(100);
        let b = global::allocate(200);
        println!("a = {a:?}, b = {b:?}");

        a.write_bytes(1, 100);
        let a = global::resize(a, 1000);
        println!("a moved to {a:?}, first byte still {}", *a);

        let zeroed = global::zero_allocate(16, 16);
        println!("zeroed = {zeroed:?}, first byte {}", *zeroed);

        let big = global::allocate(1 << 20);
        println!("big = {big:?} (mapped: {})", global::process_heap().block_of(std::ptr::NonNull::new_unchecked(big)).is_none());

        global::release(big);
        global::release(zeroed);
        global::release(a);
        global::release(b);

        for block in global::process_heap().blocks() {
            println!("{:>8} {:>8} {:?}", block.offset.header(), block.size, block.status);
        }
    }
}
