/// `ceil(log2(n))`, except that `0` and `1` both give `1`
pub fn log2ceil(n: u64) -> u32 {
    if n <= 1 {
        1
    } else {
        let bitlen = u64::BITS - n.leading_zeros();
        // 1001 = 9 -> 4
        // 1000 = 8 -> 3
        if 1 << (bitlen - 1) == n {
            bitlen - 1
        } else {
            bitlen
        }
    }
}

/// The tallest a red-black tree of `n` nodes can legally be, counted in
/// nodes on the longest root-to-leaf path: `2 * log2(n + 1)`, rounded up.
pub fn red_black_height_bound(n: usize) -> usize {
    2 * log2ceil(n as u64 + 1) as usize
}
