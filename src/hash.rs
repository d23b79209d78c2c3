//! Hash functions for the unique table and the operator caches.
//!
//! Keys are small tuples of node indices (plus an operation tag), so instead
//! of a general-purpose hasher we use the [Szudzik pairing function][szudzik]
//! composed over the tuple elements. The result is masked into a
//! power-of-two table by the caller.
//!
//! [szudzik]: http://szudzik.com/ElegantPairing.pdf

/// Szudzik pairing function.
///
/// ```text
/// (a, b) -> if (a < b) then (b^2 + a) else (a^2 + a + b)
/// ```
pub(crate) fn pairing2(a: u64, b: u64) -> u64 {
    if a < b {
        b.wrapping_mul(b).wrapping_add(a)
    } else {
        a.wrapping_mul(a).wrapping_add(a).wrapping_add(b)
    }
}

/// Pairing function for three `u64` values.
pub(crate) fn pairing3(a: u64, b: u64, c: u64) -> u64 {
    pairing2(pairing2(a, b), c)
}

/// Hash for table and cache keys, masked into a power-of-two range by the
/// caller.
pub(crate) trait Hash64 {
    fn hash64(&self) -> u64;
}

impl Hash64 for u32 {
    fn hash64(&self) -> u64 {
        *self as u64
    }
}

impl Hash64 for (u32, u32) {
    fn hash64(&self) -> u64 {
        pairing2(self.0 as u64, self.1 as u64)
    }
}

impl Hash64 for (u32, u32, u32) {
    fn hash64(&self) -> u64 {
        pairing3(self.0 as u64, self.1 as u64, self.2 as u64)
    }
}

impl Hash64 for (u8, u32, u32) {
    fn hash64(&self) -> u64 {
        pairing3(self.0 as u64, self.1 as u64, self.2 as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairing2() {
        // a\b  0  1  2  3  4
        // ------------------
        // 0    0  1  4  9 16
        // 1    2  3  5 10 17
        // 2    6  7  8 11 18
        // 3   12 13 14 15 19
        // 4   20 21 22 23 24
        assert_eq!(pairing2(0, 0), 0);
        assert_eq!(pairing2(0, 1), 1);
        assert_eq!(pairing2(1, 0), 2);
        assert_eq!(pairing2(1, 1), 3);
        assert_eq!(pairing2(0, 2), 4);
        assert_eq!(pairing2(2, 1), 7);
        assert_eq!(pairing2(4, 0), 20);
        assert_eq!(pairing2(4, 4), 24);
    }

    #[test]
    fn test_pairing3_distinct() {
        // Permutations of a triple must not collide.
        let triples = [(1, 2, 3), (3, 2, 1), (2, 1, 3), (1, 3, 2)];
        let hashes: Vec<u64> = triples.iter().map(|&(a, b, c)| pairing3(a, b, c)).collect();
        for i in 0..hashes.len() {
            for j in (i + 1)..hashes.len() {
                assert_ne!(hashes[i], hashes[j]);
            }
        }
    }
}
