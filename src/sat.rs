//! Satisfying-assignment extraction and model counting.

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::engine::Engine;
use crate::error::Result;
use crate::types::{BDD_FALSE, BDD_TRUE};

impl Engine {
    /// One satisfying assignment of `f` as a cube, or FALSE when `f` is
    /// unsatisfiable. Deterministic: prefers the high branch whenever it is
    /// nonzero; variables not on the chosen path are left unconstrained.
    pub fn sat_one(&mut self, f: u32) -> Result<u32> {
        if f == BDD_FALSE {
            return Ok(BDD_FALSE);
        }
        self.guarded(|e| e.sat_one_rec(f))
    }

    fn sat_one_rec(&mut self, f: u32) -> Result<u32> {
        if f <= BDD_TRUE {
            return Ok(BDD_TRUE);
        }
        let level = self.level(f);
        let (low, high) = (self.low(f), self.high(f));
        if high != BDD_FALSE {
            let rest = self.sat_one_rec(high)?;
            self.ref_stack.push(rest);
            let res = self.make_node(level, BDD_FALSE, rest)?;
            self.unprotect(1);
            Ok(res)
        } else {
            let rest = self.sat_one_rec(low)?;
            self.ref_stack.push(rest);
            let res = self.make_node(level, rest, BDD_FALSE)?;
            self.unprotect(1);
            Ok(res)
        }
    }

    /// Number of satisfying assignments over all `var_num` variables.
    ///
    /// Skipped levels contribute a factor of two each: the recursion weights
    /// every edge by `2^(level gap - 1)` and the root by `2^level(root)`.
    /// Counts are cached per node; the cache is dropped on GC.
    pub fn sat_count(&mut self, f: u32) -> BigUint {
        self.sat_count_rec(f) << self.count_level(f)
    }

    fn sat_count_rec(&mut self, f: u32) -> BigUint {
        if f == BDD_FALSE {
            return BigUint::zero();
        }
        if f == BDD_TRUE {
            return BigUint::one();
        }
        if let Some(count) = self.count_cache.get(&f) {
            return count.clone();
        }

        let level = self.level(f);
        let (low, high) = (self.low(f), self.high(f));
        let count_low = self.sat_count_rec(low) << (self.count_level(low) - level - 1);
        let count_high = self.sat_count_rec(high) << (self.count_level(high) - level - 1);
        let count = count_low + count_high;

        self.count_cache.insert(f, count.clone());
        count
    }

    /// Effective level for counting: terminals sit just below the deepest
    /// variable.
    fn count_level(&self, n: u32) -> u32 {
        if n <= BDD_TRUE {
            self.var_num() as u32
        } else {
            self.level(n)
        }
    }

    /// Number of distinct paths from `f` to the TRUE terminal.
    pub fn path_count(&mut self, f: u32) -> BigUint {
        if f == BDD_FALSE {
            return BigUint::zero();
        }
        if f == BDD_TRUE {
            return BigUint::one();
        }
        if let Some(count) = self.path_cache.get(&f) {
            return count.clone();
        }

        let (low, high) = (self.low(f), self.high(f));
        let count = self.path_count(low) + self.path_count(high);
        self.path_cache.insert(f, count.clone());
        count
    }
}
