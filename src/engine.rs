//! The engine behind the factory facade.
//!
//! All state of one factory lives here: the unique table, the variable
//! order, the operator caches, installed pairings, and the statistics. The
//! facade ([`crate::factory::BddFactory`]) and the handles
//! ([`crate::handle::Bdd`]) share one engine through `Rc<RefCell<…>>`;
//! engines are single-threaded by construction.
//!
//! # Result protection
//!
//! Garbage collection can run inside any `make_node` call, so every
//! recursion pushes freshly built intermediate results onto `ref_stack`
//! before the next allocation. The mark phase treats that stack as a root
//! set alongside the externally referenced nodes. Public entry points run
//! through [`Engine::guarded`], which restores the stack to its entry
//! depth on both success and error.

use std::collections::BTreeMap;
use std::time::Instant;

use hashbrown::{HashMap, HashSet};
use log::{debug, info};
use num_bigint::BigUint;

use crate::cache::OpCache;
use crate::error::{BddError, Result};
use crate::stats::{CacheStats, GcStats, ReorderStats};
use crate::table::{NodeTable, MAX_CAPACITY};
use crate::types::{BddOp, BDD_FALSE, BDD_TRUE};

/// Upper bound on the number of variables.
pub(crate) const MAX_VAR_NUM: usize = 0x3FFF_FFFF;

/// Internal cache tag for the dedicated `not` fast path; the public
/// operator codes end at 9.
const OP_NOT: u8 = 10;

const QUANT_EXIST: u8 = 0;
const QUANT_FORALL: u8 = 1;

/// Replacement slot sentinel: level keeps its own variable.
const IDENT: u32 = u32::MAX;

/// Replacement entry of a pairing under construction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum PairTarget {
    Var(u32),
    /// Node index; the builder holds a reference on it.
    Node(u32),
}

/// An installed (frozen) pairing: replacement node per level.
struct PairData {
    by_level: Vec<u32>,
    /// Deepest mapped level; nodes below are returned untouched.
    last: u32,
}

pub(crate) type GcHandler = Box<dyn Fn(&GcStats)>;

pub(crate) struct Engine {
    pub(crate) factory_id: u64,
    pub(crate) epoch: u32,
    initialized: bool,

    table: NodeTable,
    var_num: usize,
    var_to_level: Vec<u32>,
    level_to_var: Vec<u32>,
    /// Pinned `(v, FALSE, TRUE)` node per variable.
    var_nodes: Vec<u32>,
    /// Pinned `(v, TRUE, FALSE)` node per variable.
    nvar_nodes: Vec<u32>,

    apply_cache: OpCache<(u8, u32, u32), u32>,
    ite_cache: OpCache<(u32, u32, u32), u32>,
    quant_cache: OpCache<(u8, u32, u32), u32>,
    relprod_cache: OpCache<(u32, u32, u32), u32>,
    compose_cache: OpCache<(u32, u32, u32), u32>,
    replace_cache: OpCache<(u32, u32), u32>,
    restrict_cache: OpCache<(u32, u32), u32>,
    pub(crate) count_cache: OpCache<u32, BigUint>,
    pub(crate) path_cache: OpCache<u32, BigUint>,
    support_memo: HashMap<u32, u32>,

    // Scratch for quantification/restriction, prepared per top-level call.
    quant_set: Vec<bool>,
    quant_last: u32,
    restrict_set: Vec<u8>,
    restrict_last: u32,

    pairings: Vec<PairData>,
    pair_dedup: HashMap<Vec<(u32, u8, u32)>, u32>,

    /// In-flight results, protected from GC.
    pub(crate) ref_stack: Vec<u32>,

    min_free_nodes: f64,
    increase_factor: f64,
    cache_ratio: Option<f64>,
    cache_bits: usize,

    gc_stats: GcStats,
    reorder_stats: ReorderStats,
    gc_handler: Option<GcHandler>,
}

fn cache_bits_for(entries: usize) -> usize {
    (entries.next_power_of_two().trailing_zeros() as usize).clamp(6, 28)
}

impl Engine {
    pub fn new(node_num: usize, cache_size: usize, factory_id: u64) -> Engine {
        let cache_bits = cache_bits_for(cache_size);
        Engine {
            factory_id,
            epoch: 1,
            initialized: true,
            table: NodeTable::new(node_num),
            var_num: 0,
            var_to_level: Vec::new(),
            level_to_var: Vec::new(),
            var_nodes: Vec::new(),
            nvar_nodes: Vec::new(),
            apply_cache: OpCache::new(cache_bits),
            ite_cache: OpCache::new(cache_bits),
            quant_cache: OpCache::new(cache_bits),
            relprod_cache: OpCache::new(cache_bits),
            compose_cache: OpCache::new(cache_bits),
            replace_cache: OpCache::new(cache_bits),
            restrict_cache: OpCache::new(cache_bits),
            count_cache: OpCache::new(cache_bits),
            path_cache: OpCache::new(cache_bits),
            support_memo: HashMap::new(),
            quant_set: Vec::new(),
            quant_last: 0,
            restrict_set: Vec::new(),
            restrict_last: 0,
            pairings: Vec::new(),
            pair_dedup: HashMap::new(),
            ref_stack: Vec::with_capacity(64),
            min_free_nodes: 0.20,
            increase_factor: 2.0,
            cache_ratio: None,
            cache_bits,
            gc_stats: GcStats::default(),
            reorder_stats: ReorderStats::default(),
            gc_handler: None,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle and configuration
    // ------------------------------------------------------------------

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Tears the factory down: all storage is dropped and the epoch is
    /// bumped so handles that outlive the factory fail their guard.
    pub fn done(&mut self) {
        self.table.teardown();
        self.clear_op_caches();
        self.support_memo = HashMap::new();
        self.pairings = Vec::new();
        self.pair_dedup = HashMap::new();
        self.var_to_level = Vec::new();
        self.level_to_var = Vec::new();
        self.var_nodes = Vec::new();
        self.nvar_nodes = Vec::new();
        self.quant_set = Vec::new();
        self.restrict_set = Vec::new();
        self.ref_stack = Vec::new();
        self.var_num = 0;
        self.epoch = self.epoch.wrapping_add(1);
        self.initialized = false;
    }

    pub fn check_epoch(&self, epoch: u32) -> Result<()> {
        if !self.initialized || epoch != self.epoch {
            return Err(BddError::UseAfterFree);
        }
        Ok(())
    }

    pub fn check_alive(&self) -> Result<()> {
        if !self.initialized {
            return Err(BddError::UseAfterFree);
        }
        Ok(())
    }

    pub fn set_min_free_nodes(&mut self, x: f64) -> Result<f64> {
        if !(0.0..=1.0).contains(&x) {
            return Err(BddError::config(format!(
                "min_free_nodes must be within [0, 1], got {}",
                x
            )));
        }
        Ok(std::mem::replace(&mut self.min_free_nodes, x))
    }

    pub fn set_increase_factor(&mut self, x: f64) -> Result<f64> {
        if !x.is_finite() || x < 1.0 {
            return Err(BddError::config(format!(
                "increase_factor must be at least 1, got {}",
                x
            )));
        }
        Ok(std::mem::replace(&mut self.increase_factor, x))
    }

    /// Sets the operator-cache entries per table slot used when the table
    /// grows. Returns the previous ratio, if any was set.
    pub fn set_cache_ratio(&mut self, x: f64) -> Result<Option<f64>> {
        if !x.is_finite() || x <= 0.0 {
            return Err(BddError::config(format!(
                "cache_ratio must be positive, got {}",
                x
            )));
        }
        Ok(std::mem::replace(&mut self.cache_ratio, Some(x)))
    }

    /// Grows the node table to at least `n` slots. Never shrinks.
    pub fn set_node_table_size(&mut self, n: usize) -> Result<usize> {
        self.check_alive()?;
        let old = self.table.capacity();
        let target = n.next_power_of_two().min(MAX_CAPACITY);
        if target > old {
            self.table.grow(target);
            self.resize_caches();
        }
        Ok(old)
    }

    pub fn set_cache_size(&mut self, n: usize) -> Result<usize> {
        let old = 1usize << self.cache_bits;
        self.cache_bits = cache_bits_for(n);
        self.reallocate_caches();
        Ok(old)
    }

    pub fn set_gc_handler(&mut self, handler: Option<GcHandler>) {
        self.gc_handler = handler;
    }

    pub fn node_table_size(&self) -> usize {
        self.table.capacity()
    }

    /// Occupied node slots (terminals and preallocated variables included;
    /// dead-but-unswept nodes count until the next collection).
    pub fn node_num(&self) -> usize {
        self.table.occupied()
    }

    pub fn cache_size(&self) -> usize {
        self.apply_cache.capacity()
    }

    pub fn gc_stats(&self) -> GcStats {
        self.gc_stats.clone()
    }

    pub fn reorder_stats(&self) -> ReorderStats {
        self.reorder_stats.clone()
    }

    pub fn cache_stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            unique_access: self.table.unique_access,
            unique_chain: self.table.unique_chain,
            unique_hit: self.table.unique_hit,
            unique_miss: self.table.unique_miss,
            unique_trivial: self.table.unique_trivial,
            op_hit: 0,
            op_miss: 0,
            op_overwrite: 0,
        };
        for cache in [
            &self.apply_cache,
            &self.quant_cache,
        ] {
            stats.op_hit += cache.hits();
            stats.op_miss += cache.misses();
            stats.op_overwrite += cache.overwrites();
        }
        for cache in [&self.ite_cache, &self.relprod_cache, &self.compose_cache] {
            stats.op_hit += cache.hits();
            stats.op_miss += cache.misses();
            stats.op_overwrite += cache.overwrites();
        }
        for cache in [&self.replace_cache, &self.restrict_cache] {
            stats.op_hit += cache.hits();
            stats.op_miss += cache.misses();
            stats.op_overwrite += cache.overwrites();
        }
        for cache in [&self.count_cache, &self.path_cache] {
            stats.op_hit += cache.hits();
            stats.op_miss += cache.misses();
            stats.op_overwrite += cache.overwrites();
        }
        stats
    }

    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        self.table.check_consistency()
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    pub fn var_num(&self) -> usize {
        self.var_num
    }

    /// Grows the number of variables. Shrinking is rejected.
    pub fn set_var_num(&mut self, num: usize) -> Result<usize> {
        self.check_alive()?;
        if num < self.var_num {
            return Err(BddError::config(format!(
                "variable count may only grow: {} -> {}",
                self.var_num, num
            )));
        }
        if num > MAX_VAR_NUM {
            return Err(BddError::config(format!("variable count {} is too large", num)));
        }
        let old = self.var_num;
        for v in old..num {
            let level = v as u32;
            self.var_to_level.push(level);
            self.level_to_var.push(v as u32);
            let pos = self.make_node(level, BDD_FALSE, BDD_TRUE)?;
            self.table.pin(pos);
            let neg = self.make_node(level, BDD_TRUE, BDD_FALSE)?;
            self.table.pin(neg);
            self.var_nodes.push(pos);
            self.nvar_nodes.push(neg);
        }
        self.quant_set.resize(num, false);
        self.restrict_set.resize(num, 0);
        self.var_num = num;
        // Cached model counts are relative to the number of variables.
        if num != old {
            self.count_cache.clear();
        }
        Ok(old)
    }

    fn check_var(&self, var: u32) -> Result<()> {
        if (var as usize) < self.var_num {
            Ok(())
        } else {
            Err(BddError::config(format!(
                "variable {} out of range (var_num = {})",
                var, self.var_num
            )))
        }
    }

    pub fn ith_var(&self, var: u32) -> Result<u32> {
        self.check_var(var)?;
        Ok(self.var_nodes[var as usize])
    }

    pub fn nith_var(&self, var: u32) -> Result<u32> {
        self.check_var(var)?;
        Ok(self.nvar_nodes[var as usize])
    }

    pub fn level2var(&self, level: u32) -> Result<u32> {
        if (level as usize) < self.var_num {
            Ok(self.level_to_var[level as usize])
        } else {
            Err(BddError::config(format!("level {} out of range", level)))
        }
    }

    pub fn var2level(&self, var: u32) -> Result<u32> {
        self.check_var(var)?;
        Ok(self.var_to_level[var as usize])
    }

    // ------------------------------------------------------------------
    // Node access (used by handles, sat, dot)
    // ------------------------------------------------------------------

    #[inline]
    pub(crate) fn level(&self, n: u32) -> u32 {
        self.table.level(n)
    }
    #[inline]
    pub(crate) fn low(&self, n: u32) -> u32 {
        self.table.low(n)
    }
    #[inline]
    pub(crate) fn high(&self, n: u32) -> u32 {
        self.table.high(n)
    }
    #[inline]
    pub(crate) fn is_terminal(&self, n: u32) -> bool {
        self.table.is_terminal(n)
    }
    #[inline]
    pub(crate) fn var_of(&self, n: u32) -> u32 {
        self.level_to_var[self.table.level(n) as usize]
    }

    pub fn acquire(&mut self, n: u32) {
        self.table.incref(n);
    }

    pub fn release(&mut self, n: u32) {
        self.table.decref(n);
    }

    pub(crate) fn ref_count(&self, n: u32) -> u32 {
        self.table.ref_count(n)
    }

    /// Distinct internal nodes reachable from the given roots.
    pub fn node_count(&self, roots: &[u32]) -> usize {
        let mut visited: HashSet<u32> = HashSet::new();
        let mut stack: Vec<u32> = roots
            .iter()
            .copied()
            .filter(|&n| !self.table.is_terminal(n))
            .collect();
        while let Some(n) = stack.pop() {
            if !visited.insert(n) {
                continue;
            }
            for child in [self.table.low(n), self.table.high(n)] {
                if !self.table.is_terminal(child) {
                    stack.push(child);
                }
            }
        }
        visited.len()
    }

    // ------------------------------------------------------------------
    // Allocation, GC, growth
    // ------------------------------------------------------------------

    /// Hash-consing constructor. Runs GC (and grows the table when the
    /// post-GC free fraction is below `min_free_nodes`) if the free list is
    /// exhausted; fails with [`BddError::OutOfMemory`] only when the table
    /// is at its hard ceiling and nothing could be reclaimed.
    pub(crate) fn make_node(&mut self, level: u32, low: u32, high: u32) -> Result<u32> {
        if low == high {
            self.table.note_trivial();
            return Ok(low);
        }
        if let Some(n) = self.table.lookup(level, low, high) {
            return Ok(n);
        }
        if self.table.free_count() == 0 {
            self.collect_garbage();
            let threshold = (self.min_free_nodes * self.table.capacity() as f64) as usize;
            if self.table.free_count() < threshold {
                self.grow_table();
            }
            if self.table.free_count() == 0 {
                return Err(BddError::OutOfMemory);
            }
        }
        Ok(self.table.insert(level, low, high))
    }

    /// Mark-and-sweep over the table; clears every operator cache (entries
    /// reference node indices that may now be recycled) and reports
    /// statistics through the GC handler.
    pub fn collect_garbage(&mut self) {
        let start = Instant::now();
        let roots = std::mem::take(&mut self.ref_stack);
        let report = self.table.gc(&roots);
        self.ref_stack = roots;
        self.invalidate_caches();
        debug!("gc reclaimed {} slots", report.freed);

        let elapsed = start.elapsed();
        let stats = &mut self.gc_stats;
        stats.nodes = self.table.capacity();
        stats.freenodes = self.table.free_count();
        stats.reusednodes = report.reused;
        stats.time = elapsed;
        stats.sumtime += elapsed;
        stats.num += 1;
        match &self.gc_handler {
            Some(handler) => handler(&self.gc_stats),
            None => info!("{}", self.gc_stats),
        }
    }

    fn grow_table(&mut self) {
        let capacity = self.table.capacity();
        let target = ((capacity as f64 * self.increase_factor).ceil() as usize)
            .next_power_of_two()
            .min(MAX_CAPACITY);
        if target > capacity {
            self.table.grow(target);
            self.resize_caches();
        }
    }

    fn resize_caches(&mut self) {
        if let Some(ratio) = self.cache_ratio {
            let entries = (self.table.capacity() as f64 * ratio) as usize;
            self.cache_bits = cache_bits_for(entries);
        }
        self.reallocate_caches();
    }

    fn reallocate_caches(&mut self) {
        let bits = self.cache_bits;
        self.apply_cache.resize(bits);
        self.ite_cache.resize(bits);
        self.quant_cache.resize(bits);
        self.relprod_cache.resize(bits);
        self.compose_cache.resize(bits);
        self.replace_cache.resize(bits);
        self.restrict_cache.resize(bits);
        self.count_cache.resize(bits);
        self.path_cache.resize(bits);
    }

    fn clear_op_caches(&mut self) {
        self.apply_cache.clear();
        self.ite_cache.clear();
        self.quant_cache.clear();
        self.relprod_cache.clear();
        self.compose_cache.clear();
        self.replace_cache.clear();
        self.restrict_cache.clear();
        self.count_cache.clear();
        self.path_cache.clear();
    }

    fn invalidate_caches(&mut self) {
        self.clear_op_caches();
        self.support_memo.clear();
    }

    /// Runs `body` with the result-protection stack restored to its entry
    /// depth afterwards, success or not.
    pub(crate) fn guarded<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let mark = self.ref_stack.len();
        let res = body(self);
        self.ref_stack.truncate(mark);
        res
    }

    #[inline]
    pub(crate) fn unprotect(&mut self, count: usize) {
        let len = self.ref_stack.len() - count;
        self.ref_stack.truncate(len);
    }

    /// Cofactors of `n` with respect to the variable at `level`.
    #[inline]
    fn cofactors(&self, n: u32, level: u32) -> (u32, u32) {
        if self.table.level(n) == level {
            (self.table.low(n), self.table.high(n))
        } else {
            (n, n)
        }
    }

    // ------------------------------------------------------------------
    // apply / not / ite
    // ------------------------------------------------------------------

    pub fn apply(&mut self, op: BddOp, f: u32, g: u32) -> Result<u32> {
        debug!("apply({}, f = @{}, g = @{})", op, f, g);
        self.guarded(|e| e.apply_rec(op, f, g))
    }

    fn apply_rec(&mut self, op: BddOp, f: u32, g: u32) -> Result<u32> {
        if let Some(res) = self.apply_shortcut(op, f, g) {
            return Ok(res);
        }
        let (f, g) = if op.is_commutative() && f > g { (g, f) } else { (f, g) };
        let key = (op.id(), f, g);
        if let Some(&res) = self.apply_cache.get(&key) {
            return Ok(res);
        }

        let level = self.table.level(f).min(self.table.level(g));
        let (f0, f1) = self.cofactors(f, level);
        let (g0, g1) = self.cofactors(g, level);

        let low = self.apply_rec(op, f0, g0)?;
        self.ref_stack.push(low);
        let high = self.apply_rec(op, f1, g1)?;
        self.ref_stack.push(high);
        let res = self.make_node(level, low, high)?;
        self.unprotect(2);

        self.apply_cache.insert(key, res);
        Ok(res)
    }

    /// Absorbing/identity shortcuts, including the terminal-terminal case.
    fn apply_shortcut(&self, op: BddOp, f: u32, g: u32) -> Option<u32> {
        const F: u32 = BDD_FALSE;
        const T: u32 = BDD_TRUE;
        if f <= T && g <= T {
            return Some(op.eval(f == T, g == T) as u32);
        }
        match op {
            BddOp::And => match (f, g) {
                _ if f == g => Some(f),
                (F, _) | (_, F) => Some(F),
                (T, _) => Some(g),
                (_, T) => Some(f),
                _ => None,
            },
            BddOp::Or => match (f, g) {
                _ if f == g => Some(f),
                (T, _) | (_, T) => Some(T),
                (F, _) => Some(g),
                (_, F) => Some(f),
                _ => None,
            },
            BddOp::Xor => match (f, g) {
                _ if f == g => Some(F),
                (F, _) => Some(g),
                (_, F) => Some(f),
                _ => None,
            },
            BddOp::Nand => match (f, g) {
                (F, _) | (_, F) => Some(T),
                _ => None,
            },
            BddOp::Nor => match (f, g) {
                (T, _) | (_, T) => Some(F),
                _ => None,
            },
            BddOp::Imp => match (f, g) {
                _ if f == g => Some(T),
                (F, _) | (_, T) => Some(T),
                (T, _) => Some(g),
                _ => None,
            },
            BddOp::Biimp => match (f, g) {
                _ if f == g => Some(T),
                (T, _) => Some(g),
                (_, T) => Some(f),
                _ => None,
            },
            BddOp::Diff => match (f, g) {
                _ if f == g => Some(F),
                (F, _) | (_, T) => Some(F),
                (_, F) => Some(f),
                _ => None,
            },
            BddOp::Less => match (f, g) {
                _ if f == g => Some(F),
                (T, _) | (_, F) => Some(F),
                (F, _) => Some(g),
                _ => None,
            },
            BddOp::Invimp => match (f, g) {
                _ if f == g => Some(T),
                (T, _) | (_, F) => Some(T),
                (_, T) => Some(f),
                _ => None,
            },
        }
    }

    pub fn not(&mut self, f: u32) -> Result<u32> {
        debug!("not(f = @{})", f);
        self.guarded(|e| e.not_rec(f))
    }

    fn not_rec(&mut self, f: u32) -> Result<u32> {
        if f <= BDD_TRUE {
            return Ok(f ^ 1);
        }
        let key = (OP_NOT, f, 0);
        if let Some(&res) = self.apply_cache.get(&key) {
            return Ok(res);
        }

        let level = self.table.level(f);
        let low = self.not_rec(self.table.low(f))?;
        self.ref_stack.push(low);
        let high = self.not_rec(self.table.high(f))?;
        self.ref_stack.push(high);
        let res = self.make_node(level, low, high)?;
        self.unprotect(2);

        self.apply_cache.insert(key, res);
        Ok(res)
    }

    pub fn ite(&mut self, f: u32, g: u32, h: u32) -> Result<u32> {
        debug!("ite(f = @{}, g = @{}, h = @{})", f, g, h);
        self.guarded(|e| e.ite_rec(f, g, h))
    }

    fn ite_rec(&mut self, f: u32, g: u32, h: u32) -> Result<u32> {
        // Base cases:
        //   ite(1,G,H) => G
        //   ite(0,G,H) => H
        //   ite(F,G,G) => G
        //   ite(F,1,0) => F
        //   ite(F,0,1) => ~F
        if f == BDD_TRUE {
            return Ok(g);
        }
        if f == BDD_FALSE {
            return Ok(h);
        }
        if g == h {
            return Ok(g);
        }
        if g == BDD_TRUE && h == BDD_FALSE {
            return Ok(f);
        }
        if g == BDD_FALSE && h == BDD_TRUE {
            return self.not_rec(f);
        }

        let key = (f, g, h);
        if let Some(&res) = self.ite_cache.get(&key) {
            return Ok(res);
        }

        let level = self
            .table
            .level(f)
            .min(self.table.level(g))
            .min(self.table.level(h));
        let (f0, f1) = self.cofactors(f, level);
        let (g0, g1) = self.cofactors(g, level);
        let (h0, h1) = self.cofactors(h, level);

        let low = self.ite_rec(f0, g0, h0)?;
        self.ref_stack.push(low);
        let high = self.ite_rec(f1, g1, h1)?;
        self.ref_stack.push(high);
        let res = self.make_node(level, low, high)?;
        self.unprotect(2);

        self.ite_cache.insert(key, res);
        Ok(res)
    }

    // ------------------------------------------------------------------
    // Quantification
    // ------------------------------------------------------------------

    pub fn exist(&mut self, f: u32, cube: u32) -> Result<u32> {
        debug!("exist(f = @{}, cube = @{})", f, cube);
        self.quantify(f, cube, QUANT_EXIST)
    }

    pub fn forall(&mut self, f: u32, cube: u32) -> Result<u32> {
        debug!("forall(f = @{}, cube = @{})", f, cube);
        self.quantify(f, cube, QUANT_FORALL)
    }

    fn quantify(&mut self, f: u32, cube: u32, tag: u8) -> Result<u32> {
        if cube <= BDD_TRUE {
            // Empty variable set.
            return Ok(f);
        }
        self.load_quant_set(cube)?;
        self.guarded(|e| e.quant_rec(f, cube, tag))
    }

    /// Records the levels named by a cube into the quantification scratch.
    fn load_quant_set(&mut self, cube: u32) -> Result<()> {
        self.quant_set.fill(false);
        self.quant_last = 0;
        let mut n = cube;
        while n > BDD_TRUE {
            let (low, high) = (self.table.low(n), self.table.high(n));
            if low != BDD_FALSE && high != BDD_FALSE {
                return Err(BddError::config("quantification expects a cube of variables"));
            }
            let level = self.table.level(n);
            self.quant_set[level as usize] = true;
            self.quant_last = level;
            n = if high != BDD_FALSE { high } else { low };
        }
        Ok(())
    }

    fn quant_rec(&mut self, f: u32, cube: u32, tag: u8) -> Result<u32> {
        if f <= BDD_TRUE || self.table.level(f) > self.quant_last {
            return Ok(f);
        }
        let key = (tag, f, cube);
        if let Some(&res) = self.quant_cache.get(&key) {
            return Ok(res);
        }

        let level = self.table.level(f);
        let low = self.quant_rec(self.table.low(f), cube, tag)?;
        let res = if self.quant_set[level as usize] {
            let (op, absorbing) = if tag == QUANT_EXIST {
                (BddOp::Or, BDD_TRUE)
            } else {
                (BddOp::And, BDD_FALSE)
            };
            if low == absorbing {
                low
            } else {
                self.ref_stack.push(low);
                let high = self.quant_rec(self.table.high(f), cube, tag)?;
                self.ref_stack.push(high);
                let res = self.apply_rec(op, low, high)?;
                self.unprotect(2);
                res
            }
        } else {
            self.ref_stack.push(low);
            let high = self.quant_rec(self.table.high(f), cube, tag)?;
            self.ref_stack.push(high);
            let res = self.make_node(level, low, high)?;
            self.unprotect(2);
            res
        };

        self.quant_cache.insert(key, res);
        Ok(res)
    }

    /// Fused `exist(and(f, g), cube)`. Avoids materializing the conjunction
    /// where it would blow up before quantification.
    pub fn relprod(&mut self, f: u32, g: u32, cube: u32) -> Result<u32> {
        debug!("relprod(f = @{}, g = @{}, cube = @{})", f, g, cube);
        if cube <= BDD_TRUE {
            return self.apply(BddOp::And, f, g);
        }
        self.load_quant_set(cube)?;
        self.guarded(|e| e.relprod_rec(f, g, cube))
    }

    fn relprod_rec(&mut self, f: u32, g: u32, cube: u32) -> Result<u32> {
        if f == BDD_FALSE || g == BDD_FALSE {
            return Ok(BDD_FALSE);
        }
        if f == g || g == BDD_TRUE {
            return self.quant_rec(f, cube, QUANT_EXIST);
        }
        if f == BDD_TRUE {
            return self.quant_rec(g, cube, QUANT_EXIST);
        }

        let (lf, lg) = (self.table.level(f), self.table.level(g));
        if lf > self.quant_last && lg > self.quant_last {
            // Below every quantified variable: plain conjunction.
            return self.apply_rec(BddOp::And, f, g);
        }

        let key = (f, g, cube);
        if let Some(&res) = self.relprod_cache.get(&key) {
            return Ok(res);
        }

        let level = lf.min(lg);
        let (f0, f1) = self.cofactors(f, level);
        let (g0, g1) = self.cofactors(g, level);

        let low = self.relprod_rec(f0, g0, cube)?;
        let res = if self.quant_set[level as usize] {
            if low == BDD_TRUE {
                low
            } else {
                self.ref_stack.push(low);
                let high = self.relprod_rec(f1, g1, cube)?;
                self.ref_stack.push(high);
                let res = self.apply_rec(BddOp::Or, low, high)?;
                self.unprotect(2);
                res
            }
        } else {
            self.ref_stack.push(low);
            let high = self.relprod_rec(f1, g1, cube)?;
            self.ref_stack.push(high);
            let res = self.make_node(level, low, high)?;
            self.unprotect(2);
            res
        };

        self.relprod_cache.insert(key, res);
        Ok(res)
    }

    // ------------------------------------------------------------------
    // Restriction, composition, replacement
    // ------------------------------------------------------------------

    /// Fixes the variables named by `cube` to the polarity they carry in
    /// the cube.
    pub fn restrict(&mut self, f: u32, cube: u32) -> Result<u32> {
        debug!("restrict(f = @{}, cube = @{})", f, cube);
        if cube == BDD_TRUE {
            return Ok(f);
        }
        if cube == BDD_FALSE {
            return Err(BddError::config("restrict expects a cube, got FALSE"));
        }
        self.load_restrict_set(cube)?;
        self.guarded(|e| e.restrict_rec(f, cube))
    }

    fn load_restrict_set(&mut self, cube: u32) -> Result<()> {
        self.restrict_set.fill(0);
        self.restrict_last = 0;
        let mut n = cube;
        while n > BDD_TRUE {
            let (low, high) = (self.table.low(n), self.table.high(n));
            if low != BDD_FALSE && high != BDD_FALSE {
                return Err(BddError::config("restrict expects a cube"));
            }
            let level = self.table.level(n);
            if high != BDD_FALSE {
                self.restrict_set[level as usize] = 2;
                n = high;
            } else {
                self.restrict_set[level as usize] = 1;
                n = low;
            }
            self.restrict_last = level;
        }
        Ok(())
    }

    fn restrict_rec(&mut self, f: u32, cube: u32) -> Result<u32> {
        if f <= BDD_TRUE || self.table.level(f) > self.restrict_last {
            return Ok(f);
        }
        let key = (f, cube);
        if let Some(&res) = self.restrict_cache.get(&key) {
            return Ok(res);
        }

        let level = self.table.level(f);
        let res = match self.restrict_set[level as usize] {
            2 => self.restrict_rec(self.table.high(f), cube)?,
            1 => self.restrict_rec(self.table.low(f), cube)?,
            _ => {
                let low = self.restrict_rec(self.table.low(f), cube)?;
                self.ref_stack.push(low);
                let high = self.restrict_rec(self.table.high(f), cube)?;
                self.ref_stack.push(high);
                let res = self.make_node(level, low, high)?;
                self.unprotect(2);
                res
            }
        };

        self.restrict_cache.insert(key, res);
        Ok(res)
    }

    /// Substitutes `g` for variable `var` in `f`.
    pub fn compose(&mut self, f: u32, var: u32, g: u32) -> Result<u32> {
        debug!("compose(f = @{}, var = {}, g = @{})", f, var, g);
        let level = self.var2level(var)?;
        self.guarded(|e| e.compose_rec(f, g, var, level))
    }

    fn compose_rec(&mut self, f: u32, g: u32, var: u32, target_level: u32) -> Result<u32> {
        let level = self.table.level(f);
        if level > target_level {
            return Ok(f);
        }
        if level == target_level {
            return self.ite_rec(g, self.table.high(f), self.table.low(f));
        }
        let key = (f, g, var);
        if let Some(&res) = self.compose_cache.get(&key) {
            return Ok(res);
        }

        let low = self.compose_rec(self.table.low(f), g, var, target_level)?;
        self.ref_stack.push(low);
        let high = self.compose_rec(self.table.high(f), g, var, target_level)?;
        self.ref_stack.push(high);
        let res = self.make_node(level, low, high)?;
        self.unprotect(2);

        self.compose_cache.insert(key, res);
        Ok(res)
    }

    /// Renames variables according to an installed pairing.
    pub fn replace(&mut self, f: u32, pair_id: u32) -> Result<u32> {
        debug!("replace(f = @{}, pair = {})", f, pair_id);
        self.guarded(|e| e.replace_rec(f, pair_id))
    }

    fn replace_rec(&mut self, f: u32, pair_id: u32) -> Result<u32> {
        if f <= BDD_TRUE || self.table.level(f) > self.pairings[pair_id as usize].last {
            return Ok(f);
        }
        let key = (f, pair_id);
        if let Some(&res) = self.replace_cache.get(&key) {
            return Ok(res);
        }

        let level = self.table.level(f);
        let low = self.replace_rec(self.table.low(f), pair_id)?;
        self.ref_stack.push(low);
        let high = self.replace_rec(self.table.high(f), pair_id)?;
        self.ref_stack.push(high);

        let target = match self.pairings[pair_id as usize].by_level[level as usize] {
            IDENT => self.var_nodes[self.level_to_var[level as usize] as usize],
            node => node,
        };
        // Plain variable targets that respect the order build the node
        // directly; everything else goes through ITE, which pushes the
        // replacement down to where it belongs (the compose path).
        let target_level = self.table.level(target);
        let is_var_node = self.table.low(target) == BDD_FALSE && self.table.high(target) == BDD_TRUE;
        let res = if is_var_node
            && target_level < self.table.level(low)
            && target_level < self.table.level(high)
        {
            self.make_node(target_level, low, high)?
        } else {
            self.ite_rec(target, high, low)?
        };
        self.unprotect(2);

        self.replace_cache.insert(key, res);
        Ok(res)
    }

    // ------------------------------------------------------------------
    // Pairings
    // ------------------------------------------------------------------

    /// Freezes a pairing's entry set and installs it, interning by the
    /// entry set so semantically equal pairings share one identity (and
    /// with it the replace-cache key space). Node targets arrive holding
    /// one reference acquired when they were set; on a dedup hit that
    /// reference is released, otherwise it is kept for the lifetime of the
    /// factory.
    pub fn install_pairing(&mut self, entries: &BTreeMap<u32, PairTarget>) -> Result<u32> {
        for (&old, target) in entries {
            self.check_var(old)?;
            if let PairTarget::Var(new) = target {
                self.check_var(*new)?;
            }
        }

        let key: Vec<(u32, u8, u32)> = entries
            .iter()
            .map(|(&old, target)| match target {
                PairTarget::Var(v) => (old, 0, *v),
                PairTarget::Node(n) => (old, 1, *n),
            })
            .collect();

        if let Some(&id) = self.pair_dedup.get(&key) {
            for &(_, tag, payload) in &key {
                if tag == 1 {
                    self.table.decref(payload);
                }
            }
            return Ok(id);
        }

        let mut by_level = vec![IDENT; self.var_num];
        let mut last = 0;
        for (&old, target) in entries {
            let level = self.var_to_level[old as usize];
            by_level[level as usize] = match target {
                PairTarget::Var(v) => self.var_nodes[*v as usize],
                PairTarget::Node(n) => *n,
            };
            last = last.max(level);
        }

        let id = self.pairings.len() as u32;
        self.pairings.push(PairData { by_level, last });
        self.pair_dedup.insert(key, id);
        // Installed pairings change what replace/compose results mean for
        // their id space; cached results keyed on other ids are unaffected
        // but the caches are cleared wholesale, matching the GC policy.
        self.clear_op_caches();
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Variadic builders
    // ------------------------------------------------------------------

    pub fn and_all(&mut self, operands: &[u32]) -> Result<u32> {
        self.guarded(|e| e.reduce_all(BddOp::And, operands))
    }

    pub fn or_all(&mut self, operands: &[u32]) -> Result<u32> {
        self.guarded(|e| e.reduce_all(BddOp::Or, operands))
    }

    /// Reduces the operands in balanced pairwise rounds. Operands are
    /// grouped by root level first; the grouping is a heuristic to keep
    /// intermediate results small, not part of the semantics.
    fn reduce_all(&mut self, op: BddOp, operands: &[u32]) -> Result<u32> {
        let (absorbing, identity) = match op {
            BddOp::And => (BDD_FALSE, BDD_TRUE),
            BddOp::Or => (BDD_TRUE, BDD_FALSE),
            _ => unreachable!("reduce_all is defined for and/or only"),
        };

        let mut ops: Vec<u32> = Vec::with_capacity(operands.len());
        for &f in operands {
            if f == absorbing {
                return Ok(absorbing);
            }
            if f != identity {
                ops.push(f);
            }
        }
        ops.sort_unstable_by_key(|&f| (self.table.level(f), f));
        ops.dedup();

        while ops.len() > 1 {
            let mut next = Vec::with_capacity(ops.len() / 2 + 1);
            for pair in ops.chunks(2) {
                let res = if pair.len() == 2 {
                    self.apply_rec(op, pair[0], pair[1])?
                } else {
                    pair[0]
                };
                if res == absorbing {
                    return Ok(absorbing);
                }
                self.ref_stack.push(res);
                next.push(res);
            }
            ops = next;
        }
        Ok(ops.pop().unwrap_or(identity))
    }

    /// Builds the conjunction of single-variable literals in one bottom-up
    /// pass, without recursion or caching. The literals' levels must be
    /// strictly increasing.
    pub fn and_literals(&mut self, literals: &[(u32, bool)]) -> Result<u32> {
        for &(var, _) in literals {
            self.check_var(var)?;
        }
        for window in literals.windows(2) {
            let (a, b) = (window[0].0, window[1].0);
            if self.var_to_level[a as usize] >= self.var_to_level[b as usize] {
                return Err(BddError::config(
                    "and_literals requires strictly increasing variable levels",
                ));
            }
        }
        self.guarded(|e| {
            let mut acc = BDD_TRUE;
            for &(var, positive) in literals.iter().rev() {
                let level = e.var_to_level[var as usize];
                e.ref_stack.push(acc);
                acc = if positive {
                    e.make_node(level, BDD_FALSE, acc)?
                } else {
                    e.make_node(level, acc, BDD_FALSE)?
                };
            }
            Ok(acc)
        })
    }

    /// Cube asserting that `vars` (listed MSB first) spell the binary
    /// representation of `value`.
    pub fn build_cube(&mut self, value: u64, vars: &[u32]) -> Result<u32> {
        for &var in vars {
            self.check_var(var)?;
        }
        self.guarded(|e| {
            let mut value = value;
            let mut acc = BDD_TRUE;
            for &var in vars.iter().rev() {
                let literal = if value & 1 != 0 {
                    e.var_nodes[var as usize]
                } else {
                    e.nvar_nodes[var as usize]
                };
                value >>= 1;
                e.ref_stack.push(acc);
                acc = e.apply_rec(BddOp::And, acc, literal)?;
            }
            Ok(acc)
        })
    }

    /// Variable set: conjunction of the given variables in positive form.
    pub fn make_set(&mut self, vars: &[u32]) -> Result<u32> {
        for &var in vars {
            self.check_var(var)?;
        }
        let mut sorted: Vec<u32> = vars.to_vec();
        sorted.sort_unstable_by_key(|&v| self.var_to_level[v as usize]);
        sorted.dedup();
        let literals: Vec<(u32, bool)> = sorted.into_iter().map(|v| (v, true)).collect();
        self.and_literals(&literals)
    }

    /// Cube of the variables occurring in `f`. Memoized per queried root;
    /// the memo is dropped on GC together with the operator caches.
    pub fn support(&mut self, f: u32) -> Result<u32> {
        if f <= BDD_TRUE {
            return Ok(BDD_TRUE);
        }
        if let Some(&cube) = self.support_memo.get(&f) {
            return Ok(cube);
        }

        let mut visited: HashSet<u32> = HashSet::new();
        let mut levels: Vec<u32> = Vec::new();
        let mut stack = vec![f];
        while let Some(n) = stack.pop() {
            if self.table.is_terminal(n) || !visited.insert(n) {
                continue;
            }
            levels.push(self.table.level(n));
            stack.push(self.table.low(n));
            stack.push(self.table.high(n));
        }
        levels.sort_unstable();
        levels.dedup();

        let cube = self.guarded(|e| {
            let mut acc = BDD_TRUE;
            for &level in levels.iter().rev() {
                e.ref_stack.push(acc);
                acc = e.make_node(level, BDD_FALSE, acc)?;
            }
            Ok(acc)
        })?;
        self.support_memo.insert(f, cube);
        Ok(cube)
    }
}
