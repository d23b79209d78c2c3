//! The factory: construction, configuration, variables, variadic builders,
//! pairings, statistics, and lifecycle.
//!
//! A factory owns one [`Engine`] behind `Rc<RefCell<…>>`; handles returned
//! by its operations share that engine. Factories are single-threaded and
//! independent of each other — there is no process-wide state beyond the
//! factory-id counter.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::info;

use crate::engine::{Engine, MAX_VAR_NUM};
use crate::error::{BddError, Result};
use crate::handle::Bdd;
use crate::pairing::BddPairing;
use crate::stats::{CacheStats, GcStats, ReorderStats};
use crate::types::{BDD_FALSE, BDD_TRUE};

static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(1);

/// Construction-time configuration.
///
/// ```
/// use netbdd::{BddFactory, FactoryConfig};
///
/// let config = FactoryConfig::default()
///     .with_node_num(1 << 18)
///     .with_cache_size(1 << 16)
///     .with_min_free_nodes(0.25);
/// let factory = BddFactory::with_config(config).unwrap();
/// assert!(factory.is_initialized());
/// ```
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    node_num: usize,
    cache_size: usize,
    min_free_nodes: f64,
    increase_factor: f64,
    cache_ratio: Option<f64>,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            node_num: 1 << 16,
            cache_size: 1 << 14,
            min_free_nodes: 0.20,
            increase_factor: 2.0,
            cache_ratio: None,
        }
    }
}

impl FactoryConfig {
    /// Initial node table slots.
    pub fn with_node_num(mut self, node_num: usize) -> Self {
        self.node_num = node_num;
        self
    }

    /// Operator-cache entries.
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Post-GC free fraction below which the table grows. Range `[0, 1]`,
    /// default 0.20.
    pub fn with_min_free_nodes(mut self, x: f64) -> Self {
        self.min_free_nodes = x;
        self
    }

    /// Table growth multiplier, at least 1. Default 2.
    pub fn with_increase_factor(mut self, x: f64) -> Self {
        self.increase_factor = x;
        self
    }

    /// Operator-cache entries per table slot, applied when the table grows.
    pub fn with_cache_ratio(mut self, x: f64) -> Self {
        self.cache_ratio = Some(x);
        self
    }
}

/// A BDD factory. Cloning is cheap and shares the engine.
#[derive(Clone)]
pub struct BddFactory {
    pub(crate) engine: Rc<RefCell<Engine>>,
    pub(crate) id: u64,
}

impl BddFactory {
    /// Creates a factory with the given initial node table size and
    /// operator cache size.
    pub fn init(node_num: usize, cache_size: usize) -> BddFactory {
        let id = NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed);
        BddFactory {
            engine: Rc::new(RefCell::new(Engine::new(node_num, cache_size, id))),
            id,
        }
    }

    /// Creates a factory of the implementation selected by `package`.
    ///
    /// Recognized identifiers (`"java"`, `"j"`, `"jfactory"`,
    /// `"origjfactory"`) map to the default engine; anything else falls
    /// back to the default implementation with an INFO log line.
    pub fn init_package(package: &str, node_num: usize, cache_size: usize) -> BddFactory {
        match package.to_ascii_lowercase().as_str() {
            "java" | "j" | "jfactory" | "origjfactory" => {}
            other => {
                info!(
                    "BDD package {} is not available, using the default implementation",
                    other
                );
            }
        }
        Self::init(node_num, cache_size)
    }

    pub fn with_config(config: FactoryConfig) -> Result<BddFactory> {
        let factory = Self::init(config.node_num, config.cache_size);
        {
            let mut engine = factory.engine.borrow_mut();
            engine.set_min_free_nodes(config.min_free_nodes)?;
            engine.set_increase_factor(config.increase_factor)?;
            if let Some(ratio) = config.cache_ratio {
                engine.set_cache_ratio(ratio)?;
            }
        }
        Ok(factory)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn is_initialized(&self) -> bool {
        self.engine.borrow().is_initialized()
    }

    /// Tears the factory down, freeing all storage. Handles that outlive
    /// the factory fail with [`BddError::UseAfterFree`].
    pub fn done(&self) {
        self.engine.borrow_mut().done();
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Sets the post-GC free fraction that triggers growth; returns the
    /// previous value.
    pub fn set_min_free_nodes(&self, x: f64) -> Result<f64> {
        self.engine.borrow_mut().set_min_free_nodes(x)
    }

    /// Sets the table growth multiplier; returns the previous value.
    pub fn set_increase_factor(&self, x: f64) -> Result<f64> {
        self.engine.borrow_mut().set_increase_factor(x)
    }

    /// Sets the operator-cache entries per table slot used on growth;
    /// returns the previous ratio, if one was set.
    pub fn set_cache_ratio(&self, x: f64) -> Result<Option<f64>> {
        self.engine.borrow_mut().set_cache_ratio(x)
    }

    /// Grows the node table to at least `n` slots; returns the previous
    /// size. Never shrinks.
    pub fn set_node_table_size(&self, n: usize) -> Result<usize> {
        self.engine.borrow_mut().set_node_table_size(n)
    }

    /// Resizes the operator caches; returns the previous size.
    pub fn set_cache_size(&self, n: usize) -> Result<usize> {
        self.engine.borrow_mut().set_cache_size(n)
    }

    /// Installs a garbage-collection report handler, replacing the default
    /// INFO-level log line.
    pub fn set_gc_handler(&self, handler: impl Fn(&GcStats) + 'static) {
        self.engine
            .borrow_mut()
            .set_gc_handler(Some(Box::new(handler)));
    }

    /// Restores the default logging GC handler.
    pub fn default_gc_handler(&self) {
        self.engine.borrow_mut().set_gc_handler(None);
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    /// Number of declared variables.
    pub fn var_num(&self) -> usize {
        self.engine.borrow().var_num()
    }

    /// Declares variables `0..num`. May only grow; returns the previous
    /// count.
    pub fn set_var_num(&self, num: usize) -> Result<usize> {
        self.engine.borrow_mut().set_var_num(num)
    }

    /// Declares `num` additional variables; returns the first new variable.
    pub fn ext_var_num(&self, num: usize) -> Result<usize> {
        if num > MAX_VAR_NUM {
            return Err(BddError::config(format!("cannot add {} variables", num)));
        }
        let mut engine = self.engine.borrow_mut();
        let start = engine.var_num();
        engine.set_var_num(start + num)?;
        Ok(start)
    }

    /// The positive literal of variable `var`.
    pub fn ith_var(&self, var: u32) -> Result<Bdd> {
        self.node_op(|engine| engine.ith_var(var))
    }

    /// The negative literal of variable `var`.
    pub fn nith_var(&self, var: u32) -> Result<Bdd> {
        self.node_op(|engine| engine.nith_var(var))
    }

    pub fn level2var(&self, level: u32) -> Result<u32> {
        self.engine.borrow().level2var(level)
    }

    pub fn var2level(&self, var: u32) -> Result<u32> {
        self.engine.borrow().var2level(var)
    }

    /// The current variable order: variable numbers indexed by level.
    pub fn get_var_order(&self) -> Vec<u32> {
        let engine = self.engine.borrow();
        (0..engine.var_num() as u32)
            .map(|level| engine.level2var(level).unwrap_or(level))
            .collect()
    }

    // ------------------------------------------------------------------
    // Constants and builders
    // ------------------------------------------------------------------

    /// The constant FALSE.
    pub fn zero(&self) -> Bdd {
        self.wrap_terminal(BDD_FALSE)
    }

    /// The constant TRUE.
    pub fn one(&self) -> Bdd {
        self.wrap_terminal(BDD_TRUE)
    }

    fn wrap_terminal(&self, root: u32) -> Bdd {
        let epoch = self.engine.borrow().epoch;
        Bdd::from_raw(self.engine.clone(), self.id, epoch, root)
    }

    fn node_op(&self, body: impl FnOnce(&mut Engine) -> Result<u32>) -> Result<Bdd> {
        let (root, epoch) = {
            let mut engine = self.engine.borrow_mut();
            engine.check_alive()?;
            let root = body(&mut engine)?;
            engine.acquire(root);
            (root, engine.epoch)
        };
        Ok(Bdd::from_raw(self.engine.clone(), self.id, epoch, root))
    }

    fn roots_of(&self, operands: &[&Bdd]) -> Result<Vec<u32>> {
        let engine = self.engine.borrow();
        let mut roots = Vec::with_capacity(operands.len());
        for bdd in operands {
            if bdd.factory_id != self.id {
                return Err(BddError::CrossFactory);
            }
            engine.check_epoch(bdd.epoch)?;
            roots.push(bdd.root);
        }
        Ok(roots)
    }

    /// Conjunction of zero or more BDDs; `and_all(&[])` is TRUE. More
    /// efficient than folding `and` over the operands, because fewer and
    /// smaller intermediate results are built.
    pub fn and_all(&self, operands: &[&Bdd]) -> Result<Bdd> {
        let roots = self.roots_of(operands)?;
        self.node_op(|engine| engine.and_all(&roots))
    }

    /// Like [`BddFactory::and_all`], and frees the operands once the result
    /// exists.
    pub fn and_all_free(&self, operands: Vec<Bdd>) -> Result<Bdd> {
        let refs: Vec<&Bdd> = operands.iter().collect();
        let result = self.and_all(&refs)?;
        drop(refs);
        drop(operands);
        Ok(result)
    }

    /// Disjunction of zero or more BDDs; `or_all(&[])` is FALSE.
    pub fn or_all(&self, operands: &[&Bdd]) -> Result<Bdd> {
        let roots = self.roots_of(operands)?;
        self.node_op(|engine| engine.or_all(&roots))
    }

    /// Like [`BddFactory::or_all`], and frees the operands once the result
    /// exists.
    pub fn or_all_free(&self, operands: Vec<Bdd>) -> Result<Bdd> {
        let refs: Vec<&Bdd> = operands.iter().collect();
        let result = self.or_all(&refs)?;
        drop(refs);
        drop(operands);
        Ok(result)
    }

    /// Conjunction of single-variable literals whose levels are strictly
    /// increasing. Built in one bottom-up pass, without recursion or
    /// caching.
    pub fn and_literals(&self, literals: &[&Bdd]) -> Result<Bdd> {
        let pairs = {
            let engine = self.engine.borrow();
            let mut pairs = Vec::with_capacity(literals.len());
            for bdd in literals {
                if bdd.factory_id != self.id {
                    return Err(BddError::CrossFactory);
                }
                engine.check_epoch(bdd.epoch)?;
                let n = bdd.root;
                if engine.is_terminal(n) {
                    return Err(BddError::config("and_literals expects variable literals"));
                }
                let (low, high) = (engine.low(n), engine.high(n));
                let positive = if low == BDD_FALSE && high == BDD_TRUE {
                    true
                } else if low == BDD_TRUE && high == BDD_FALSE {
                    false
                } else {
                    return Err(BddError::config("and_literals expects variable literals"));
                };
                pairs.push((engine.var_of(n), positive));
            }
            pairs
        };
        self.and_literal_pairs(&pairs)
    }

    pub(crate) fn and_literal_pairs(&self, literals: &[(u32, bool)]) -> Result<Bdd> {
        self.node_op(|engine| engine.and_literals(literals))
    }

    /// Cube asserting that `vars` (listed MSB first) spell the binary
    /// representation of `value`.
    pub fn build_cube(&self, value: u64, vars: &[u32]) -> Result<Bdd> {
        self.node_op(|engine| engine.build_cube(value, vars))
    }

    /// Variable set: the conjunction of the given variables in positive
    /// form.
    pub fn make_set(&self, vars: &[u32]) -> Result<Bdd> {
        self.node_op(|engine| engine.make_set(vars))
    }

    // ------------------------------------------------------------------
    // Pairings
    // ------------------------------------------------------------------

    /// A fresh, mutable pairing.
    pub fn make_pair(&self) -> BddPairing {
        let epoch = self.engine.borrow().epoch;
        BddPairing::new(self.engine.clone(), self.id, epoch)
    }

    /// An installed pairing mapping each `(old, new)` variable pair.
    /// Interned: equal pair sets return the same canonical identity, which
    /// keeps the replace cache shared between them.
    pub fn get_pair(&self, pairs: &[(u32, u32)]) -> Result<BddPairing> {
        if pairs.is_empty() {
            return Err(BddError::config("get_pair needs at least one pair"));
        }
        let pairing = self.make_pair();
        for &(old, new) in pairs {
            pairing.set(old, new)?;
        }
        pairing.freeze_and_install()?;
        Ok(pairing)
    }

    // ------------------------------------------------------------------
    // Statistics and maintenance
    // ------------------------------------------------------------------

    /// Allocated node table slots (live and free).
    pub fn get_node_table_size(&self) -> usize {
        self.engine.borrow().node_table_size()
    }

    /// Occupied node slots. Dead nodes count until the next collection.
    pub fn get_node_num(&self) -> usize {
        self.engine.borrow().node_num()
    }

    /// Operator cache entries.
    pub fn get_cache_size(&self) -> usize {
        self.engine.borrow().cache_size()
    }

    /// Forces a garbage collection. No-op on a torn-down factory.
    pub fn gc(&self) {
        let mut engine = self.engine.borrow_mut();
        if engine.is_initialized() {
            engine.collect_garbage();
        }
    }

    pub fn gc_stats(&self) -> GcStats {
        self.engine.borrow().gc_stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.engine.borrow().cache_stats()
    }

    /// Reordering counters. Reordering itself is not implemented; the
    /// surface exists for instrumented builds.
    pub fn reorder_stats(&self) -> ReorderStats {
        self.engine.borrow().reorder_stats()
    }

    /// Logs the cache statistics report at INFO level.
    pub fn print_stat(&self) {
        info!("{}", self.cache_stats());
    }

    /// Structural self-check of the node table. Intended for tests and
    /// diagnostics.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        self.engine.borrow().check_consistency()
    }
}

impl std::fmt::Debug for BddFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BddFactory")
            .field("id", &self.id)
            .field("node_table_size", &self.get_node_table_size())
            .field("var_num", &self.var_num())
            .finish()
    }
}
