//! Owning handles to BDD roots.
//!
//! A [`Bdd`] owns one external reference to its root node: while the handle
//! is alive, the root (and everything reachable from it) survives garbage
//! collection. Dropping the handle releases the reference; [`Bdd::free`] is
//! the explicit spelling, [`Bdd::id`] (or `clone`) acquires another one.
//!
//! Handles carry a `(factory-id, epoch, node-index)` triple. Mixing handles
//! from different factories fails with [`BddError::CrossFactory`]; using a
//! handle after its factory was torn down fails with
//! [`BddError::UseAfterFree`].
//!
//! The `*_with` family models destructive update: both operands are
//! consumed and released once the result exists.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use num_bigint::BigUint;

use crate::engine::Engine;
use crate::error::{BddError, Result};
use crate::pairing::BddPairing;
use crate::types::{BddOp, BDD_FALSE, BDD_TRUE};

pub struct Bdd {
    pub(crate) engine: Rc<RefCell<Engine>>,
    pub(crate) factory_id: u64,
    pub(crate) epoch: u32,
    pub(crate) root: u32,
}

impl Bdd {
    /// Wraps a root whose reference has already been acquired.
    pub(crate) fn from_raw(
        engine: Rc<RefCell<Engine>>,
        factory_id: u64,
        epoch: u32,
        root: u32,
    ) -> Bdd {
        Bdd {
            engine,
            factory_id,
            epoch,
            root,
        }
    }

    fn with_engine<T>(&self, body: impl FnOnce(&mut Engine) -> Result<T>) -> Result<T> {
        let mut engine = self.engine.borrow_mut();
        engine.check_epoch(self.epoch)?;
        body(&mut engine)
    }

    /// Runs an engine operation producing a node and wraps it in a fresh
    /// handle holding its own reference.
    fn node_op(&self, body: impl FnOnce(&mut Engine) -> Result<u32>) -> Result<Bdd> {
        let root = self.with_engine(|engine| {
            let root = body(engine)?;
            engine.acquire(root);
            Ok(root)
        })?;
        Ok(Bdd::from_raw(
            self.engine.clone(),
            self.factory_id,
            self.epoch,
            root,
        ))
    }

    fn check_same_factory(&self, other: &Bdd) -> Result<()> {
        if self.factory_id != other.factory_id {
            return Err(BddError::CrossFactory);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Predicates and accessors
    // ------------------------------------------------------------------

    pub fn is_zero(&self) -> bool {
        self.root == BDD_FALSE
    }

    pub fn is_one(&self) -> bool {
        self.root == BDD_TRUE
    }

    pub fn is_terminal(&self) -> bool {
        self.root <= BDD_TRUE
    }

    /// Variable at the root node. Terminals have no variable.
    pub fn var(&self) -> Result<u32> {
        self.with_engine(|engine| {
            if engine.is_terminal(self.root) {
                return Err(BddError::config("terminal node has no variable"));
            }
            Ok(engine.var_of(self.root))
        })
    }

    /// The low (false) cofactor at the root.
    pub fn low(&self) -> Result<Bdd> {
        self.node_op(|engine| {
            if engine.is_terminal(self.root) {
                return Err(BddError::config("terminal node has no cofactors"));
            }
            Ok(engine.low(self.root))
        })
    }

    /// The high (true) cofactor at the root.
    pub fn high(&self) -> Result<Bdd> {
        self.node_op(|engine| {
            if engine.is_terminal(self.root) {
                return Err(BddError::config("terminal node has no cofactors"));
            }
            Ok(engine.high(self.root))
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Clones the handle, acquiring another reference on the root.
    pub fn id(&self) -> Bdd {
        self.clone()
    }

    /// Releases the handle. Dropping it has the same effect; this spelling
    /// exists for call sites that want the release to be visible.
    pub fn free(self) {
        drop(self);
    }

    // ------------------------------------------------------------------
    // Boolean operations (non-consuming)
    // ------------------------------------------------------------------

    pub fn apply(&self, other: &Bdd, op: BddOp) -> Result<Bdd> {
        self.check_same_factory(other)?;
        self.node_op(|engine| engine.apply(op, self.root, other.root))
    }

    pub fn and(&self, other: &Bdd) -> Result<Bdd> {
        self.apply(other, BddOp::And)
    }

    pub fn or(&self, other: &Bdd) -> Result<Bdd> {
        self.apply(other, BddOp::Or)
    }

    pub fn xor(&self, other: &Bdd) -> Result<Bdd> {
        self.apply(other, BddOp::Xor)
    }

    pub fn imp(&self, other: &Bdd) -> Result<Bdd> {
        self.apply(other, BddOp::Imp)
    }

    pub fn biimp(&self, other: &Bdd) -> Result<Bdd> {
        self.apply(other, BddOp::Biimp)
    }

    /// Set difference: `self ∧ ¬other`.
    pub fn diff(&self, other: &Bdd) -> Result<Bdd> {
        self.apply(other, BddOp::Diff)
    }

    pub fn not(&self) -> Result<Bdd> {
        self.node_op(|engine| engine.not(self.root))
    }

    /// If-then-else with `self` as the condition.
    pub fn ite(&self, then: &Bdd, otherwise: &Bdd) -> Result<Bdd> {
        self.check_same_factory(then)?;
        self.check_same_factory(otherwise)?;
        self.node_op(|engine| engine.ite(self.root, then.root, otherwise.root))
    }

    // ------------------------------------------------------------------
    // Boolean operations (consuming)
    // ------------------------------------------------------------------

    /// Applies `op` and consumes both operands.
    pub fn apply_with(self, other: Bdd, op: BddOp) -> Result<Bdd> {
        self.apply(&other, op)
    }

    pub fn and_with(self, other: Bdd) -> Result<Bdd> {
        self.apply_with(other, BddOp::And)
    }

    pub fn or_with(self, other: Bdd) -> Result<Bdd> {
        self.apply_with(other, BddOp::Or)
    }

    pub fn xor_with(self, other: Bdd) -> Result<Bdd> {
        self.apply_with(other, BddOp::Xor)
    }

    pub fn imp_with(self, other: Bdd) -> Result<Bdd> {
        self.apply_with(other, BddOp::Imp)
    }

    pub fn biimp_with(self, other: Bdd) -> Result<Bdd> {
        self.apply_with(other, BddOp::Biimp)
    }

    pub fn diff_with(self, other: Bdd) -> Result<Bdd> {
        self.apply_with(other, BddOp::Diff)
    }

    // ------------------------------------------------------------------
    // Quantification and substitution
    // ------------------------------------------------------------------

    /// Existential quantification over the variables of `cube`.
    pub fn exist(&self, cube: &Bdd) -> Result<Bdd> {
        self.check_same_factory(cube)?;
        self.node_op(|engine| engine.exist(self.root, cube.root))
    }

    /// Universal quantification over the variables of `cube`.
    pub fn forall(&self, cube: &Bdd) -> Result<Bdd> {
        self.check_same_factory(cube)?;
        self.node_op(|engine| engine.forall(self.root, cube.root))
    }

    /// Fused `exist(self ∧ other, cube)`.
    pub fn relprod(&self, other: &Bdd, cube: &Bdd) -> Result<Bdd> {
        self.check_same_factory(other)?;
        self.check_same_factory(cube)?;
        self.node_op(|engine| engine.relprod(self.root, other.root, cube.root))
    }

    /// Fixes the variables named by `cube` to their polarity in the cube.
    pub fn restrict(&self, cube: &Bdd) -> Result<Bdd> {
        self.check_same_factory(cube)?;
        self.node_op(|engine| engine.restrict(self.root, cube.root))
    }

    /// Substitutes `g` for variable `var`.
    pub fn compose(&self, var: u32, g: &Bdd) -> Result<Bdd> {
        self.check_same_factory(g)?;
        self.node_op(|engine| engine.compose(self.root, var, g.root))
    }

    /// Renames variables according to an installed pairing.
    pub fn replace(&self, pairing: &BddPairing) -> Result<Bdd> {
        if self.factory_id != pairing.factory_id() {
            return Err(BddError::CrossFactory);
        }
        let pair_id = pairing.installed_id()?;
        self.node_op(|engine| engine.replace(self.root, pair_id))
    }

    // ------------------------------------------------------------------
    // Analysis
    // ------------------------------------------------------------------

    /// Cube of the variables occurring in this BDD.
    pub fn support(&self) -> Result<Bdd> {
        self.node_op(|engine| engine.support(self.root))
    }

    /// One satisfying assignment as a cube (FALSE when unsatisfiable).
    pub fn sat_one(&self) -> Result<Bdd> {
        self.node_op(|engine| engine.sat_one(self.root))
    }

    /// Number of satisfying assignments over all declared variables.
    pub fn sat_count(&self) -> Result<BigUint> {
        self.with_engine(|engine| Ok(engine.sat_count(self.root)))
    }

    /// Number of distinct paths to the TRUE terminal.
    pub fn path_count(&self) -> Result<BigUint> {
        self.with_engine(|engine| Ok(engine.path_count(self.root)))
    }

    /// Number of distinct internal nodes in this BDD.
    pub fn node_count(&self) -> Result<usize> {
        self.with_engine(|engine| Ok(engine.node_count(&[self.root])))
    }

    /// Literals of a cube as `(variable, polarity)` pairs, in level order.
    /// Fails if this BDD is not a cube.
    pub(crate) fn cube_literals(&self) -> Result<Vec<(u32, bool)>> {
        self.with_engine(|engine| {
            let mut literals = Vec::new();
            let mut n = self.root;
            while n > BDD_TRUE {
                let (low, high) = (engine.low(n), engine.high(n));
                if low != BDD_FALSE && high != BDD_FALSE {
                    return Err(BddError::config("not a cube"));
                }
                let var = engine.var_of(n);
                if high != BDD_FALSE {
                    literals.push((var, true));
                    n = high;
                } else {
                    literals.push((var, false));
                    n = low;
                }
            }
            Ok(literals)
        })
    }
}

impl Clone for Bdd {
    fn clone(&self) -> Bdd {
        if let Ok(mut engine) = self.engine.try_borrow_mut() {
            if engine.check_epoch(self.epoch).is_ok() {
                engine.acquire(self.root);
            }
        }
        Bdd {
            engine: self.engine.clone(),
            factory_id: self.factory_id,
            epoch: self.epoch,
            root: self.root,
        }
    }
}

impl Drop for Bdd {
    fn drop(&mut self) {
        // A failed borrow or a stale epoch means the factory is mid-call or
        // torn down; either way there is nothing to release.
        if let Ok(mut engine) = self.engine.try_borrow_mut() {
            if engine.check_epoch(self.epoch).is_ok() {
                engine.release(self.root);
            }
        }
    }
}

/// Equality is node identity; by canonicity this is semantic equality for
/// handles of the same factory epoch.
impl PartialEq for Bdd {
    fn eq(&self, other: &Bdd) -> bool {
        self.factory_id == other.factory_id && self.epoch == other.epoch && self.root == other.root
    }
}

impl Eq for Bdd {}

impl Hash for Bdd {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.factory_id.hash(state);
        self.epoch.hash(state);
        self.root.hash(state);
    }
}

impl fmt::Debug for Bdd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bdd(@{})", self.root)
    }
}

#[cfg(test)]
mod tests {
    use crate::factory::BddFactory;
    use crate::types::BddOp;
    use crate::error::BddError;

    fn factory(vars: usize) -> BddFactory {
        let factory = BddFactory::init(1 << 12, 1 << 10);
        factory.set_var_num(vars).unwrap();
        factory
    }

    #[test]
    fn test_terminals() {
        let factory = factory(2);
        assert!(factory.zero().is_zero());
        assert!(factory.one().is_one());
        assert_ne!(factory.zero(), factory.one());
    }

    #[test]
    fn test_basic_laws() {
        let factory = factory(3);
        let x = factory.ith_var(0).unwrap();
        let y = factory.ith_var(1).unwrap();

        let not_x = x.not().unwrap();
        assert_eq!(x.and(&not_x).unwrap(), factory.zero());
        assert_eq!(x.or(&not_x).unwrap(), factory.one());
        assert_eq!(not_x.not().unwrap(), x);

        // Commutativity through the shared cache key.
        assert_eq!(x.and(&y).unwrap(), y.and(&x).unwrap());
        assert_eq!(x.xor(&y).unwrap(), y.xor(&x).unwrap());

        // xor against TRUE is negation.
        assert_eq!(x.xor(&factory.one()).unwrap(), not_x);
    }

    #[test]
    fn test_apply_op_codes() {
        let factory = factory(2);
        let x = factory.ith_var(0).unwrap();
        let y = factory.ith_var(1).unwrap();

        let nand = x.apply(&y, BddOp::Nand).unwrap();
        assert_eq!(nand, x.and(&y).unwrap().not().unwrap());

        let nor = x.apply(&y, BddOp::Nor).unwrap();
        assert_eq!(nor, x.or(&y).unwrap().not().unwrap());

        let less = x.apply(&y, BddOp::Less).unwrap();
        assert_eq!(less, y.diff(&x).unwrap());

        let invimp = x.apply(&y, BddOp::Invimp).unwrap();
        assert_eq!(invimp, y.imp(&x).unwrap());
    }

    #[test]
    fn test_ite_terminal_rules() {
        let factory = factory(3);
        let g = factory.ith_var(1).unwrap();
        let h = factory.ith_var(2).unwrap();

        assert_eq!(factory.one().ite(&g, &h).unwrap(), g);
        assert_eq!(factory.zero().ite(&g, &h).unwrap(), h);

        let f = factory.ith_var(0).unwrap();
        assert_eq!(f.ite(&g, &g).unwrap(), g);
        assert_eq!(f.ite(&factory.one(), &factory.zero()).unwrap(), f);
        assert_eq!(
            f.ite(&factory.zero(), &factory.one()).unwrap(),
            f.not().unwrap()
        );

        // ite(f, g, h) == (f ∧ g) ∨ (¬f ∧ h)
        let expanded = f
            .and(&g)
            .unwrap()
            .or_with(f.not().unwrap().and_with(h.id()).unwrap())
            .unwrap();
        assert_eq!(f.ite(&g, &h).unwrap(), expanded);
    }

    #[test]
    fn test_with_variants_consume() {
        let factory = factory(2);
        let x = factory.ith_var(0).unwrap();
        let y = factory.ith_var(1).unwrap();

        let product = x.id().and_with(y.id()).unwrap();
        assert_eq!(product, x.and(&y).unwrap());
    }

    #[test]
    fn test_id_and_free_refcounts() {
        let factory = factory(2);
        let x = factory.ith_var(0).unwrap();
        let y = factory.ith_var(1).unwrap();
        let f = x.and(&y).unwrap();
        let root = f.root;

        {
            let engine = factory.engine.borrow();
            assert_eq!(engine.ref_count(root), 1);
        }

        let g = f.id();
        {
            let engine = factory.engine.borrow();
            assert_eq!(engine.ref_count(root), 2);
        }

        g.free();
        f.free();
        {
            let engine = factory.engine.borrow();
            assert_eq!(engine.ref_count(root), 0);
        }
    }

    #[test]
    fn test_cross_factory_rejected() {
        let f1 = factory(2);
        let f2 = factory(2);
        let x = f1.ith_var(0).unwrap();
        let y = f2.ith_var(0).unwrap();
        assert_eq!(x.and(&y).unwrap_err(), BddError::CrossFactory);
    }

    #[test]
    fn test_use_after_done() {
        let factory = factory(2);
        let x = factory.ith_var(0).unwrap();
        factory.done();
        assert_eq!(x.not().unwrap_err(), BddError::UseAfterFree);
        assert_eq!(x.sat_count().unwrap_err(), BddError::UseAfterFree);
    }

    #[test]
    fn test_cofactor_accessors() {
        let factory = factory(2);
        let x = factory.ith_var(0).unwrap();
        let y = factory.ith_var(1).unwrap();
        let f = x.and(&y).unwrap();

        assert_eq!(f.var().unwrap(), 0);
        assert_eq!(f.low().unwrap(), factory.zero());
        assert_eq!(f.high().unwrap(), y);
        assert!(factory.one().var().is_err());
    }

    #[test]
    fn test_support() {
        let factory = factory(4);
        let x = factory.ith_var(0).unwrap();
        let z = factory.ith_var(2).unwrap();
        let f = x.and(&z).unwrap().or(&x).unwrap();

        // f collapses to x, so only x remains in the support.
        assert_eq!(f.support().unwrap(), factory.make_set(&[0]).unwrap());

        let g = x.xor(&z).unwrap();
        assert_eq!(g.support().unwrap(), factory.make_set(&[0, 2]).unwrap());
    }
}
