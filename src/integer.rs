//! Unsigned integers encoded over BDD variables.
//!
//! A [`BddInteger`] is an ordered sequence of variables, most significant
//! bit first, read as an unsigned integer. All predicates are plain BDDs
//! over those variables — there is no arithmetic, only constant tests and
//! interval membership, which is what packet-field matching needs (ports,
//! lengths, ICMP codes and the like differ only in which variables they
//! bind).

use crate::error::{BddError, Result};
use crate::factory::BddFactory;
use crate::handle::Bdd;

/// Widest representable integer; values are carried as `u64`.
const MAX_WIDTH: usize = 64;

#[derive(Clone)]
pub struct BddInteger {
    factory: BddFactory,
    /// Variable numbers, MSB first.
    vars: Vec<u32>,
}

impl BddInteger {
    /// Allocates `width` fresh variables at the end of the current order.
    pub fn new(factory: &BddFactory, width: usize) -> Result<BddInteger> {
        if width == 0 || width > MAX_WIDTH {
            return Err(BddError::config(format!(
                "integer width must be within 1..={}, got {}",
                MAX_WIDTH, width
            )));
        }
        let start = factory.ext_var_num(width)? as u32;
        let vars = (start..start + width as u32).collect();
        Ok(BddInteger {
            factory: factory.clone(),
            vars,
        })
    }

    /// Binds existing variables (MSB first). This is how field-specific
    /// integers are laid over a packet encoding.
    pub fn with_vars(factory: &BddFactory, vars: Vec<u32>) -> Result<BddInteger> {
        if vars.is_empty() || vars.len() > MAX_WIDTH {
            return Err(BddError::config(format!(
                "integer width must be within 1..={}, got {}",
                MAX_WIDTH,
                vars.len()
            )));
        }
        for &var in &vars {
            // Probe the range; the factory reports unknown variables.
            factory.var2level(var)?;
        }
        let mut distinct = vars.clone();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() != vars.len() {
            return Err(BddError::config("integer variables must be distinct"));
        }
        Ok(BddInteger {
            factory: factory.clone(),
            vars,
        })
    }

    pub fn width(&self) -> usize {
        self.vars.len()
    }

    /// Variable numbers, MSB first.
    pub fn vars(&self) -> &[u32] {
        &self.vars
    }

    fn check_value(&self, value: u64) -> Result<()> {
        if self.width() < 64 && value >> self.width() != 0 {
            return Err(BddError::config(format!(
                "value {} does not fit in {} bits",
                value,
                self.width()
            )));
        }
        Ok(())
    }

    fn bit(&self, value: u64, msb_index: usize) -> bool {
        value >> (self.width() - 1 - msb_index) & 1 != 0
    }

    /// The BDD asserting equality with `value`.
    pub fn value(&self, value: u64) -> Result<Bdd> {
        self.check_value(value)?;
        let mut literals: Vec<(u32, bool)> = self
            .vars
            .iter()
            .enumerate()
            .map(|(i, &var)| (var, self.bit(value, i)))
            .collect();
        let level_of = |var: u32| self.factory.var2level(var).unwrap_or(var);
        literals.sort_unstable_by_key(|&(var, _)| level_of(var));
        self.factory.and_literal_pairs(&literals)
    }

    /// The BDD asserting `>= value`.
    ///
    /// Built bottom-up from the least significant bit: a set constant bit
    /// constrains, a clear one releases.
    pub fn geq(&self, value: u64) -> Result<Bdd> {
        self.check_value(value)?;
        let mut acc = self.factory.one();
        for (i, &var) in self.vars.iter().enumerate().rev() {
            let bit = self.factory.ith_var(var)?;
            acc = if self.bit(value, i) {
                bit.and_with(acc)?
            } else {
                bit.or_with(acc)?
            };
        }
        Ok(acc)
    }

    /// The BDD asserting `<= value`.
    pub fn leq(&self, value: u64) -> Result<Bdd> {
        self.check_value(value)?;
        let mut acc = self.factory.one();
        for (i, &var) in self.vars.iter().enumerate().rev() {
            let nbit = self.factory.nith_var(var)?;
            acc = if self.bit(value, i) {
                nbit.or_with(acc)?
            } else {
                nbit.and_with(acc)?
            };
        }
        Ok(acc)
    }

    /// Interval membership: `range(a, b) = geq(a) ∧ leq(b)`.
    pub fn range(&self, low: u64, high: u64) -> Result<Bdd> {
        if low > high {
            return Err(BddError::config(format!(
                "empty range: {} > {}",
                low, high
            )));
        }
        self.geq(low)?.and_with(self.leq(high)?)
    }

    /// A concrete value satisfying `f`, or `None` when `f` is FALSE.
    /// Bits left unconstrained by the assignment read as zero.
    pub fn value_satisfying(&self, f: &Bdd) -> Result<Option<u64>> {
        let cube = f.sat_one()?;
        if cube.is_zero() {
            return Ok(None);
        }
        let literals = cube.cube_literals()?;
        let mut value = 0u64;
        for (i, &var) in self.vars.iter().enumerate() {
            let set = literals
                .iter()
                .find(|&&(v, _)| v == var)
                .map(|&(_, positive)| positive)
                .unwrap_or(false);
            if set {
                value |= 1 << (self.width() - 1 - i);
            }
        }
        Ok(Some(value))
    }
}

impl std::fmt::Debug for BddInteger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BddInteger")
            .field("width", &self.width())
            .field("vars", &self.vars)
            .finish()
    }
}
