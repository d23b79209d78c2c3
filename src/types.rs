//! Operator codes and terminal constants.

use std::fmt;

/// Node index of the constant FALSE terminal.
pub(crate) const BDD_FALSE: u32 = 0;
/// Node index of the constant TRUE terminal.
pub(crate) const BDD_TRUE: u32 = 1;

/// Binary Boolean operators with their stable integer codes.
///
/// The codes are part of the external contract (they appear in tooling and
/// logs) and must not be renumbered.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum BddOp {
    And = 0,
    Xor = 1,
    Or = 2,
    Nand = 3,
    Nor = 4,
    Imp = 5,
    Biimp = 6,
    /// Set difference: `f ∧ ¬g`.
    Diff = 7,
    /// Less-than: `¬f ∧ g`.
    Less = 8,
    /// Inverse implication: `f ∨ ¬g`.
    Invimp = 9,
}

impl BddOp {
    /// Looks up an operator by its stable integer code.
    pub fn from_id(id: u8) -> Option<BddOp> {
        match id {
            0 => Some(BddOp::And),
            1 => Some(BddOp::Xor),
            2 => Some(BddOp::Or),
            3 => Some(BddOp::Nand),
            4 => Some(BddOp::Nor),
            5 => Some(BddOp::Imp),
            6 => Some(BddOp::Biimp),
            7 => Some(BddOp::Diff),
            8 => Some(BddOp::Less),
            9 => Some(BddOp::Invimp),
            _ => None,
        }
    }

    /// The stable integer code of this operator.
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            BddOp::And => "and",
            BddOp::Xor => "xor",
            BddOp::Or => "or",
            BddOp::Nand => "nand",
            BddOp::Nor => "nor",
            BddOp::Imp => "imp",
            BddOp::Biimp => "biimp",
            BddOp::Diff => "diff",
            BddOp::Less => "less",
            BddOp::Invimp => "invimp",
        }
    }

    /// Evaluates the operator on two constants.
    pub(crate) fn eval(self, a: bool, b: bool) -> bool {
        match self {
            BddOp::And => a && b,
            BddOp::Xor => a != b,
            BddOp::Or => a || b,
            BddOp::Nand => !(a && b),
            BddOp::Nor => !(a || b),
            BddOp::Imp => !a || b,
            BddOp::Biimp => a == b,
            BddOp::Diff => a && !b,
            BddOp::Less => !a && b,
            BddOp::Invimp => a || !b,
        }
    }

    /// Whether operands can be swapped without changing the result.
    /// Commutative operators canonicalize their cache key by ordering the
    /// operand indices.
    pub(crate) fn is_commutative(self) -> bool {
        matches!(
            self,
            BddOp::And | BddOp::Xor | BddOp::Or | BddOp::Nand | BddOp::Nor | BddOp::Biimp
        )
    }
}

impl fmt::Display for BddOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_ids_stable() {
        assert_eq!(BddOp::And.id(), 0);
        assert_eq!(BddOp::Xor.id(), 1);
        assert_eq!(BddOp::Or.id(), 2);
        assert_eq!(BddOp::Nand.id(), 3);
        assert_eq!(BddOp::Nor.id(), 4);
        assert_eq!(BddOp::Imp.id(), 5);
        assert_eq!(BddOp::Biimp.id(), 6);
        assert_eq!(BddOp::Diff.id(), 7);
        assert_eq!(BddOp::Less.id(), 8);
        assert_eq!(BddOp::Invimp.id(), 9);
    }

    #[test]
    fn test_op_roundtrip() {
        for id in 0..10 {
            let op = BddOp::from_id(id).unwrap();
            assert_eq!(op.id(), id);
        }
        assert_eq!(BddOp::from_id(10), None);
    }

    #[test]
    fn test_eval_tables() {
        assert!(BddOp::Imp.eval(false, false));
        assert!(BddOp::Imp.eval(false, true));
        assert!(!BddOp::Imp.eval(true, false));
        assert!(BddOp::Imp.eval(true, true));

        assert!(BddOp::Diff.eval(true, false));
        assert!(!BddOp::Diff.eval(true, true));
        assert!(BddOp::Less.eval(false, true));
        assert!(!BddOp::Less.eval(true, true));
        assert!(BddOp::Invimp.eval(false, false));
        assert!(!BddOp::Invimp.eval(false, true));
    }

    #[test]
    fn test_commutativity_matches_eval() {
        for id in 0..10 {
            let op = BddOp::from_id(id).unwrap();
            let symmetric = (0..4).all(|bits| {
                let (a, b) = (bits & 1 != 0, bits & 2 != 0);
                op.eval(a, b) == op.eval(b, a)
            });
            assert_eq!(op.is_commutative(), symmetric, "op {}", op);
        }
    }
}
