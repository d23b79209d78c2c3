//! Error taxonomy for factory and handle operations.
//!
//! The engine never silently clamps or continues: misuse is reported to the
//! caller through [`BddError`]. Garbage collection and table growth are
//! internal and retried automatically; the only allocation failure that
//! reaches the caller is [`BddError::OutOfMemory`], after which the factory
//! itself remains usable.

use std::error::Error;
use std::fmt;

pub type Result<T> = std::result::Result<T, BddError>;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum BddError {
    /// Invalid configuration or argument: bad variable number, decreased
    /// `var_num`, bad cache ratio, mismatched batch lengths, non-cube
    /// argument, and the like.
    Config(String),
    /// Operation on a handle whose factory has been torn down (or reset);
    /// detected via the epoch tag carried by every handle.
    UseAfterFree,
    /// Operands belong to different factories. Fatal to the operation, not
    /// to either factory.
    CrossFactory,
    /// The node table cannot grow any further. The failed operation is
    /// aborted; the factory stays usable.
    OutOfMemory,
    /// `set` on a pairing that has already been frozen and installed.
    FrozenPairing,
}

impl fmt::Display for BddError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BddError::Config(msg) => write!(f, "configuration error: {}", msg),
            BddError::UseAfterFree => write!(f, "operation on a handle from a torn-down factory"),
            BddError::CrossFactory => write!(f, "operands belong to different factories"),
            BddError::OutOfMemory => write!(f, "node table cannot grow any further"),
            BddError::FrozenPairing => write!(f, "cannot mutate an installed pairing"),
        }
    }
}

impl Error for BddError {}

impl BddError {
    pub(crate) fn config(msg: impl Into<String>) -> BddError {
        BddError::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = BddError::config("variable count may only grow");
        assert_eq!(e.to_string(), "configuration error: variable count may only grow");
        assert!(BddError::OutOfMemory.to_string().contains("grow"));
    }
}
