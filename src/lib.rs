//! # netbdd: a garbage-collected BDD engine
//!
//! **`netbdd`** is a reference-counted, garbage-collected library for
//! **Binary Decision Diagrams (BDDs)**, built as the symbolic core of a
//! network packet-space analyzer: packet fields become bit-vector
//! variables, and large constraint conjunctions are composed through
//! Boolean operators. The engine is sized for millions of nodes with low
//! amortized cost per operation.
//!
//! ## What is a BDD?
//!
//! A Binary Decision Diagram represents a Boolean function as a directed
//! acyclic graph. For a fixed variable ordering the representation is
//! **canonical** --- every function has exactly one reduced form --- which
//! turns equivalence, satisfiability, and validity checks into pointer
//! comparisons.
//!
//! ## Key Features
//!
//! - **Factory-centric architecture**: all operations go through a
//!   [`BddFactory`], which owns the shared node table (hash consing), the
//!   operator caches, and the garbage collector.
//! - **Owning handles**: a [`Bdd`] protects its root from collection while
//!   alive and releases it on drop; the `*_with` operation family models
//!   destructive update by consuming both operands.
//! - **Automatic memory management**: mark-and-sweep collection runs when
//!   the node table fills up, growing the table when too little is
//!   reclaimed. Clients never see either event.
//! - **Variable substitution**: interned [`BddPairing`]s drive `replace`;
//!   arbitrary-BDD substitution goes through `compose`.
//! - **Bit-vector layer**: [`BddInteger`] encodes unsigned packet fields
//!   and builds equality and interval predicates over them.
//!
//! ## Basic Usage
//!
//! ```rust
//! use netbdd::BddFactory;
//!
//! // 1. Initialize the factory and declare variables.
//! let factory = BddFactory::init(1 << 16, 1 << 14);
//! factory.set_var_num(3).unwrap();
//!
//! // 2. Build a formula: f = x0 AND (x1 OR x2)
//! let x0 = factory.ith_var(0).unwrap();
//! let x1 = factory.ith_var(1).unwrap();
//! let x2 = factory.ith_var(2).unwrap();
//! let f = x0.and(&x1.or(&x2).unwrap()).unwrap();
//!
//! // 3. Check properties.
//! assert!(!f.is_zero());
//! assert_eq!(f.sat_count().unwrap(), 3u32.into());
//!
//! // 4. Extract a witness.
//! let witness = f.sat_one().unwrap();
//! assert_eq!(witness.and(&f).unwrap(), witness);
//! ```
//!
//! ## Threading
//!
//! A factory and all of its handles are confined to one thread. Multiple
//! independent factories may run on different threads; mixing their
//! handles is rejected with [`BddError::CrossFactory`].

mod cache;
mod engine;
mod error;
mod hash;
mod node;
mod sat;
mod table;

pub mod dot;
pub mod factory;
pub mod handle;
pub mod integer;
pub mod pairing;
pub mod stats;
pub mod types;

pub use crate::error::{BddError, Result};
pub use crate::factory::{BddFactory, FactoryConfig};
pub use crate::handle::Bdd;
pub use crate::integer::BddInteger;
pub use crate::pairing::BddPairing;
pub use crate::stats::{CacheStats, GcStats, ReorderStats};
pub use crate::types::BddOp;
