//! Canonical decision-diagram engines for bit-vector constraint reasoning.
//!
//! Two engines share the same hash-consing substrate:
//!
//! - [`bdd`]: reduced ordered binary decision diagrams with a manager-owned
//!   unique table, reference-counted handles, garbage collection and greedy
//!   variable reordering. The [`bddv`] layer interprets vectors of BDDs as
//!   unsigned machine integers with modular arithmetic, comparisons and
//!   division, and [`fdd`] answers membership and witness queries over such
//!   a vector as a finite domain.
//! - [`pdd`]: canonical polynomial diagrams over ℤ or ℤ/2^N, with the
//!   Gröbner-style primitives (`reduce`, `try_spoly`, `resolve`) used by
//!   polynomial saturation.
//!
//! # Example
//!
//! ```
//! use dd_rs::bdd::BddManager;
//!
//! let m = BddManager::new(3);
//! let x = m.mk_var(0);
//! let y = m.mk_var(1);
//! let f = &x & &y;
//! assert_eq!(!&f, &!&x | &!&y);
//! ```

pub mod bdd;
pub mod bddv;
pub mod cache;
pub mod fdd;
pub mod pdd;
pub mod reorder;
pub mod table;
pub mod utils;
