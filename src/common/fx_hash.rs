//! Fast, non-cryptographic hash maps/sets used throughout the IR core.
//!
//! Pass worklists and value maps are rebuilt constantly during a single
//! pass-manager iteration; `std`'s SipHash-backed `HashMap` is needless
//! overhead for keys that are already dense integer ids.

pub use rustc_hash::{FxHashMap, FxHashSet};
