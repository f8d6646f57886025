//! Monoid-labeled B+tree map with O(log n) range fingerprints.
//!
//! This crate provides [`FPBTreeMap`], an ordered map in which every tree
//! node carries a *label*: the fold of its entire subtree under a pluggable
//! [`Monoid`]. Labels make range aggregation as cheap as a point lookup:
//!
//! - [`fingerprint`](FPBTreeMap::fingerprint) - Aggregate of all keys in a
//!   half-open range `[x, y)`, in O(log n)
//! - [`fingerprint_all`](FPBTreeMap::fingerprint_all) - Aggregate of the
//!   whole map, O(1) off the root label
//! - Resumable cursors - aggregate adjacent ranges without re-descending
//!
//! The built-in [`FingerprintMonoid`] aggregates a key count, an XOR of
//! per-key hashes, and the greatest key. That combination is the core of
//! range-based set reconciliation: two replicas exchange fingerprints of a
//! key range and recurse only into subranges whose fingerprints differ,
//! localizing the difference in logarithmically many rounds.
//!
//! # Example
//!
//! ```
//! use fpbtree::{FPBTreeMap, FingerprintMonoid};
//!
//! let mut index = FPBTreeMap::new(FingerprintMonoid);
//! for key in [12, 3, 44, 7, 29, 18] {
//!     index.insert(key, ());
//! }
//!
//! // Aggregate of every key in [7, 30): four keys, greatest is 29.
//! let (fp, cursor) = index.fingerprint(&7, Some(&30));
//! assert_eq!(fp.count, 4);
//! assert_eq!(fp.max_key, Some(29));
//!
//! // Resume from the returned cursor to cover the rest of the key space.
//! let (rest, _) = index.compute_fingerprint(None, cursor.unwrap());
//! assert_eq!(rest.count, 1);
//! assert_eq!(rest.max_key, Some(44));
//! ```
//!
//! # Features
//!
//! - **Pluggable aggregation** - any associative combine with identity;
//!   [`CountingMonoid`] and [`KeyListMonoid`] ship alongside the fingerprint
//! - **Standard map API** - `insert`/`get`/`remove`/iteration mirror
//!   `std::collections::BTreeMap`
//! - **Cache-efficient** - B+tree with arena-allocated nodes and a linked
//!   leaf chain; no per-entry heap allocation
//! - **Structural introspection** - read-only [`NodeRef`] traversal and a
//!   layer-by-layer dump for debugging and teaching
//!
//! # Implementation
//!
//! The map is a B+tree: all entries live in leaves, internal nodes only
//! route, and leaves form a sorted doubly-linked list. Every mutation
//! restores the labels on the path it touched, so a label is always the
//! exact fold of its subtree in key order. A range fingerprint then climbs
//! from the range's first leaf while whole subtrees fit below the range end,
//! and descends toward the boundary afterwards, combining at most one node's
//! worth of labels per level in each phase.
//!
//! [`Monoid`]: crate::Monoid

#![forbid(unsafe_code)]
#![forbid(keyword_idents)]
#![forbid(non_ascii_idents)]
#![forbid(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::cargo)]
#![warn(clippy::pedantic)]

mod raw;

pub mod fpbtree_map;
pub mod monoid;

pub use fpbtree_map::{Cursor, FPBTreeMap, NodeRef};
pub use monoid::{CountingMonoid, Fingerprint, FingerprintMonoid, KeyList, KeyListMonoid, Monoid};
