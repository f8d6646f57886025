//! The aggregation contract and the built-in aggregation strategies.
//!
//! Every node of an [`FPBTreeMap`](crate::FPBTreeMap) caches a *label*: the
//! monoid combination of its entire subtree, folded in key order. The tree is
//! generic over a [`Monoid`] so the aggregation strategy can be swapped
//! without touching any tree algorithm.

use core::cmp::Ordering;
use core::hash::{Hash, Hasher};
use std::hash::DefaultHasher;

/// An associative combine with identity, plus the two tree-facing hooks:
/// lifting a single key into the aggregate domain and comparing an
/// aggregate's position against a raw key.
///
/// Laws the tree relies on (and the unit tests spot-check):
/// - `combine` is associative;
/// - `combine(identity(), x) == x == combine(x, identity())`;
/// - all operations are pure and deterministic.
///
/// `combine` is *not* required to be commutative; the tree always folds
/// left-to-right in key order.
pub trait Monoid<K> {
    /// The aggregate ("label") type.
    type Aggregate: Clone;

    /// The identity element.
    fn identity(&self) -> Self::Aggregate;

    /// Combines two aggregates; `x` is the left (smaller-key) operand.
    fn combine(&self, x: &Self::Aggregate, y: &Self::Aggregate) -> Self::Aggregate;

    /// Lifts a single key into the aggregate domain.
    fn lift(&self, key: &K) -> Self::Aggregate;

    /// Compares the aggregate's position (its greatest-key marker) against a
    /// raw key.
    ///
    /// An aggregate with no greatest key (the identity) is less than any key,
    /// and `key == None` stands for "past the end of the key space" and is
    /// greater than any aggregate; both cases yield [`Ordering::Less`]. The
    /// fingerprint walk climbs while this returns `Less`.
    fn compare_to_key(&self, aggregate: &Self::Aggregate, key: Option<&K>) -> Ordering;
}

fn hash_key<K: Hash>(key: &K) -> u64 {
    // DefaultHasher::new() hashes with fixed keys, so fingerprints are
    // reproducible across runs and processes; RandomState would not be.
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Counts keys: every key lifts to 1 and `combine` adds.
///
/// The simplest possible strategy. Its `compare_to_key` is degenerate
/// (always [`Ordering::Equal`]) because a plain count carries no positional
/// information, so it cannot drive range navigation — a fingerprint query
/// under this monoid never leaves its starting leaf. Use
/// [`FingerprintMonoid`] for range queries; this type exists as the minimal
/// example of the contract and for whole-subtree counting via labels.
#[derive(Clone, Copy, Debug, Default)]
pub struct CountingMonoid;

impl<K> Monoid<K> for CountingMonoid {
    type Aggregate = u64;

    fn identity(&self) -> u64 {
        0
    }

    fn combine(&self, x: &u64, y: &u64) -> u64 {
        x + y
    }

    fn lift(&self, _key: &K) -> u64 {
        1
    }

    fn compare_to_key(&self, _aggregate: &u64, _key: Option<&K>) -> Ordering {
        Ordering::Equal
    }
}

/// The aggregate produced by [`FingerprintMonoid`]: a key count, an
/// order-independent XOR of per-key hashes, and the greatest key seen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint<K> {
    /// Number of keys in the aggregated range.
    pub count: u64,
    /// XOR of the hashes of every key in the range.
    pub hash: u64,
    /// Greatest key in the range; `None` for the identity.
    pub max_key: Option<K>,
}

/// Count + XOR-hash + greatest-key aggregation.
///
/// This is the monoid range reconciliation wants: two replicas agree on a
/// key range exactly when their fingerprints match (up to hash collisions),
/// and the greatest-key marker is what lets the fingerprint walk navigate.
#[derive(Clone, Copy, Debug, Default)]
pub struct FingerprintMonoid;

impl<K: Ord + Clone + Hash> Monoid<K> for FingerprintMonoid {
    type Aggregate = Fingerprint<K>;

    fn identity(&self) -> Fingerprint<K> {
        Fingerprint {
            count: 0,
            hash: 0,
            max_key: None,
        }
    }

    fn combine(&self, x: &Fingerprint<K>, y: &Fingerprint<K>) -> Fingerprint<K> {
        Fingerprint {
            count: x.count + y.count,
            hash: x.hash ^ y.hash,
            max_key: greater_max(&x.max_key, &y.max_key),
        }
    }

    fn lift(&self, key: &K) -> Fingerprint<K> {
        Fingerprint {
            count: 1,
            hash: hash_key(key),
            max_key: Some(key.clone()),
        }
    }

    fn compare_to_key(&self, aggregate: &Fingerprint<K>, key: Option<&K>) -> Ordering {
        compare_max_to_key(&aggregate.max_key, key)
    }
}

/// The aggregate produced by [`KeyListMonoid`]: a [`Fingerprint`] plus the
/// ordered sequence of every key in the range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyList<K> {
    pub count: u64,
    pub hash: u64,
    /// Every key in the range, in ascending order.
    pub keys: Vec<K>,
    pub max_key: Option<K>,
}

/// [`FingerprintMonoid`] extended with ordered key concatenation.
///
/// `combine` appends the right operand's keys after the left operand's, so
/// the aggregate reproduces the exact key set of a range, not just a digest.
/// Labels grow linearly with subtree size under this monoid; prefer
/// [`FingerprintMonoid`] unless the key list itself is needed.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyListMonoid;

impl<K: Ord + Clone + Hash> Monoid<K> for KeyListMonoid {
    type Aggregate = KeyList<K>;

    fn identity(&self) -> KeyList<K> {
        KeyList {
            count: 0,
            hash: 0,
            keys: Vec::new(),
            max_key: None,
        }
    }

    fn combine(&self, x: &KeyList<K>, y: &KeyList<K>) -> KeyList<K> {
        let mut keys = Vec::with_capacity(x.keys.len() + y.keys.len());
        keys.extend_from_slice(&x.keys);
        keys.extend_from_slice(&y.keys);
        KeyList {
            count: x.count + y.count,
            hash: x.hash ^ y.hash,
            keys,
            max_key: greater_max(&x.max_key, &y.max_key),
        }
    }

    fn lift(&self, key: &K) -> KeyList<K> {
        KeyList {
            count: 1,
            hash: hash_key(key),
            keys: vec![key.clone()],
            max_key: Some(key.clone()),
        }
    }

    fn compare_to_key(&self, aggregate: &KeyList<K>, key: Option<&K>) -> Ordering {
        compare_max_to_key(&aggregate.max_key, key)
    }
}

/// The greater of two greatest-key markers, treating `None` as the minimum.
/// Ties keep the right operand.
fn greater_max<K: Ord + Clone>(x: &Option<K>, y: &Option<K>) -> Option<K> {
    match (x, y) {
        (None, _) => y.clone(),
        (_, None) => x.clone(),
        (Some(a), Some(b)) => {
            if a > b {
                x.clone()
            } else {
                y.clone()
            }
        }
    }
}

fn compare_max_to_key<K: Ord>(max_key: &Option<K>, key: Option<&K>) -> Ordering {
    match (max_key, key) {
        // Identity is below any key; an absent query key is above any
        // aggregate. Either way the aggregate compares less.
        (None, _) | (_, None) => Ordering::Less,
        (Some(max), Some(key)) => max.cmp(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn counting_is_a_monoid() {
        let m = CountingMonoid;
        let one = Monoid::<i64>::lift(&m, &42);
        assert_eq!(Monoid::<i64>::identity(&m), 0);
        assert_eq!(Monoid::<i64>::combine(&m, &Monoid::<i64>::identity(&m), &one), one);
        assert_eq!(Monoid::<i64>::combine(&m, &one, &Monoid::<i64>::identity(&m)), one);
    }

    #[test]
    fn fingerprint_identity_laws() {
        let m = FingerprintMonoid;
        let x = m.lift(&7i64);
        assert_eq!(m.combine(&m.identity(), &x), x);
        assert_eq!(m.combine(&x, &m.identity()), x);
    }

    #[test]
    fn fingerprint_tracks_greatest_key() {
        let m = FingerprintMonoid;
        let low = m.lift(&3i64);
        let high = m.lift(&9i64);
        assert_eq!(m.combine(&low, &high).max_key, Some(9));
        assert_eq!(m.combine(&high, &low).max_key, Some(9));
    }

    #[test]
    fn compare_to_key_boundaries() {
        let m = FingerprintMonoid;
        let identity: Fingerprint<i64> = m.identity();
        let x = m.lift(&5i64);

        // Identity is below everything, including an absent query key.
        assert_eq!(m.compare_to_key(&identity, Some(&i64::MIN)), Ordering::Less);
        assert_eq!(m.compare_to_key(&identity, None), Ordering::Less);
        // An absent query key is above any aggregate.
        assert_eq!(m.compare_to_key(&x, None), Ordering::Less);
        assert_eq!(m.compare_to_key(&x, Some(&5)), Ordering::Equal);
        assert_eq!(m.compare_to_key(&x, Some(&4)), Ordering::Greater);
        assert_eq!(m.compare_to_key(&x, Some(&6)), Ordering::Less);
    }

    #[test]
    fn key_list_preserves_order_across_combine() {
        let m = KeyListMonoid;
        let left = m.combine(&m.lift(&1i64), &m.lift(&2i64));
        let right = m.combine(&m.lift(&3i64), &m.lift(&4i64));
        assert_eq!(m.combine(&left, &right).keys, vec![1, 2, 3, 4]);
    }

    proptest! {
        #[test]
        fn fingerprint_combine_is_associative(a: i64, b: i64, c: i64) {
            let m = FingerprintMonoid;
            let (x, y, z) = (m.lift(&a), m.lift(&b), m.lift(&c));
            prop_assert_eq!(
                m.combine(&m.combine(&x, &y), &z),
                m.combine(&x, &m.combine(&y, &z))
            );
        }

        #[test]
        fn hash_cancels_itself(keys in prop::collection::vec(any::<i64>(), 0..32)) {
            // XORing a key's hash in twice removes it: the property that makes
            // the fingerprint usable for symmetric-difference reconciliation.
            let m = FingerprintMonoid;
            let mut acc = m.identity();
            for k in &keys {
                acc = m.combine(&acc, &m.lift(k));
            }
            for k in &keys {
                acc = m.combine(&acc, &m.lift(k));
            }
            prop_assert_eq!(acc.hash, 0);
        }
    }
}
