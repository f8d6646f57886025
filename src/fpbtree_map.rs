use core::borrow::Borrow;
use core::fmt;
use core::iter::FusedIterator;
use core::ops::Index;

use crate::monoid::Monoid;
use crate::raw::{Handle, RawFPBTreeMap};

/// Keys per node when no explicit degree is given.
pub const DEFAULT_DEGREE: usize = 4;

/// An ordered map based on a [B+tree] in which every node carries a *label*:
/// the fold of its entire subtree under a caller-supplied [`Monoid`].
///
/// The label turns the tree into a range-aggregation index. Where a plain
/// ordered map answers "is key `k` present" in O(log n), an `FPBTreeMap`
/// additionally answers "what is the combined aggregate of every key in
/// `[x, y)`" in O(log n), by summing precomputed subtree labels instead of
/// walking the range. With [`FingerprintMonoid`](crate::FingerprintMonoid)
/// that aggregate is a set fingerprint (count, XOR of key hashes, greatest
/// key), the building block of range-based set reconciliation: two replicas
/// compare fingerprints of a range and recurse only into halves that differ.
///
/// Keys must implement [`Ord`] and [`Clone`]; separator keys in routing nodes
/// are clones of leaf keys. It is a logic error for a key to be modified in
/// such a way that its ordering relative to any other key changes while it is
/// in the map.
///
/// All data lives in leaves; leaves are chained into a sorted doubly-linked
/// list, so iteration never touches routing nodes. Nodes are stored in an
/// arena and reference each other by index, so the map is a single owner of
/// plain memory with no interior mutability.
///
/// # Examples
///
/// ```
/// use fpbtree::{FPBTreeMap, FingerprintMonoid};
///
/// let mut map = FPBTreeMap::new(FingerprintMonoid);
/// map.insert("lettuce", 3);
/// map.insert("tomato", 7);
/// map.insert("basil", 2);
///
/// assert_eq!(map.get(&"tomato"), Some(&7));
/// assert_eq!(map.len(), 3);
///
/// // Keys come back in sorted order.
/// let keys: Vec<_> = map.keys().copied().collect();
/// assert_eq!(keys, ["basil", "lettuce", "tomato"]);
///
/// // Fingerprint of the half-open key range ["basil", "tomato").
/// let (fp, _) = map.fingerprint(&"basil", Some(&"tomato"));
/// assert_eq!(fp.count, 2);
/// assert_eq!(fp.max_key, Some("lettuce"));
/// ```
///
/// [B+tree]: https://en.wikipedia.org/wiki/B%2B_tree
pub struct FPBTreeMap<K, V, M: Monoid<K>> {
    raw: RawFPBTreeMap<K, V, M>,
}

/// A position between a leaf and one of its entries, as returned by
/// [`FPBTreeMap::lower_bound`] and the fingerprint operations.
///
/// A cursor is only meaningful against the map that produced it and is
/// invalidated by any mutation of that map; using a stale cursor gives an
/// unspecified position or a panic, never undefined behavior.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Cursor {
    leaf: Handle,
    index: usize,
}

/// A read-only view of one tree node, for structural traversal.
///
/// Created by [`FPBTreeMap::root`] and [`FPBTreeMap::locate_leaf`], and
/// navigated with [`parent`](NodeRef::parent), [`child`](NodeRef::child),
/// and the sibling/chain accessors. Since a `NodeRef` borrows the map
/// shared, the structure cannot change while one is alive.
///
/// # Examples
///
/// ```
/// use fpbtree::{FPBTreeMap, FingerprintMonoid};
///
/// let mut map = FPBTreeMap::new(FingerprintMonoid);
/// for key in 1..=8 {
///     map.insert(key, ());
/// }
///
/// let root = map.root().unwrap();
/// assert!(!root.is_leaf());
/// assert_eq!(root.keys(), &[3, 5]);
/// assert_eq!(root.label().count, 8);
/// assert_eq!(root.child(0).keys(), &[1, 2]);
/// ```
pub struct NodeRef<'a, K, V, M: Monoid<K>> {
    raw: &'a RawFPBTreeMap<K, V, M>,
    handle: Handle,
}

impl<K, V, M: Monoid<K>> Clone for NodeRef<'_, K, V, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V, M: Monoid<K>> Copy for NodeRef<'_, K, V, M> {}

/// An iterator over the entries of an `FPBTreeMap`, in ascending key order.
///
/// This `struct` is created by the [`iter`](FPBTreeMap::iter) method.
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Iter<'a, K, V, M: Monoid<K>> {
    raw: &'a RawFPBTreeMap<K, V, M>,
    front: Option<(Handle, usize)>,
    back: Option<(Handle, usize)>,
    remaining: usize,
}

impl<K, V, M: Monoid<K>> Clone for Iter<'_, K, V, M> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw,
            front: self.front,
            back: self.back,
            remaining: self.remaining,
        }
    }
}

/// An iterator over the keys of an `FPBTreeMap`, in ascending order.
///
/// This `struct` is created by the [`keys`](FPBTreeMap::keys) method.
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Keys<'a, K, V, M: Monoid<K>> {
    inner: Iter<'a, K, V, M>,
}

/// An iterator over the values of an `FPBTreeMap`, in ascending key order.
///
/// This `struct` is created by the [`values`](FPBTreeMap::values) method.
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Values<'a, K, V, M: Monoid<K>> {
    inner: Iter<'a, K, V, M>,
}

/// An owning iterator over the entries of an `FPBTreeMap`, sorted by key.
///
/// This `struct` is created by the [`into_iter`](IntoIterator::into_iter)
/// method on [`FPBTreeMap`].
pub struct IntoIter<K, V> {
    inner: std::vec::IntoIter<(K, V)>,
}

/// An owning iterator over the keys of an `FPBTreeMap`.
///
/// This `struct` is created by the [`into_keys`](FPBTreeMap::into_keys)
/// method.
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct IntoKeys<K, V> {
    inner: IntoIter<K, V>,
}

/// An owning iterator over the values of an `FPBTreeMap`.
///
/// This `struct` is created by the [`into_values`](FPBTreeMap::into_values)
/// method.
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct IntoValues<K, V> {
    inner: IntoIter<K, V>,
}

impl<K, V, M: Monoid<K>> FPBTreeMap<K, V, M> {
    /// Creates an empty map with the default degree of
    /// [`DEFAULT_DEGREE`] keys per node.
    ///
    /// # Examples
    ///
    /// ```
    /// use fpbtree::{FPBTreeMap, FingerprintMonoid};
    ///
    /// let mut map = FPBTreeMap::new(FingerprintMonoid);
    /// map.insert(1, "a");
    /// ```
    pub fn new(monoid: M) -> Self {
        Self::with_degree(monoid, DEFAULT_DEGREE)
    }

    /// Creates an empty map holding at most `degree` keys per node.
    ///
    /// Small degrees are mainly useful for exercising the rebalancing logic;
    /// larger degrees give shallower trees and better cache behavior.
    ///
    /// # Panics
    ///
    /// Panics if `degree < 2`.
    pub fn with_degree(monoid: M, degree: usize) -> Self {
        Self {
            raw: RawFPBTreeMap::new(monoid, degree),
        }
    }

    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Returns the maximum number of keys per node.
    pub fn degree(&self) -> usize {
        self.raw.degree()
    }

    /// Returns the aggregation strategy this map was built with.
    pub fn monoid(&self) -> &M {
        self.raw.monoid()
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.raw.clear();
    }

    /// A read-only view of the root node, or `None` for an empty map.
    pub fn root(&self) -> Option<NodeRef<'_, K, V, M>> {
        Some(NodeRef {
            raw: &self.raw,
            handle: self.raw.root()?,
        })
    }

    /// The monoid fold of the entire map; identity when empty.
    ///
    /// Equivalent to the root's label, but total on the empty map.
    pub fn fingerprint_all(&self) -> M::Aggregate {
        match self.raw.root() {
            Some(root) => self.raw.node(root).label().clone(),
            None => self.raw.monoid().identity(),
        }
    }

    /// The key and value at a cursor position.
    ///
    /// # Panics
    ///
    /// May panic if the cursor is stale (the map was mutated after the
    /// cursor was produced).
    pub fn entry_at(&self, cursor: Cursor) -> (&K, &V) {
        let leaf = self.raw.node(cursor.leaf);
        (leaf.key(cursor.index), self.raw.value(leaf.value(cursor.index)))
    }

    /// Gets an iterator over the entries, sorted by key.
    ///
    /// # Examples
    ///
    /// ```
    /// use fpbtree::{FPBTreeMap, FingerprintMonoid};
    ///
    /// let mut map = FPBTreeMap::new(FingerprintMonoid);
    /// map.insert(3, "c");
    /// map.insert(1, "a");
    /// map.insert(2, "b");
    ///
    /// let entries: Vec<_> = map.iter().collect();
    /// assert_eq!(entries, [(&1, &"a"), (&2, &"b"), (&3, &"c")]);
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V, M> {
        Iter {
            raw: &self.raw,
            front: self.raw.first_leaf().map(|leaf| (leaf, 0)),
            back: self
                .raw
                .last_leaf()
                .map(|leaf| (leaf, self.raw.node(leaf).key_count() - 1)),
            remaining: self.raw.len(),
        }
    }

    /// Gets an iterator over the keys, in ascending order.
    pub fn keys(&self) -> Keys<'_, K, V, M> {
        Keys { inner: self.iter() }
    }

    /// Gets an iterator over the values, in ascending key order.
    pub fn values(&self) -> Values<'_, K, V, M> {
        Values { inner: self.iter() }
    }

    /// Creates a consuming iterator over the keys, in ascending order.
    pub fn into_keys(self) -> IntoKeys<K, V> {
        IntoKeys {
            inner: self.into_iter(),
        }
    }

    /// Creates a consuming iterator over the values, in ascending key order.
    pub fn into_values(self) -> IntoValues<K, V> {
        IntoValues {
            inner: self.into_iter(),
        }
    }

    /// The keys of every node, layer by layer from the root down.
    ///
    /// A structural snapshot for debugging and teaching; `layers()[0]` is the
    /// root alone and the last layer is the leaves in chain order.
    ///
    /// # Examples
    ///
    /// ```
    /// use fpbtree::{FPBTreeMap, FingerprintMonoid};
    ///
    /// let mut map = FPBTreeMap::new(FingerprintMonoid);
    /// for key in 1..=8 {
    ///     map.insert(key, ());
    /// }
    ///
    /// let layers = map.layers();
    /// assert_eq!(layers[0], [vec![3, 5]]);
    /// assert_eq!(layers[1], [vec![1, 2], vec![3, 4], vec![5, 6, 7, 8]]);
    /// ```
    pub fn layers(&self) -> Vec<Vec<Vec<K>>>
    where
        K: Clone,
    {
        let mut layers = Vec::new();
        let Some(root) = self.raw.root() else {
            return layers;
        };
        let mut level = vec![root];
        while !level.is_empty() {
            let mut next_level = Vec::new();
            let mut layer = Vec::with_capacity(level.len());
            for &node_h in &level {
                let node = self.raw.node(node_h);
                layer.push(node.keys().to_vec());
                if !node.is_leaf() {
                    next_level.extend_from_slice(node.children());
                }
            }
            layers.push(layer);
            level = next_level;
        }
        layers
    }
}

impl<K: Ord + Clone, V, M: Monoid<K>> FPBTreeMap<K, V, M> {
    /// Inserts a key-value pair into the map.
    ///
    /// If the key is already present the value is replaced and the old value
    /// returned; the key itself, and the tree structure, are not updated.
    ///
    /// # Examples
    ///
    /// ```
    /// use fpbtree::{FPBTreeMap, FingerprintMonoid};
    ///
    /// let mut map = FPBTreeMap::new(FingerprintMonoid);
    /// assert_eq!(map.insert(37, "a"), None);
    /// assert_eq!(map.insert(37, "b"), Some("a"));
    /// assert_eq!(map.get(&37), Some(&"b"));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.raw.insert(key, value)
    }

    /// Removes a key from the map, returning its value if it was present.
    ///
    /// # Examples
    ///
    /// ```
    /// use fpbtree::{FPBTreeMap, FingerprintMonoid};
    ///
    /// let mut map = FPBTreeMap::new(FingerprintMonoid);
    /// map.insert(1, "a");
    /// assert_eq!(map.remove(&1), Some("a"));
    /// assert_eq!(map.remove(&1), None);
    /// ```
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.raw.remove(key)
    }

    /// Returns a reference to the value corresponding to the key.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.raw.get(key)
    }

    /// Returns a mutable reference to the value corresponding to the key.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.raw.get_mut(key)
    }

    /// Returns `true` if the map contains a value for the key.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.raw.contains_key(key)
    }

    /// Returns the first (least-key) entry in the map.
    pub fn first_key_value(&self) -> Option<(&K, &V)> {
        self.raw.first_key_value()
    }

    /// Returns the last (greatest-key) entry in the map.
    pub fn last_key_value(&self) -> Option<(&K, &V)> {
        self.raw.last_key_value()
    }

    /// A cursor at the first entry with key `>= key`, or `None` when every
    /// key in the map is smaller.
    ///
    /// # Examples
    ///
    /// ```
    /// use fpbtree::{FPBTreeMap, FingerprintMonoid};
    ///
    /// let mut map = FPBTreeMap::new(FingerprintMonoid);
    /// map.insert(10, "a");
    /// map.insert(20, "b");
    ///
    /// let cursor = map.lower_bound(&15).unwrap();
    /// assert_eq!(map.entry_at(cursor), (&20, &"b"));
    /// assert!(map.lower_bound(&25).is_none());
    /// ```
    pub fn lower_bound<Q>(&self, key: &Q) -> Option<Cursor>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        let (leaf, index) = self.raw.lower_bound(key)?;
        Some(Cursor { leaf, index })
    }

    /// A read-only view of the leaf whose key range covers `key` (whether or
    /// not the key itself is present), or `None` for an empty map.
    pub fn locate_leaf<Q>(&self, key: &Q) -> Option<NodeRef<'_, K, V, M>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        Some(NodeRef {
            raw: &self.raw,
            handle: self.raw.locate_leaf(key)?,
        })
    }

    /// The monoid aggregate of every key in the half-open range
    /// `[start, end)`, in O(log n).
    ///
    /// `end = None` extends the range to the end of the map. The second
    /// return value is a cursor at the first key `>= end`, or `None` when the
    /// range reached the end of the map; it can be fed to
    /// [`compute_fingerprint`](Self::compute_fingerprint) to aggregate the
    /// next adjacent range without a fresh descent.
    ///
    /// The aggregate covers the keys actually present in the range, folded in
    /// ascending key order. An empty range yields the identity.
    ///
    /// # Examples
    ///
    /// ```
    /// use fpbtree::{FPBTreeMap, FingerprintMonoid};
    ///
    /// let mut map = FPBTreeMap::new(FingerprintMonoid);
    /// for key in 1..=8 {
    ///     map.insert(key, key * 10);
    /// }
    ///
    /// // Six keys fall in [2, 8).
    /// let (fp, cursor) = map.fingerprint(&2, Some(&8));
    /// assert_eq!(fp.count, 6);
    /// assert_eq!(fp.max_key, Some(7));
    ///
    /// // Resume from the cursor to cover the rest of the map.
    /// let (rest, end) = map.compute_fingerprint(None, cursor.unwrap());
    /// assert_eq!(rest.count, 1);
    /// assert!(end.is_none());
    /// ```
    pub fn fingerprint(&self, start: &K, end: Option<&K>) -> (M::Aggregate, Option<Cursor>) {
        match self.raw.lower_bound(start) {
            Some((leaf, index)) => self.fingerprint_from(end, leaf, index),
            None => (self.raw.monoid().identity(), None),
        }
    }

    /// Continues a fingerprint from a cursor returned by a previous
    /// [`fingerprint`](Self::fingerprint) or [`lower_bound`](Self::lower_bound)
    /// call, aggregating up to `end`.
    ///
    /// # Panics
    ///
    /// May panic if the cursor is stale (the map was mutated after the
    /// cursor was produced).
    pub fn compute_fingerprint(&self, end: Option<&K>, cursor: Cursor) -> (M::Aggregate, Option<Cursor>) {
        self.fingerprint_from(end, cursor.leaf, cursor.index)
    }

    fn fingerprint_from(
        &self,
        end: Option<&K>,
        leaf: Handle,
        index: usize,
    ) -> (M::Aggregate, Option<Cursor>) {
        let (aggregate, cursor) = self.raw.compute_fingerprint(end, leaf, index);
        (aggregate, cursor.map(|(leaf, index)| Cursor { leaf, index }))
    }
}

impl<'a, K, V, M: Monoid<K>> NodeRef<'a, K, V, M> {
    /// Returns `true` for a leaf node, `false` for a routing node.
    pub fn is_leaf(&self) -> bool {
        self.raw.node(self.handle).is_leaf()
    }

    /// The number of keys stored in this node.
    pub fn key_count(&self) -> usize {
        self.raw.node(self.handle).key_count()
    }

    /// The key at `index`.
    pub fn key(&self, index: usize) -> &'a K {
        self.raw.node(self.handle).key(index)
    }

    /// All keys of this node, in ascending order.
    pub fn keys(&self) -> &'a [K] {
        self.raw.node(self.handle).keys()
    }

    /// The cached monoid aggregate of this node's entire subtree.
    pub fn label(&self) -> &'a M::Aggregate {
        self.raw.node(self.handle).label()
    }

    /// This node's position among its parent's children; 0 for the root.
    pub fn index_in_parent(&self) -> usize {
        self.raw.node(self.handle).index_in_parent()
    }

    /// The parent node, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        Some(Self {
            raw: self.raw,
            handle: self.raw.node(self.handle).parent()?,
        })
    }

    /// The number of children. Internal nodes only.
    ///
    /// # Panics
    ///
    /// Panics on a leaf node.
    pub fn child_count(&self) -> usize {
        self.raw.node(self.handle).child_count()
    }

    /// The child at `index`. Internal nodes only.
    ///
    /// # Panics
    ///
    /// Panics on a leaf node, or when `index` is out of range.
    pub fn child(&self, index: usize) -> Self {
        Self {
            raw: self.raw,
            handle: self.raw.node(self.handle).child(index),
        }
    }

    /// The value at `index`. Leaf nodes only.
    ///
    /// # Panics
    ///
    /// Panics on an internal node, or when `index` is out of range.
    pub fn value(&self, index: usize) -> &'a V {
        self.raw.value(self.raw.node(self.handle).value(index))
    }

    /// The previous leaf in the chain. Leaf nodes only.
    ///
    /// # Panics
    ///
    /// Panics on an internal node.
    pub fn prev(&self) -> Option<Self> {
        Some(Self {
            raw: self.raw,
            handle: self.raw.node(self.handle).prev()?,
        })
    }

    /// The next leaf in the chain. Leaf nodes only.
    ///
    /// # Panics
    ///
    /// Panics on an internal node.
    pub fn next(&self) -> Option<Self> {
        Some(Self {
            raw: self.raw,
            handle: self.raw.node(self.handle).next()?,
        })
    }
}

impl<'a, K: Ord + Clone, V, M: Monoid<K>> NodeRef<'a, K, V, M> {
    /// The node immediately to the left at the same level, even across a
    /// parent boundary.
    pub fn left_sibling(&self) -> Option<Self> {
        Some(Self {
            raw: self.raw,
            handle: self.raw.left_sibling(self.handle)?,
        })
    }

    /// The node immediately to the right at the same level, even across a
    /// parent boundary.
    pub fn right_sibling(&self) -> Option<Self> {
        Some(Self {
            raw: self.raw,
            handle: self.raw.right_sibling(self.handle)?,
        })
    }
}

impl<'a, K, V, M: Monoid<K>> Iterator for Iter<'a, K, V, M> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let (leaf_h, index) = self.front?;
        let leaf = self.raw.node(leaf_h);
        let entry = (leaf.key(index), self.raw.value(leaf.value(index)));
        self.remaining -= 1;
        self.front = if index + 1 < leaf.key_count() {
            Some((leaf_h, index + 1))
        } else {
            leaf.next().map(|next_h| (next_h, 0))
        };
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, M: Monoid<K>> DoubleEndedIterator for Iter<'_, K, V, M> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let (leaf_h, index) = self.back?;
        let leaf = self.raw.node(leaf_h);
        let entry = (leaf.key(index), self.raw.value(leaf.value(index)));
        self.remaining -= 1;
        self.back = if index > 0 {
            Some((leaf_h, index - 1))
        } else {
            leaf.prev().map(|prev_h| {
                let prev = self.raw.node(prev_h);
                (prev_h, prev.key_count() - 1)
            })
        };
        Some(entry)
    }
}

impl<K, V, M: Monoid<K>> ExactSizeIterator for Iter<'_, K, V, M> {
    fn len(&self) -> usize {
        self.remaining
    }
}

impl<K, V, M: Monoid<K>> FusedIterator for Iter<'_, K, V, M> {}

impl<'a, K, V, M: Monoid<K>> Iterator for Keys<'a, K, V, M> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V, M: Monoid<K>> DoubleEndedIterator for Keys<'_, K, V, M> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(key, _)| key)
    }
}

impl<K, V, M: Monoid<K>> ExactSizeIterator for Keys<'_, K, V, M> {}
impl<K, V, M: Monoid<K>> FusedIterator for Keys<'_, K, V, M> {}

impl<'a, K, V, M: Monoid<K>> Iterator for Values<'a, K, V, M> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V, M: Monoid<K>> DoubleEndedIterator for Values<'_, K, V, M> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, value)| value)
    }
}

impl<K, V, M: Monoid<K>> ExactSizeIterator for Values<'_, K, V, M> {}
impl<K, V, M: Monoid<K>> FusedIterator for Values<'_, K, V, M> {}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for IntoIter<K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {}
impl<K, V> FusedIterator for IntoIter<K, V> {}

impl<K, V> Iterator for IntoKeys<K, V> {
    type Item = K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for IntoKeys<K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(key, _)| key)
    }
}

impl<K, V> ExactSizeIterator for IntoKeys<K, V> {}
impl<K, V> FusedIterator for IntoKeys<K, V> {}

impl<K, V> Iterator for IntoValues<K, V> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for IntoValues<K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, value)| value)
    }
}

impl<K, V> ExactSizeIterator for IntoValues<K, V> {}
impl<K, V> FusedIterator for IntoValues<K, V> {}

impl<K, V, M: Monoid<K>> IntoIterator for FPBTreeMap<K, V, M> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> IntoIter<K, V> {
        IntoIter {
            inner: self.raw.into_entries().into_iter(),
        }
    }
}

impl<'a, K, V, M: Monoid<K>> IntoIterator for &'a FPBTreeMap<K, V, M> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, M>;

    fn into_iter(self) -> Iter<'a, K, V, M> {
        self.iter()
    }
}

impl<K, V, M: Monoid<K> + Default> Default for FPBTreeMap<K, V, M> {
    fn default() -> Self {
        Self::new(M::default())
    }
}

impl<K: Ord + Clone, V, M: Monoid<K> + Default> FromIterator<(K, V)> for FPBTreeMap<K, V, M> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::default();
        map.extend(iter);
        map
    }
}

impl<K: Ord + Clone, V, M: Monoid<K>> Extend<(K, V)> for FPBTreeMap<K, V, M> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K, V, M> fmt::Debug for FPBTreeMap<K, V, M>
where
    K: fmt::Debug,
    V: fmt::Debug,
    M: Monoid<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, M> PartialEq for FPBTreeMap<K, V, M>
where
    K: PartialEq,
    V: PartialEq,
    M: Monoid<K>,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl<K: Eq, V: Eq, M: Monoid<K>> Eq for FPBTreeMap<K, V, M> {}

impl<K, V, M, Q> Index<&Q> for FPBTreeMap<K, V, M>
where
    K: Ord + Clone + Borrow<Q>,
    M: Monoid<K>,
    Q: ?Sized + Ord,
{
    type Output = V;

    /// Returns a reference to the value corresponding to the supplied key.
    ///
    /// # Panics
    ///
    /// Panics if the key is not present in the map.
    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("no entry found for key")
    }
}
