use core::borrow::Borrow;

use smallvec::SmallVec;

use super::handle::Handle;

// Inline capacities sized for the reference fan-out of 4; a node holds at
// most `degree + 1` keys transiently while a split is in progress, and
// larger degrees spill to the heap.
pub(crate) const INLINE_KEYS: usize = 8;
pub(crate) const INLINE_CHILDREN: usize = INLINE_KEYS + 1;

pub(crate) type KeyStore<K> = SmallVec<[K; INLINE_KEYS]>;
pub(crate) type ChildStore = SmallVec<[Handle; INLINE_CHILDREN]>;
pub(crate) type ValueStore = SmallVec<[Handle; INLINE_KEYS]>;

/// A tree node: the fields shared by both variants, plus variant data.
///
/// `label` is the cached monoid aggregate of the node's entire subtree and
/// must be re-established by the tree after every structural change.
/// `parent`/`index_in_parent` are maintained eagerly: `index_in_parent` is
/// the node's slot in its parent's child list, which both the underflow
/// repair and the ascending phase of the fingerprint walk rely on.
pub(crate) struct Node<K, A> {
    keys: KeyStore<K>,
    label: A,
    parent: Option<Handle>,
    index_in_parent: usize,
    variant: Variant,
}

/// Variant-specific data. Values are handles into the tree's value arena so
/// the node type stays independent of the value type.
pub(crate) enum Variant {
    /// Routing node: `children.len() == keys.len() + 1`. Each separator key
    /// equals the first key of the leaf subtree under its right child.
    Internal { children: ChildStore },
    /// Data node. `values` is parallel to `keys`; `prev`/`next` chain all
    /// leaves into one sorted doubly-linked list.
    Leaf {
        values: ValueStore,
        prev: Option<Handle>,
        next: Option<Handle>,
    },
}

impl<K, A> Node<K, A> {
    pub(crate) fn new_leaf(label: A) -> Self {
        Self {
            keys: SmallVec::new(),
            label,
            parent: None,
            index_in_parent: 0,
            variant: Variant::Leaf {
                values: SmallVec::new(),
                prev: None,
                next: None,
            },
        }
    }

    pub(crate) fn new_internal(label: A) -> Self {
        Self {
            keys: SmallVec::new(),
            label,
            parent: None,
            index_in_parent: 0,
            variant: Variant::Internal {
                children: SmallVec::new(),
            },
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self.variant, Variant::Leaf { .. })
    }

    pub(crate) fn key_count(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub(crate) fn key(&self, index: usize) -> &K {
        &self.keys[index]
    }

    pub(crate) fn keys(&self) -> &[K] {
        &self.keys
    }

    pub(crate) fn keys_mut(&mut self) -> &mut KeyStore<K> {
        &mut self.keys
    }

    pub(crate) fn set_key(&mut self, index: usize, key: K) {
        self.keys[index] = key;
    }

    pub(crate) fn label(&self) -> &A {
        &self.label
    }

    pub(crate) fn set_label(&mut self, label: A) {
        self.label = label;
    }

    pub(crate) fn parent(&self) -> Option<Handle> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<Handle>) {
        self.parent = parent;
    }

    pub(crate) fn index_in_parent(&self) -> usize {
        self.index_in_parent
    }

    pub(crate) fn set_index_in_parent(&mut self, index: usize) {
        self.index_in_parent = index;
    }

    /// Exact-match search among this node's keys.
    #[inline]
    pub(crate) fn search_key<Q>(&self, key: &Q) -> Result<usize, usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        self.keys.binary_search_by(|k| k.borrow().cmp(key))
    }

    /// Routing search: the child slot whose range contains `key`.
    ///
    /// An exact separator match routes to the slot on its right, since a
    /// separator equals the first key of its right child's subtree.
    #[inline]
    pub(crate) fn search_child<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Ord,
    {
        match self.search_key(key) {
            Ok(index) => index + 1,
            Err(index) => index,
        }
    }

    // ─── Internal-only accessors ────────────────────────────────────────────

    pub(crate) fn children(&self) -> &[Handle] {
        match &self.variant {
            Variant::Internal { children } => children,
            Variant::Leaf { .. } => panic!("expected internal node"),
        }
    }

    pub(crate) fn children_mut(&mut self) -> &mut ChildStore {
        match &mut self.variant {
            Variant::Internal { children } => children,
            Variant::Leaf { .. } => panic!("expected internal node"),
        }
    }

    #[inline]
    pub(crate) fn child(&self, index: usize) -> Handle {
        self.children()[index]
    }

    pub(crate) fn child_count(&self) -> usize {
        self.children().len()
    }

    // ─── Leaf-only accessors ────────────────────────────────────────────────

    pub(crate) fn values(&self) -> &[Handle] {
        match &self.variant {
            Variant::Leaf { values, .. } => values,
            Variant::Internal { .. } => panic!("expected leaf node"),
        }
    }

    fn values_mut(&mut self) -> &mut ValueStore {
        match &mut self.variant {
            Variant::Leaf { values, .. } => values,
            Variant::Internal { .. } => panic!("expected leaf node"),
        }
    }

    #[inline]
    pub(crate) fn value(&self, index: usize) -> Handle {
        self.values()[index]
    }

    pub(crate) fn prev(&self) -> Option<Handle> {
        match &self.variant {
            Variant::Leaf { prev, .. } => *prev,
            Variant::Internal { .. } => panic!("expected leaf node"),
        }
    }

    pub(crate) fn set_prev(&mut self, link: Option<Handle>) {
        match &mut self.variant {
            Variant::Leaf { prev, .. } => *prev = link,
            Variant::Internal { .. } => panic!("expected leaf node"),
        }
    }

    pub(crate) fn next(&self) -> Option<Handle> {
        match &self.variant {
            Variant::Leaf { next, .. } => *next,
            Variant::Internal { .. } => panic!("expected leaf node"),
        }
    }

    pub(crate) fn set_next(&mut self, link: Option<Handle>) {
        match &mut self.variant {
            Variant::Leaf { next, .. } => *next = link,
            Variant::Internal { .. } => panic!("expected leaf node"),
        }
    }

    /// Inserts a key/value pair at `index` in a leaf.
    pub(crate) fn insert_entry(&mut self, index: usize, key: K, value: Handle) {
        self.keys.insert(index, key);
        self.values_mut().insert(index, value);
    }

    /// Removes the key/value pair at `index` in a leaf.
    pub(crate) fn remove_entry(&mut self, index: usize) -> (K, Handle) {
        let key = self.keys.remove(index);
        let value = self.values_mut().remove(index);
        (key, value)
    }

    pub(crate) fn push_entry(&mut self, key: K, value: Handle) {
        self.keys.push(key);
        self.values_mut().push(value);
    }

    pub(crate) fn push_entry_front(&mut self, key: K, value: Handle) {
        self.insert_entry(0, key, value);
    }

    pub(crate) fn pop_entry(&mut self) -> Option<(K, Handle)> {
        let key = self.keys.pop()?;
        let value = self.values_mut().pop().expect("leaf keys/values out of sync");
        Some((key, value))
    }

    pub(crate) fn pop_entry_front(&mut self) -> Option<(K, Handle)> {
        if self.keys.is_empty() {
            None
        } else {
            Some(self.remove_entry(0))
        }
    }

    /// Moves the suffix starting at `at` into a fresh right leaf; the caller
    /// wires up the sibling chain and parent.
    pub(crate) fn split_leaf_at(&mut self, at: usize, label: A) -> Self {
        let keys: KeyStore<K> = self.keys.drain(at..).collect();
        let values: ValueStore = self.values_mut().drain(at..).collect();
        Self {
            keys,
            label,
            parent: None,
            index_in_parent: 0,
            variant: Variant::Leaf {
                values,
                prev: None,
                next: None,
            },
        }
    }

    /// Moves keys after `at` and children after slot `at` into a fresh right
    /// internal node, discarding the key at `at` (it is pushed up into the
    /// parent by the caller). The caller reparents the moved children.
    pub(crate) fn split_internal_at(&mut self, at: usize, label: A) -> Self {
        let keys: KeyStore<K> = self.keys.drain(at + 1..).collect();
        let children: ChildStore = self.children_mut().drain(at + 1..).collect();
        self.keys.truncate(at);
        Self {
            keys,
            label,
            parent: None,
            index_in_parent: 0,
            variant: Variant::Internal { children },
        }
    }

    /// Appends a fused right sibling's entries. Leaf variant only; the
    /// caller fixes the sibling chain and the parent's key/child slots.
    pub(crate) fn absorb_leaf(&mut self, right: Self) {
        let Variant::Leaf { values, next, .. } = right.variant else {
            panic!("expected leaf node");
        };
        self.keys.extend(right.keys);
        self.values_mut().extend(values);
        self.set_next(next);
    }

    /// Decomposes a leaf into its keys, value handles, and next-leaf link,
    /// for owned iteration.
    pub(crate) fn into_leaf_parts(self) -> (KeyStore<K>, ValueStore, Option<Handle>) {
        let Variant::Leaf { values, next, .. } = self.variant else {
            panic!("expected leaf node");
        };
        (self.keys, values, next)
    }

    /// Appends a fused right sibling's keys and children, with the sunk
    /// parent separator between the two key runs. Internal variant only; the
    /// caller reparents the moved children and fixes the parent's slots.
    pub(crate) fn absorb_internal(&mut self, separator: K, right: Self) {
        let Variant::Internal { children } = right.variant else {
            panic!("expected internal node");
        };
        self.keys.push(separator);
        self.keys.extend(right.keys);
        self.children_mut().extend(children);
    }
}
