use super::handle::Handle;

/// Slot arena with a free list.
///
/// Nodes retired during fuses and root collapses release their slot for
/// reuse, so long-lived trees under churn do not grow the arena unboundedly.
#[derive(Clone)]
pub(crate) struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<Handle>,
}

impl<T> Arena<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) const fn len(&self) -> usize {
        self.slots.len().saturating_sub(self.free.len())
    }

    pub(crate) fn alloc(&mut self, element: T) -> Handle {
        if let Some(h) = self.free.pop() {
            self.slots[h.to_index()] = Some(element);
            h
        } else {
            // Strict less-than: at most Handle::MAX + 1 slots after the push,
            // so every slot index stays representable.
            assert!(
                self.slots.len() < Handle::MAX,
                "`Arena::alloc()` - arena is at maximum capacity ({})",
                Handle::MAX
            );
            self.slots.push(Some(element));
            Handle::from_index(self.slots.len() - 1)
        }
    }

    #[inline]
    pub(crate) fn get(&self, handle: Handle) -> &T {
        self.slots[handle.to_index()].as_ref().expect("`Arena::get()` - `handle` is invalid!")
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, handle: Handle) -> &mut T {
        self.slots[handle.to_index()].as_mut().expect("`Arena::get_mut()` - `handle` is invalid!")
    }

    /// Removes the element, releasing the slot for reuse.
    pub(crate) fn take(&mut self, handle: Handle) -> T {
        let element = self.slots[handle.to_index()].take().expect("`Arena::take()` - `handle` is invalid!");
        self.free.push(handle);
        element
    }

    pub(crate) fn free(&mut self, handle: Handle) {
        drop(self.take(handle));
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Debug)]
    enum Op {
        Alloc(u32),
        Mutate(usize, u32),
        Take(usize),
        Free(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => any::<u32>().prop_map(Op::Alloc),
            2 => (any::<usize>(), any::<u32>()).prop_map(|(i, v)| Op::Mutate(i, v)),
            2 => any::<usize>().prop_map(Op::Take),
            1 => any::<usize>().prop_map(Op::Free),
        ]
    }

    proptest! {
        /// Runs random alloc/mutate/take/free sequences against a shadow list
        /// of live (handle, value) pairs; every live handle must keep
        /// resolving to its value even as freed slots are reused.
        #[test]
        fn handles_stay_stable(ops in prop::collection::vec(op_strategy(), 0..200)) {
            let mut arena: Arena<u32> = Arena::new();
            let mut live: Vec<(Handle, u32)> = Vec::new();

            for op in ops {
                match op {
                    Op::Alloc(value) => {
                        live.push((arena.alloc(value), value));
                    }
                    Op::Mutate(which, value) => {
                        if let Some(entry) = pick_mut(&mut live, which) {
                            *arena.get_mut(entry.0) = value;
                            entry.1 = value;
                        }
                    }
                    Op::Take(which) => {
                        if !live.is_empty() {
                            let (handle, value) = live.swap_remove(which % live.len());
                            prop_assert_eq!(arena.take(handle), value);
                        }
                    }
                    Op::Free(which) => {
                        if !live.is_empty() {
                            let (handle, _) = live.swap_remove(which % live.len());
                            arena.free(handle);
                        }
                    }
                }

                prop_assert_eq!(arena.len(), live.len());
                for &(handle, value) in &live {
                    prop_assert_eq!(*arena.get(handle), value);
                }
            }
        }
    }

    fn pick_mut(live: &mut [(Handle, u32)], which: usize) -> Option<&mut (Handle, u32)> {
        if live.is_empty() {
            None
        } else {
            let index = which % live.len();
            Some(&mut live[index])
        }
    }

    #[test]
    #[should_panic(expected = "`Arena::get()` - `handle` is invalid!")]
    fn stale_handle_panics() {
        let mut arena: Arena<u32> = Arena::new();
        let handle = arena.alloc(7);
        arena.free(handle);
        let _ = arena.get(handle);
    }
}
