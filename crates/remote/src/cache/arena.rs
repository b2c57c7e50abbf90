//! Fixed-size buffer arena backing the block cache.

/// Index of a buffer inside a [`SlotArena`].
pub(crate) type SlotId = usize;

/// Arena of block-sized buffers, handed out by slot index.
///
/// Buffers are allocated lazily, at most `capacity` of them, and are never
/// freed until the arena is dropped. A released slot goes onto the free list
/// with its old contents intact: whoever acquires it next must overwrite every
/// byte it intends to expose.
pub(crate) struct SlotArena {
    block_size: usize,
    capacity: usize,
    slots: Vec<Box<[u8]>>,
    free: Vec<SlotId>,
}

impl SlotArena {
    pub(crate) fn new(capacity: usize, block_size: usize) -> Self {
        Self {
            block_size,
            capacity,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Take a slot off the free list, allocating a new buffer when the free
    /// list is empty.
    ///
    /// The arena never grows past `capacity`: the cache evicts (and releases)
    /// a slot before acquiring once every slot is in use.
    pub(crate) fn acquire(&mut self) -> SlotId {
        if let Some(slot) = self.free.pop() {
            return slot;
        }
        debug_assert!(self.slots.len() < self.capacity, "arena exhausted at {} slots", self.capacity);
        self.slots.push(vec![0; self.block_size].into_boxed_slice());
        self.slots.len() - 1
    }

    /// Return a slot to the free list. The slot must not be referenced by the
    /// cache index any more.
    pub(crate) fn release(&mut self, slot: SlotId) {
        debug_assert!(slot < self.slots.len(), "slot {slot} was never allocated");
        debug_assert!(!self.free.contains(&slot), "slot {slot} released twice");
        self.free.push(slot);
    }

    pub(crate) fn get(&self, slot: SlotId) -> &[u8] {
        &self.slots[slot]
    }

    pub(crate) fn get_mut(&mut self, slot: SlotId) -> &mut [u8] {
        &mut self.slots[slot]
    }

    /// Number of buffers allocated so far.
    #[cfg(test)]
    pub(crate) fn allocated(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_allocates_lazily() {
        let mut arena = SlotArena::new(2, 16);
        assert_eq!(arena.allocated(), 0);
        assert_eq!(arena.acquire(), 0);
        assert_eq!(arena.acquire(), 1);
        assert_eq!(arena.allocated(), 2);
        assert_eq!(arena.get(1).len(), 16);
    }

    #[test]
    fn test_released_slot_keeps_contents() {
        let mut arena = SlotArena::new(1, 4);
        let slot = arena.acquire();
        arena.get_mut(slot).copy_from_slice(b"AAAA");
        arena.release(slot);
        let reused = arena.acquire();
        assert_eq!(reused, slot);
        // Not zeroed: the next owner is responsible for overwriting.
        assert_eq!(arena.get(reused), b"AAAA");
        assert_eq!(arena.allocated(), 1);
    }
}
