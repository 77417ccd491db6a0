//! Generational arena.
//!
//! Slots are recycled the same way task ids are: freed slots go onto a stack and are handed
//! out again before the arena grows. Every slot carries a generation counter that is bumped
//! on removal, so an [Index] held across a removal can never resolve to the slot's next
//! occupant.
use alloc::vec::Vec;

/// Handle into an [Arena]. Stale indices resolve to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Index {
    slot: usize,
    generation: u64,
}

impl Index {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    value: Option<T>,
}

#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    recycled: Vec<usize>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub const fn new() -> Arena<T> {
        Arena {
            slots: Vec::new(),
            recycled: Vec::new(),
            len: 0,
        }
    }

    /// Store `value`, reusing a freed slot if one is available.
    pub fn insert(&mut self, value: T) -> Index {
        self.len += 1;
        if let Some(slot) = self.recycled.pop() {
            let entry = &mut self.slots[slot];
            entry.value = Some(value);
            Index {
                slot,
                generation: entry.generation,
            }
        } else {
            let slot = self.slots.len();
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            Index {
                slot,
                generation: 0,
            }
        }
    }

    /// Remove the value at `index`. Returns `None` for stale or vacant indices.
    pub fn remove(&mut self, index: Index) -> Option<T> {
        let entry = self.slots.get_mut(index.slot)?;
        if entry.generation != index.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation += 1;
        self.recycled.push(index.slot);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, index: Index) -> Option<&T> {
        let entry = self.slots.get(index.slot)?;
        if entry.generation != index.generation {
            return None;
        }
        entry.value.as_ref()
    }

    pub fn get_mut(&mut self, index: Index) -> Option<&mut T> {
        let entry = self.slots.get_mut(index.slot)?;
        if entry.generation != index.generation {
            return None;
        }
        entry.value.as_mut()
    }

    pub fn contains(&self, index: Index) -> bool {
        self.get(index).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.slots.iter().enumerate().filter_map(|(slot, entry)| {
            entry.value.as_ref().map(|value| {
                (
                    Index {
                        slot,
                        generation: entry.generation,
                    },
                    value,
                )
            })
        })
    }
}
