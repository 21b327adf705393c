//! A single generation of the map.
//!
//! A `Table` is a fixed, power-of-two array of slots plus a forward link to the next,
//! twice-as-large generation. All mutation is single-word CAS on the slot cells, and
//! the migration sweep can be run by any number of threads at once: every step looks
//! at the current cell word and only moves it forward.

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::cell::{self, CellState, EMPTY_KEY, EMPTY_VALUE, MOVED, TOMBSTONE};

/// Number of slots a put may walk past before it asks for a larger table instead of
/// claiming an empty slot further down the chain.
pub(crate) const MAX_PROBES: usize = 8;

/// A key cell and its value cell.
#[repr(C)]
struct Slot {
    /// Zero until claimed, then fixed for the lifetime of the table.
    key: AtomicI32,
    /// Packed value word, see [`CellState`].
    value: AtomicI32,
}

impl Slot {
    /// Creates an unclaimed slot
    const fn new() -> Self {
        Self { key: AtomicI32::new(EMPTY_KEY), value: AtomicI32::new(EMPTY_VALUE) }
    }

    /// Reads `(key, value)`. The value is read first: a key is always claimed before
    /// its value is written, so a non-empty value is never paired with an empty key.
    fn load(&self) -> (i32, i32) {
        let value = self.value.load(Ordering::SeqCst);
        (self.key.load(Ordering::SeqCst), value)
    }
}

/// Result of running an operation against one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attempt {
    /// Completed here; carries the observed (or previous) value, 0 when absent.
    Done(i32),
    /// This generation cannot answer; the next one must be consulted.
    Forwarded,
}

/// One generation of slots.
pub(crate) struct Table {
    /// The slot array, `capacity` entries long.
    slots: Box<[Slot]>,
    /// `capacity - 1`, for wrapping linear probes.
    mask: usize,
    /// `32 - log2(capacity)`, for the multiplicative hash.
    shift: u32,
    /// Next generation. Set at most once; never owned by this table.
    forward: Atomic<Table>,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table").field("capacity", &self.capacity()).finish_non_exhaustive()
    }
}

impl Table {
    /// Creates an empty generation with `capacity` slots (a power of two, at least 2).
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two() && capacity >= 2, "bad capacity {capacity}");
        Self {
            slots: (0..capacity).map(|_| Slot::new()).collect(),
            mask: capacity.wrapping_sub(1),
            shift: 32_u32.wrapping_sub(capacity.trailing_zeros()),
            forward: Atomic::null(),
        }
    }

    /// Number of slots
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot at `index`, wrapped into range.
    #[allow(clippy::indexing_slicing)]
    fn slot(&self, index: usize) -> &Slot {
        &self.slots[index & self.mask]
    }

    /// First slot of `key`'s probe chain.
    fn home(&self, key: i32) -> usize {
        cell::home_slot(key, self.shift)
    }

    /// Slot after `index` in a probe chain.
    const fn next_index(&self, index: usize) -> usize {
        index.wrapping_add(1) & self.mask
    }

    /// Looks `key` up in this generation only.
    ///
    /// A frozen entry is still readable with its pre-freeze payload. A retired entry,
    /// or an empty slot that has been retired, means the region has moved on.
    pub(crate) fn get(&self, key: i32) -> Attempt {
        let mut index = self.home(key);
        for _ in 0..self.capacity() {
            let (current_key, raw) = self.slot(index).load();
            let state = CellState::decode(raw);
            if current_key == EMPTY_KEY {
                return if state.is_moved() { Attempt::Forwarded } else { Attempt::Done(EMPTY_VALUE) };
            }
            if current_key == key {
                return match state {
                    CellState::Retired => Attempt::Forwarded,
                    CellState::Live(value) | CellState::Frozen(value) => {
                        Attempt::Done(cell::visible(value))
                    }
                    CellState::Empty | CellState::Tombstone => Attempt::Done(EMPTY_VALUE),
                };
            }
            index = self.next_index(index);
        }
        Attempt::Done(EMPTY_VALUE)
    }

    /// Writes `value` (a live value or [`TOMBSTONE`]) for `key` in this generation.
    ///
    /// Returns the previous live value, or 0. Asks for the next generation when the
    /// key's slot is frozen, when the chain has already been migrated, or when the
    /// first free slot lies past [`MAX_PROBES`].
    pub(crate) fn put(&self, key: i32, value: i32) -> Attempt {
        let mut index = self.home(key);
        let mut probes = 0_usize;
        while probes < self.capacity() {
            let slot = self.slot(index);
            let (current_key, raw) = slot.load();
            let state = CellState::decode(raw);

            if current_key == EMPTY_KEY {
                if state.is_moved() || probes >= MAX_PROBES {
                    return Attempt::Forwarded;
                }
                if value == TOMBSTONE {
                    // Chain ends before the key: nothing to remove.
                    return Attempt::Done(EMPTY_VALUE);
                }
                if slot.key.compare_exchange(EMPTY_KEY, key, Ordering::SeqCst, Ordering::SeqCst).is_err()
                {
                    continue;
                }
                if slot.value.compare_exchange(raw, value, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                    return Attempt::Done(cell::visible(raw));
                }
                continue;
            }

            if current_key == key {
                if state.is_moved() {
                    return Attempt::Forwarded;
                }
                if slot.value.compare_exchange(raw, value, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                    return Attempt::Done(cell::visible(raw));
                }
                continue;
            }

            index = self.next_index(index);
            probes = probes.saturating_add(1);
        }
        Attempt::Forwarded
    }

    /// Places a migrated entry. An existing value for `key` always wins, since it was
    /// either copied by another sweeper or written by a later put.
    ///
    /// Returns `false` only if the whole table holds neither `key` nor a free slot.
    fn copy(&self, key: i32, value: i32) -> bool {
        let mut index = self.home(key);
        let mut probes = 0_usize;
        while probes < self.capacity() {
            let slot = self.slot(index);
            let current_key = slot.key.load(Ordering::SeqCst);
            if current_key == EMPTY_KEY
                && slot.key.compare_exchange(EMPTY_KEY, key, Ordering::SeqCst, Ordering::SeqCst).is_err()
            {
                continue;
            }
            if current_key == EMPTY_KEY || current_key == key {
                let _ = slot.value.compare_exchange(
                    EMPTY_VALUE,
                    value,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                return true;
            }
            index = self.next_index(index);
            probes = probes.saturating_add(1);
        }
        false
    }

    /// Next generation, or null if growth has not started.
    pub(crate) fn successor<'g>(&self, guard: &'g Guard) -> Shared<'g, Self> {
        self.forward.load(Ordering::SeqCst, guard)
    }

    /// Returns the next generation, installing a fresh one of double capacity if none
    /// exists yet. Racing threads all end up with the single installed table.
    fn grow<'g>(&self, guard: &'g Guard) -> Shared<'g, Self> {
        let next = self.successor(guard);
        if !next.is_null() {
            return next;
        }

        let capacity = self.capacity().saturating_mul(2);
        let fresh = Owned::new(Self::new(capacity));
        match self.forward.compare_exchange(
            Shared::null(),
            fresh,
            Ordering::SeqCst,
            Ordering::SeqCst,
            guard,
        ) {
            Ok(installed) => {
                tracing::debug!(from = self.capacity(), to = capacity, "installed next generation");
                installed
            }
            Err(lost) => lost.current,
        }
    }

    /// Moves every entry of this generation into the next one and returns it.
    ///
    /// Each slot goes live -> frozen -> retired. Any number of threads may sweep at the
    /// same time; whoever gets to a slot first does the work and the rest observe it.
    ///
    /// # Panics
    ///
    /// Panics if the next generation refuses a migrated entry, which would mean an
    /// entry is about to be lost.
    pub(crate) fn migrate<'g>(&self, guard: &'g Guard) -> Shared<'g, Self> {
        let next = self.grow(guard);
        // SAFETY: `next` was read under `guard` and is only ever freed through the
        // epoch collector, after every current pin (including ours) is released.
        let destination = unsafe { next.deref() };

        for slot in &*self.slots {
            loop {
                let raw = slot.value.load(Ordering::SeqCst);
                match CellState::decode(raw) {
                    CellState::Retired => break,
                    CellState::Frozen(payload) => {
                        if cell::is_live(payload) {
                            let key = slot.key.load(Ordering::SeqCst);
                            assert!(
                                destination.copy(key, payload),
                                "next generation ({} slots) refused key {key}",
                                destination.capacity()
                            );
                        }
                        slot.value.store(MOVED, Ordering::SeqCst);
                        break;
                    }
                    CellState::Empty | CellState::Live(_) | CellState::Tombstone => {
                        let _ = slot.value.compare_exchange(
                            raw,
                            cell::freeze(raw),
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        );
                    }
                }
            }
        }

        tracing::trace!(capacity = self.capacity(), "migration sweep finished");
        next
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crossbeam_epoch as epoch;
    use std::sync::Arc;
    use std::thread;

    /// Frees a generation that a test grew by hand.
    fn free(next: Shared<'_, Table>) {
        // SAFETY: tests hold the only reference to the generations they create.
        drop(unsafe { next.into_owned() });
    }

    #[test]
    fn test_put_and_get() {
        let table = Table::new(4);
        assert_eq!(table.get(1), Attempt::Done(0));
        assert_eq!(table.put(1, 10), Attempt::Done(0));
        assert_eq!(table.put(2, 20), Attempt::Done(0));
        assert_eq!(table.get(1), Attempt::Done(10));
        assert_eq!(table.get(2), Attempt::Done(20));
        assert_eq!(table.put(1, 11), Attempt::Done(10));
        assert_eq!(table.get(1), Attempt::Done(11));
    }

    #[test]
    fn test_tombstone() {
        let table = Table::new(4);
        assert_eq!(table.put(3, TOMBSTONE), Attempt::Done(0));
        // Removing an absent key does not claim a slot.
        assert!(table.slots.iter().all(|slot| slot.key.load(Ordering::SeqCst) == EMPTY_KEY));

        table.put(3, 30);
        assert_eq!(table.put(3, TOMBSTONE), Attempt::Done(30));
        assert_eq!(table.get(3), Attempt::Done(0));
        assert_eq!(table.put(3, TOMBSTONE), Attempt::Done(0));
        assert_eq!(table.put(3, 31), Attempt::Done(0));
        assert_eq!(table.get(3), Attempt::Done(31));
    }

    #[test]
    fn test_full_table_asks_for_growth() {
        let table = Table::new(2);
        assert_eq!(table.put(1, 1), Attempt::Done(0));
        assert_eq!(table.put(2, 2), Attempt::Done(0));
        assert_eq!(table.put(3, 3), Attempt::Forwarded);
        // Existing keys can still be updated in place.
        assert_eq!(table.put(2, 22), Attempt::Done(2));
    }

    #[test]
    fn test_probe_bound_asks_for_growth() {
        let table = Table::new(64);
        let colliding: Vec<i32> = (1..).filter(|&key| table.home(key) == 0).take(9).collect();

        for &key in &colliding[..MAX_PROBES] {
            assert_eq!(table.put(key, key), Attempt::Done(0));
        }
        // The ninth key would land past the bound even though the table is mostly empty.
        assert_eq!(table.put(colliding[MAX_PROBES], 1), Attempt::Forwarded);
        // Keys already placed are still found.
        assert_eq!(table.get(colliding[MAX_PROBES - 1]), Attempt::Done(colliding[MAX_PROBES - 1]));
    }

    #[test]
    fn test_migrate_moves_live_entries() {
        let guard = epoch::pin();
        let table = Table::new(2);
        table.put(1, 10);
        table.put(2, 20);
        table.put(2, TOMBSTONE);

        let next = table.migrate(&guard);
        let bigger = unsafe { next.deref() };
        assert_eq!(bigger.capacity(), 4);
        assert_eq!(bigger.get(1), Attempt::Done(10));
        assert_eq!(bigger.get(2), Attempt::Done(0));

        // Every slot of the old generation is retired.
        assert!(table.slots.iter().all(|slot| slot.value.load(Ordering::SeqCst) == MOVED));
        assert_eq!(table.get(1), Attempt::Forwarded);
        assert_eq!(table.get(2), Attempt::Forwarded);
        assert_eq!(table.put(1, 11), Attempt::Forwarded);
        assert_eq!(table.put(7, 70), Attempt::Forwarded);

        // A second sweep is a no-op that yields the same generation.
        assert_eq!(table.migrate(&guard), next);
        free(next);
    }

    #[test]
    fn test_frozen_entry_stays_readable() {
        let table = Table::new(4);
        table.put(9, 90);
        let slot = table.slots.iter().find(|slot| slot.key.load(Ordering::SeqCst) == 9).unwrap();
        slot.value.store(cell::freeze(90), Ordering::SeqCst);

        assert_eq!(table.get(9), Attempt::Done(90));
        assert_eq!(table.put(9, 91), Attempt::Forwarded);
    }

    #[test]
    fn test_copy_keeps_first_writer() {
        let table = Table::new(4);
        assert!(table.copy(5, 50));
        assert!(table.copy(5, 51));
        assert_eq!(table.get(5), Attempt::Done(50));

        table.put(6, 60);
        assert!(table.copy(6, 1));
        assert_eq!(table.get(6), Attempt::Done(60));
    }

    #[test]
    fn test_concurrent_sweepers_agree() {
        let table = Arc::new(Table::new(256));
        for key in 1..=100 {
            if table.put(key, key * 3) == Attempt::Forwarded {
                break;
            }
        }
        let expected: Vec<(i32, Attempt)> = (1..=100).map(|key| (key, table.get(key))).collect();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    let guard = epoch::pin();
                    table.migrate(&guard).as_raw() as usize
                })
            })
            .collect();
        let installed: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(installed.windows(2).all(|pair| pair[0] == pair[1]));

        let guard = epoch::pin();
        let next = table.successor(&guard);
        let bigger = unsafe { next.deref() };
        for (key, attempt) in expected {
            assert_eq!(bigger.get(key), attempt, "key {key}");
        }
        free(next);
    }
}
