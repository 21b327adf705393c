use crossbeam_epoch::{self as epoch, Atomic, Guard, Shared};
use std::fmt;
use std::sync::atomic::Ordering;

use crate::cell::{self, TOMBSTONE};
use crate::error::MapError;
use crate::table::{Attempt, Table};

/// Capacity of a map created with [`LockFreeIntMap::new`].
pub const INITIAL_CAPACITY: usize = 2;

/// Largest capacity accepted by [`LockFreeIntMap::with_capacity`].
pub const MAX_CAPACITY: usize = 1 << 30;

/// A non-blocking hash map from positive `i32` keys to positive `i32` values.
///
/// Lookups, inserts, updates and removals run concurrently from any number of threads
/// without locks. When a table runs out of room, the threads that hit the wall migrate
/// it into a table twice as large, cooperatively and slot by slot, while the others
/// keep reading.
///
/// Keys must be positive; values must lie in the open range `(0, TOMBSTONE)`.
/// A missing key reads as 0.
pub struct LockFreeIntMap {
    /// The generation new operations start from.
    current: Atomic<Table>,
}

impl fmt::Debug for LockFreeIntMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeIntMap").field("capacity", &self.capacity()).finish()
    }
}

impl Default for LockFreeIntMap {
    fn default() -> Self {
        Self::new()
    }
}

impl LockFreeIntMap {
    /// Creates an empty map with the minimal initial capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Creates an empty map with room for `capacity` slots before the first growth.
    ///
    /// The capacity is rounded up to a power of two and clamped to
    /// `[INITIAL_CAPACITY, MAX_CAPACITY]`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(INITIAL_CAPACITY, MAX_CAPACITY).next_power_of_two();
        Self { current: Atomic::new(Table::new(capacity)) }
    }

    /// Number of slots in the generation the map currently points at.
    pub fn capacity(&self) -> usize {
        let guard = epoch::pin();
        // SAFETY: the current table is only retired after `current` stops pointing at it,
        // and then freed once our pin is released.
        let table = unsafe { self.current.load(Ordering::SeqCst, &guard).deref() };
        table.capacity()
    }

    /// Returns the value stored for `key`, or 0 if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidKey`] if `key` is not positive.
    pub fn get(&self, key: i32) -> Result<i32, MapError> {
        check_key(key)?;
        let guard = epoch::pin();
        let mut table = self.current.load(Ordering::SeqCst, &guard);
        loop {
            // SAFETY: every generation reachable from `current` under our pin stays
            // allocated until the pin is released.
            let generation = unsafe { table.deref() };
            match generation.get(key) {
                Attempt::Done(value) => return Ok(value),
                Attempt::Forwarded => {
                    let next = generation.successor(&guard);
                    table = if next.is_null() { self.current.load(Ordering::SeqCst, &guard) } else { next };
                }
            }
        }
    }

    /// Stores `value` for `key` and returns the previous value, or 0.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidKey`] if `key` is not positive, and
    /// [`MapError::InvalidValue`] unless `0 < value < TOMBSTONE`.
    pub fn put(&self, key: i32, value: i32) -> Result<i32, MapError> {
        check_key(key)?;
        if !cell::is_live(value) {
            return Err(MapError::InvalidValue(value));
        }
        Ok(self.store(key, value))
    }

    /// Removes `key` and returns the value it had, or 0.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidKey`] if `key` is not positive.
    pub fn remove(&self, key: i32) -> Result<i32, MapError> {
        check_key(key)?;
        Ok(self.store(key, TOMBSTONE))
    }

    /// Writes a live value or a tombstone, growing the map as often as needed.
    fn store(&self, key: i32, value: i32) -> i32 {
        let guard = epoch::pin();
        let mut table = self.current.load(Ordering::SeqCst, &guard);
        loop {
            // SAFETY: see `get`.
            match unsafe { table.deref() }.put(key, value) {
                Attempt::Done(previous) => return previous,
                Attempt::Forwarded => table = self.help_migrate(table, &guard),
            }
        }
    }

    /// Sweeps `table` into its successor, then tries to make the successor current.
    /// Losing the race to advance is fine: someone else already did.
    fn help_migrate<'g>(&self, table: Shared<'g, Table>, guard: &'g Guard) -> Shared<'g, Table> {
        // SAFETY: see `get`.
        let next = unsafe { table.deref() }.migrate(guard);
        if self
            .current
            .compare_exchange(table, next, Ordering::SeqCst, Ordering::SeqCst, guard)
            .is_ok()
        {
            // SAFETY: see `get`.
            let capacity = unsafe { next.deref() }.capacity();
            tracing::debug!(capacity, "advanced current table");
            // SAFETY: `next` has replaced `table`, so new operations cannot reach it any
            // more; threads still pinned keep it alive until they unpin.
            unsafe { guard.defer_destroy(table) };
        }
        next
    }
}

impl Drop for LockFreeIntMap {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out operations in flight. Generations older than
        // `current` were already handed to the collector; the rest are only reachable
        // from here.
        let guard = unsafe { epoch::unprotected() };
        let mut table = self.current.swap(Shared::null(), Ordering::SeqCst, guard);
        while !table.is_null() {
            // SAFETY: as above, nobody else owns this generation.
            let owned = unsafe { table.into_owned() };
            table = owned.successor(guard);
            drop(owned);
        }
    }
}

/// Rejects non-positive keys.
const fn check_key(key: i32) -> Result<(), MapError> {
    if key > 0 { Ok(()) } else { Err(MapError::InvalidKey(key)) }
}
