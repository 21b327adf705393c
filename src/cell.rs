//! Cell encoding for the slot array.
//!
//! A table stores each slot as two adjacent `i32` cells: the key cell at an even
//! offset and the value cell right after it. Every state transition of a slot is a
//! single-word CAS on one of those cells, so the migration flag is packed into the
//! sign bit of the value word instead of living in a separate cell.

/// Key cell content of a slot that has never been claimed.
pub(crate) const EMPTY_KEY: i32 = 0;

/// Value cell content of a slot whose value was never written.
pub(crate) const EMPTY_VALUE: i32 = 0;

/// Reserved value marking a logically removed key.
pub const TOMBSTONE: i32 = i32::MAX;

/// Sign bit: set on a value cell once the slot is frozen for migration. On its own
/// (no payload bits) it marks a slot whose migration has completed.
pub(crate) const MOVED: i32 = i32::MIN;

/// Fibonacci hashing multiplier (2^32 / golden ratio).
const MAGIC: u32 = 0x9E37_79B9;

/// Decoded view of a value cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CellState {
    /// Never written.
    Empty,
    /// Holds a live value.
    Live(i32),
    /// Key was removed.
    Tombstone,
    /// Frozen for migration, payload (live value, tombstone) not yet copied.
    Frozen(i32),
    /// Migration of this slot is complete; the next generation is authoritative.
    Retired,
}

impl CellState {
    /// Interprets a raw value cell word.
    pub(crate) const fn decode(raw: i32) -> Self {
        match raw {
            EMPTY_VALUE => Self::Empty,
            TOMBSTONE => Self::Tombstone,
            MOVED => Self::Retired,
            _ if raw & MOVED != 0 => Self::Frozen(raw & !MOVED),
            _ => Self::Live(raw),
        }
    }

    /// Whether the slot has been frozen or retired and must not be written in place.
    pub(crate) const fn is_moved(self) -> bool {
        matches!(self, Self::Frozen(_) | Self::Retired)
    }
}

/// Freezes a raw value word, keeping its payload bits.
pub(crate) const fn freeze(raw: i32) -> i32 {
    raw | MOVED
}

/// Maps a raw payload to what callers observe: live values pass through, empty and
/// tombstone payloads read as absent.
pub(crate) const fn visible(payload: i32) -> i32 {
    if is_live(payload) { payload } else { EMPTY_VALUE }
}

/// Whether `value` is a storable user value, i.e. in the open range `(0, TOMBSTONE)`.
pub(crate) const fn is_live(value: i32) -> bool {
    value > EMPTY_VALUE && value < TOMBSTONE
}

/// Home slot of `key` in a table whose capacity is `1 << (32 - shift)`.
///
/// Multiplies by the golden-ratio constant and keeps the top bits, so the result is
/// always below the capacity.
#[allow(clippy::cast_sign_loss)]
pub(crate) const fn home_slot(key: i32, shift: u32) -> usize {
    (key as u32).wrapping_mul(MAGIC).wrapping_shr(shift) as usize
}
