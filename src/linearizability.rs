//! Wing & Gong style linearizability checking for recorded map histories.
//!
//! A history is linearizable if its operations can be put in one total order that
//! respects real time (an operation that returned before another was invoked comes
//! first) and in which every result matches a sequential map.
#![allow(clippy::arithmetic_side_effects, clippy::indexing_slicing)]

use std::collections::{BTreeMap, HashSet};

/// An operation issued against the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Get(i32),
    Put(i32, i32),
    Remove(i32),
}

impl Op {
    /// Key the operation touches.
    const fn key(self) -> i32 {
        match self {
            Self::Get(key) | Self::Put(key, _) | Self::Remove(key) => key,
        }
    }

    /// Applies the operation to the sequential model and returns its result.
    fn apply(self, model: &mut BTreeMap<i32, i32>) -> i32 {
        match self {
            Self::Get(key) => model.get(&key).copied(),
            Self::Put(key, value) => model.insert(key, value),
            Self::Remove(key) => model.remove(&key),
        }
        .unwrap_or(0)
    }
}

/// One completed call, stamped with a shared logical clock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Event {
    pub(crate) op: Op,
    pub(crate) result: i32,
    pub(crate) invoked: u64,
    pub(crate) returned: u64,
}

/// Checks whether `history` (at most 64 events) is linearizable against a map.
pub(crate) fn check(history: &[Event]) -> bool {
    assert!(history.len() <= 64, "history too long for the pending bitmask");
    let pending = if history.len() == 64 { u64::MAX } else { (1_u64 << history.len()) - 1 };
    search(history, pending, &mut BTreeMap::new(), &mut HashSet::new())
}

/// Depth-first search over linearization prefixes, memoizing dead ends.
fn search(
    history: &[Event],
    pending: u64,
    model: &mut BTreeMap<i32, i32>,
    dead: &mut HashSet<(u64, Vec<(i32, i32)>)>,
) -> bool {
    if pending == 0 {
        return true;
    }
    let state = (pending, model.iter().map(|(&key, &value)| (key, value)).collect::<Vec<_>>());
    if dead.contains(&state) {
        return false;
    }

    // Only events invoked before the earliest pending return can go next.
    let horizon = history
        .iter()
        .enumerate()
        .filter(|&(index, _)| pending & (1 << index) != 0)
        .map(|(_, event)| event.returned)
        .min()
        .unwrap_or(u64::MAX);

    for (index, event) in history.iter().enumerate() {
        if pending & (1 << index) == 0 || event.invoked > horizon {
            continue;
        }
        let key = event.op.key();
        let before = model.get(&key).copied();
        if event.op.apply(model) == event.result
            && search(history, pending & !(1 << index), model, dead)
        {
            return true;
        }
        match before {
            Some(value) => model.insert(key, value),
            None => model.remove(&key),
        };
    }

    dead.insert(state);
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(op: Op, result: i32, invoked: u64, returned: u64) -> Event {
        Event { op, result, invoked, returned }
    }

    #[test]
    fn accepts_sequential_history() {
        let history = [
            event(Op::Put(1, 5), 0, 0, 1),
            event(Op::Get(1), 5, 2, 3),
            event(Op::Remove(1), 5, 4, 5),
            event(Op::Get(1), 0, 6, 7),
        ];
        assert!(check(&history));
    }

    #[test]
    fn accepts_overlapping_reorder() {
        // The get overlaps the put, so it may see the new value.
        let history = [event(Op::Get(1), 5, 0, 3), event(Op::Put(1, 5), 0, 1, 2)];
        assert!(check(&history));
    }

    #[test]
    fn rejects_stale_read() {
        // The put finished before the get started, so reading 0 is impossible.
        let history = [event(Op::Put(1, 5), 0, 0, 1), event(Op::Get(1), 0, 2, 3)];
        assert!(!check(&history));
    }

    #[test]
    fn rejects_double_removal() {
        let history = [
            event(Op::Put(2, 9), 0, 0, 1),
            event(Op::Remove(2), 9, 2, 5),
            event(Op::Remove(2), 9, 3, 6),
        ];
        assert!(!check(&history));
    }
}
