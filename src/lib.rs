//! # Lock-free Int Map
//!
//! A non-blocking, incrementally resizable hash map from positive `i32` keys to
//! positive `i32` values.
//!
//! The map is an open-addressed table with linear probing. Every mutation is a single
//! compare-and-swap on one cell, so no thread ever waits on another. When a table gets
//! too crowded the threads that run into it migrate it into a table twice as large,
//! cooperatively and one slot at a time, while reads keep being served.
//!
//! ## Basic Usage
//!
//! ```rust
//! use lockfree_intmap::LockFreeIntMap;
//!
//! let map = LockFreeIntMap::new();
//!
//! assert_eq!(map.put(1, 10), Ok(0));
//! assert_eq!(map.get(1), Ok(10));
//!
//! // Updates return the previous value
//! assert_eq!(map.put(1, 11), Ok(10));
//!
//! // Missing keys read as zero
//! assert_eq!(map.remove(1), Ok(11));
//! assert_eq!(map.get(1), Ok(0));
//!
//! // Keys must be positive
//! assert!(map.get(0).is_err());
//! ```
//!
//! ## Concurrent Usage
//!
//! ```rust
//! use lockfree_intmap::LockFreeIntMap;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let map = Arc::new(LockFreeIntMap::new());
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|t| {
//!         let map = Arc::clone(&map);
//!         thread::spawn(move || {
//!             for i in 1..=250 {
//!                 map.put(t * 1000 + i, i).unwrap();
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! // Growth never loses an entry
//! for t in 0..4 {
//!     for i in 1..=250 {
//!         assert_eq!(map.get(t * 1000 + i), Ok(i));
//!     }
//! }
//! ```

/// Packed cell encoding and slot hashing
mod cell;
/// Caller-contract errors
mod error;
/// Recorded-history checker used by the concurrency tests
#[cfg(test)]
mod linearizability;
/// The public map handle and generation switching
mod map;
/// One generation of slots and its migration sweep
mod table;

pub use cell::TOMBSTONE;
pub use error::MapError;
pub use map::{INITIAL_CAPACITY, LockFreeIntMap, MAX_CAPACITY};
