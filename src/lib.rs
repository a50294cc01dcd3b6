#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod index_hash_table;

/// A keyed front end for [`IndexHashTable`].
///
/// This module provides `KeyedIndex`, which hashes keys from a caller-owned
/// list with a configurable hasher and offers insert-if-absent and lookup by
/// key content.
pub mod keyed_index;

mod oops;

pub use index_hash_table::IndexHashTable;
pub use index_hash_table::MAX_PROBE_DISTANCE;
pub use keyed_index::KeyedIndex;
pub use oops::Oops;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// The hasher builder used by [`DefaultKeyedIndex`].
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// The hasher builder used by [`DefaultKeyedIndex`].
        pub type DefaultHashBuilder = std::collections::hash_map::RandomState;
    }
}

/// A [`KeyedIndex`] using [`DefaultHashBuilder`].
#[cfg(any(feature = "std", feature = "foldhash"))]
pub type DefaultKeyedIndex = KeyedIndex<DefaultHashBuilder>;
