use core::borrow::Borrow;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;

use crate::index_hash_table::IndexHashTable;
use crate::index_hash_table::Iter;

/// An [`IndexHashTable`] paired with the hasher for the keys it indexes.
///
/// The keys live in a list the caller owns and passes to every operation, so
/// the list can keep growing between calls. Every index handed to the table
/// must be in bounds for the list passed alongside it, and the list must keep
/// the same key at each stored position for as long as the index is stored.
///
/// # Performance Characteristics
///
/// - **Memory**: 5 bytes per slot (a `u32` index and a probe-distance byte),
///   with slots at a 3/4 load factor.
#[derive(Clone)]
pub struct KeyedIndex<S> {
    table: IndexHashTable,
    hash_builder: S,
}

impl<S> Debug for KeyedIndex<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.table.iter()).finish()
    }
}

impl<S> KeyedIndex<S>
where
    S: BuildHasher,
{
    /// Creates a new keyed index with the given hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(feature = "std")]
    /// # {
    /// use std::collections::hash_map::RandomState;
    ///
    /// use index_hash::KeyedIndex;
    ///
    /// let index = KeyedIndex::with_hasher(RandomState::new());
    /// assert!(index.is_empty());
    /// # }
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates a new keyed index sized for `capacity` keys, with the given
    /// hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(feature = "std")]
    /// # {
    /// use std::collections::hash_map::RandomState;
    ///
    /// use index_hash::KeyedIndex;
    ///
    /// let index = KeyedIndex::with_capacity_and_hasher(100, RandomState::new());
    /// assert!(index.capacity() >= 100);
    /// # }
    /// ```
    pub fn with_capacity_and_hasher(capacity: u32, hash_builder: S) -> Self {
        Self {
            table: IndexHashTable::build(capacity),
            hash_builder,
        }
    }

    /// Hashes `key` the way this index does.
    pub fn hash_key<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        self.hash_builder.hash_one(key)
    }

    /// Stores `index` unless a key equal to `list[index]` is already stored.
    ///
    /// Returns `true` if the index was inserted.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds for `list`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use index_hash::DefaultKeyedIndex;
    ///
    /// let list = ["a", "b", "a"];
    /// let mut index = DefaultKeyedIndex::new();
    /// assert!(index.insert(&list, 0));
    /// assert!(index.insert(&list, 1));
    /// assert!(!index.insert(&list, 2));
    /// assert_eq!(index.len(), 2);
    /// # }
    /// ```
    pub fn insert<K>(&mut self, list: &[K], index: u32) -> bool
    where
        K: Hash + Eq,
    {
        let key = &list[index as usize];
        let hash = self.hash_key(key);
        if self
            .table
            .find(hash, |i| list[i as usize] == *key)
            .is_some()
        {
            return false;
        }

        let hash_builder = &self.hash_builder;
        self.table
            .insert_unconditional(hash, index, |i| hash_builder.hash_one(&list[i as usize]));
        true
    }

    /// Stores `index` without checking whether an equal key is present.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds for `list`, or if `index` itself is
    /// already stored.
    pub fn insert_nocheck<K>(&mut self, list: &[K], index: u32)
    where
        K: Hash,
    {
        let hash = self.hash_key(&list[index as usize]);
        let hash_builder = &self.hash_builder;
        self.table
            .insert_unconditional(hash, index, |i| hash_builder.hash_one(&list[i as usize]));
    }

    /// Returns the stored index of the key equal to `key`, if any.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use index_hash::DefaultKeyedIndex;
    ///
    /// let list = vec!["red".to_string(), "green".to_string()];
    /// let mut index = DefaultKeyedIndex::new();
    /// index.insert(&list, 0);
    /// index.insert(&list, 1);
    ///
    /// assert_eq!(index.fetch(&list, "green"), Some(1));
    /// assert_eq!(index.fetch(&list, "blue"), None);
    /// # }
    /// ```
    pub fn fetch<K, Q>(&self, list: &[K], key: &Q) -> Option<u32>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_key(key);
        self.table.find(hash, |i| {
            let candidate: &Q = list[i as usize].borrow();
            candidate == key
        })
    }

    /// Returns `true` if a key equal to `key` is stored.
    pub fn contains_key<K, Q>(&self, list: &[K], key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.fetch(list, key).is_some()
    }
}

impl<S> KeyedIndex<S> {
    /// Returns the number of stored indices.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if no indices are stored.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns how many indices fit before the next insertion grows the
    /// table.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns an iterator over the stored indices in bucket order.
    pub fn iter(&self) -> Iter<'_> {
        self.table.iter()
    }

    /// Returns the underlying table.
    pub fn table(&self) -> &IndexHashTable {
        &self.table
    }

    /// Returns the hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Releases the table's allocation. See [`IndexHashTable::demolish`].
    pub fn demolish(&mut self) {
        self.table.demolish();
    }
}

impl<S> KeyedIndex<S>
where
    S: BuildHasher + Default,
{
    /// Creates a new keyed index using the default hasher builder.
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }

    /// Creates a new keyed index sized for `capacity` keys, using the default
    /// hasher builder.
    pub fn with_capacity(capacity: u32) -> Self {
        Self::with_capacity_and_hasher(capacity, S::default())
    }
}

impl<S> Default for KeyedIndex<S>
where
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, S> IntoIterator for &'a KeyedIndex<S> {
    type Item = u32;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
