//! A Robin Hood hash table of `u32` indices living in a single allocation.
//!
//! The table never stores keys, values or hashes. Each slot holds the
//! position of a key in an array the caller owns, and the caller supplies the
//! 64-bit hash for every operation. Key equality is decided by the caller's
//! `eq` predicate on lookup and by index identity on insertion.
//!
//! ## Layout
//!
//! One allocation holds, in address order:
//!
//! ```text
//! [ entry n-1 | ... | entry 1 | entry 0 ][ Control ][ meta 0 | meta 1 | ... | meta n-1 | 1 ]
//!                                        ^
//!                                        control pointer
//! ```
//!
//! where `n = official_size + probe_overflow_size`. Entry `b` sits at
//! control-relative offset `-(b + 1) * size_of::<Entry>()` and metadata byte
//! `b` at `size_of::<Control>() + b`, so both buffers are addressed from the
//! same pointer and grow away from it. The trailing metadata byte is a
//! sentinel that looks like an occupied slot in its ideal position, which
//! terminates every probe loop without a bounds check.
//!
//! ## Metadata
//!
//! A metadata byte is `0` for an empty slot, otherwise the probe distance of
//! the entry in that slot, where `1` means "in its ideal bucket". Entries in a
//! run of occupied slots are kept sorted by ideal bucket, which makes each
//! probe distance at most one greater than the previous slot's.

use alloc::alloc::handle_alloc_error;
use core::alloc::Layout;
use core::fmt::Debug;
use core::mem::size_of;
use core::ptr::NonNull;

use crate::oops::Oops;
use crate::oops::oops;

/// The reserved probe distance. Writing it into any slot forces the next
/// insertion to grow the table first.
pub const MAX_PROBE_DISTANCE: u8 = 255;

const MIN_SIZE_BASE_2: u32 = 3;

/// Tables never hold more than `2^31` buckets, keeping `official_size` a `u32`.
const MAX_SIZE_BASE_2: u32 = 31;

/// Load factor of 3/4. `official_size` is at least 8, so this is exact.
#[inline(always)]
fn target_load_factor(official_size: u32) -> u32 {
    official_size / 4 * 3
}

/// Smallest `log2(official_size)` whose load-factor capacity covers `entries`.
fn size_base_2_for(entries: u32) -> u32 {
    if entries == 0 {
        return MIN_SIZE_BASE_2;
    }

    let min_needed = (entries as u64 * 4).div_ceil(3);
    min_needed
        .next_power_of_two()
        .trailing_zeros()
        .max(MIN_SIZE_BASE_2)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
struct Entry {
    index: u32,
}

#[derive(Debug)]
#[repr(C)]
struct Control {
    official_size: u32,
    max_items: u32,
    cur_items: u32,
    key_right_shift: u8,
    probe_overflow_size: u8,
}

impl Control {
    #[inline(always)]
    fn allocated_items(&self) -> usize {
        self.official_size as usize + self.probe_overflow_size as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct DataLayout {
    layout: Layout,
    control_offset: usize,
    metadata_offset: usize,
    allocated_items: usize,
}

impl DataLayout {
    fn new(official_size: u32, probe_overflow_size: u8) -> Self {
        let allocated_items = official_size as usize + probe_overflow_size as usize;

        let entries_layout =
            Layout::array::<Entry>(allocated_items).expect("allocation size overflow");
        let metadata_layout =
            Layout::array::<u8>(allocated_items + 1).expect("allocation size overflow");

        let (layout, control_offset) = entries_layout
            .extend(Layout::new::<Control>())
            .expect("allocation size overflow");
        let (layout, metadata_offset) = layout
            .extend(metadata_layout)
            .expect("allocation size overflow");

        debug_assert_eq!(control_offset, allocated_items * size_of::<Entry>());
        debug_assert_eq!(metadata_offset, control_offset + size_of::<Control>());

        DataLayout {
            layout: layout.pad_to_align(),
            control_offset,
            metadata_offset,
            allocated_items,
        }
    }

    fn for_control(control: &Control) -> Self {
        Self::new(control.official_size, control.probe_overflow_size)
    }
}

/// Allocates and initializes a table with `2^official_size_log2` buckets.
fn allocate(official_size_log2: u32) -> NonNull<Control> {
    if official_size_log2 > MAX_SIZE_BASE_2 {
        oops(Oops::TooLarge { official_size_log2 });
    }

    let official_size = 1u32 << official_size_log2;
    let max_items = target_load_factor(official_size);
    let probe_overflow_size = (max_items.min(MAX_PROBE_DISTANCE as u32) - 1) as u8;
    let layout = DataLayout::new(official_size, probe_overflow_size);

    // SAFETY: The layout is never zero-sized since it always holds a `Control`.
    // Every write below stays inside the regions computed by `DataLayout`.
    unsafe {
        let raw_alloc = alloc::alloc::alloc(layout.layout);
        if raw_alloc.is_null() {
            handle_alloc_error(layout.layout);
        }

        let control = raw_alloc.add(layout.control_offset).cast::<Control>();
        control.write(Control {
            official_size,
            max_items,
            cur_items: 0,
            key_right_shift: (u64::BITS - official_size_log2) as u8,
            probe_overflow_size,
        });

        let metadata = raw_alloc.add(layout.metadata_offset);
        core::ptr::write_bytes(metadata, 0, layout.allocated_items);
        // Occupied, ideal position.
        *metadata.add(layout.allocated_items) = 1;

        NonNull::new_unchecked(control)
    }
}

/// Pointer to the entry for `bucket`.
///
/// # Safety
///
/// `control` must point to a live table and `bucket` must be less than its
/// allocated item count.
#[inline(always)]
unsafe fn entry_ptr(control: NonNull<Control>, bucket: usize) -> NonNull<Entry> {
    // SAFETY: Entries are laid out backwards directly below the control header.
    unsafe { control.cast::<Entry>().sub(bucket + 1) }
}

/// Pointer to the metadata byte for bucket 0.
///
/// # Safety
///
/// `control` must point to a live table.
#[inline(always)]
unsafe fn metadata_ptr(control: NonNull<Control>) -> NonNull<u8> {
    // SAFETY: Metadata starts directly after the control header.
    unsafe { control.cast::<u8>().add(size_of::<Control>()) }
}

/// Places `index` in its Robin Hood position without touching `cur_items`.
///
/// # Safety
///
/// `control` must point to a live table.
unsafe fn insert_internal(control: NonNull<Control>, key_hash: u64, index: u32) {
    // SAFETY: The caller guarantees a live table. Probing stays in bounds
    // because `cur_items < max_items` leaves an empty slot before the sentinel
    // in every run, and a probe distance of `MAX_PROBE_DISTANCE` zeroes
    // `max_items` before any later insertion could probe further.
    unsafe {
        let c = control.as_ptr();
        if (*c).cur_items >= (*c).max_items {
            oops(Oops::RecursiveGrow { index });
        }

        let metadata = metadata_ptr(control).as_ptr();
        let mut slot = ((key_hash >> (*c).key_right_shift) as usize, 1u32);

        loop {
            let (position, probe_distance) = slot;
            let stored = *metadata.add(position);

            if (stored as u32) < probe_distance {
                if stored != 0 {
                    // Every entry from here to the next gap moves along by one,
                    // which keeps the run sorted without swapping pairwise.
                    let mut gap = position;
                    let mut old_probe_distance = stored;
                    loop {
                        let new_probe_distance = old_probe_distance + 1;
                        if new_probe_distance == MAX_PROBE_DISTANCE {
                            (*c).max_items = 0;
                        }
                        gap += 1;
                        old_probe_distance = *metadata.add(gap);
                        *metadata.add(gap) = new_probe_distance;
                        if old_probe_distance == 0 {
                            break;
                        }
                    }
                    debug_assert!(gap < (*c).allocated_items());

                    // Buckets grow downwards, so the run occupies
                    // `entry(gap - 1)..=entry(position)` and moves one entry lower.
                    core::ptr::copy(
                        entry_ptr(control, gap - 1).as_ptr(),
                        entry_ptr(control, gap).as_ptr(),
                        gap - position,
                    );
                }

                if probe_distance == MAX_PROBE_DISTANCE as u32 {
                    (*c).max_items = 0;
                }
                *metadata.add(position) = probe_distance as u8;
                entry_ptr(control, position).write(Entry { index });
                return;
            }

            if stored as u32 == probe_distance
                && entry_ptr(control, position).read().index == index
            {
                oops(Oops::DuplicateIndex { index });
            }

            slot = (position + 1, probe_distance + 1);
            debug_assert!(slot.1 <= MAX_PROBE_DISTANCE as u32);
            debug_assert!(slot.0 < (*c).allocated_items());
        }
    }
}

/// A single slot of an [`IndexHashTable`], as reported by
/// [`IndexHashTable::slots`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Position in bucket order, `0..official_size + probe_overflow_size`.
    pub position: usize,
    /// `0` when empty, otherwise `1 +` the distance from the ideal bucket.
    pub probe_distance: u8,
    /// The stored index, if the slot is occupied.
    pub index: Option<u32>,
}

impl Slot {
    /// The bucket the stored entry hashed to, if the slot is occupied.
    pub fn ideal_bucket(&self) -> Option<usize> {
        self.index
            .map(|_| self.position + 1 - self.probe_distance as usize)
    }
}

/// Debug statistics for probe-distance analysis.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of indices currently in the table
    pub populated: usize,
    /// Number of indices the table accepts before growing
    pub capacity: usize,
    /// Number of primary buckets
    pub official_size: usize,
    /// Total number of slots allocated, including probe overflow
    pub total_slots: usize,
    /// Longest probe distance present (1 = ideal bucket)
    pub max_probe_distance: u8,
    /// Mean probe distance of occupied slots
    pub mean_probe_distance: f64,
    /// Load factor (populated / capacity)
    pub load_factor: f64,
    /// Slot utilization (populated / total_slots)
    pub slot_utilization: f64,
    /// Total bytes in the single allocation
    pub total_bytes: usize,
    /// Bytes spent on empty entry slots
    pub wasted_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Index Hash Table Debug Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% load factor)",
            self.populated,
            self.capacity,
            self.load_factor * 100.0
        );
        println!(
            "Slot Usage: {}/{} ({:.2}% utilization, {} official)",
            self.populated,
            self.total_slots,
            self.slot_utilization * 100.0,
            self.official_size
        );
        println!(
            "Probe Distance: max {}, mean {:.02}",
            self.max_probe_distance, self.mean_probe_distance
        );
        println!("Total Allocated: {} bytes", self.total_bytes);
        println!(
            "Memory: {} bytes wasted ({:.02}%)",
            self.wasted_bytes,
            if self.total_bytes == 0 {
                0.0
            } else {
                (self.wasted_bytes as f64 / self.total_bytes as f64) * 100.0
            }
        );
    }
}

/// A Robin Hood hash table mapping caller-hashed keys to `u32` indices.
///
/// The indices point into an array the caller owns; the table stores nothing
/// else. Every operation takes the key's 64-bit hash, and only the top
/// `log2(official_size)` bits select the bucket, so the hash should be good in
/// its high bits.
///
/// Insertion is unconditional: the caller guarantees that the index is not
/// already present. Inserting the same index twice under the same hash is
/// detected and treated as a fatal error.
///
/// ## Example
///
/// ```rust
/// use index_hash::IndexHashTable;
///
/// let keys = ["alpha", "beta", "gamma"];
/// let hash_of = |index: u32| {
///     // Any 64-bit hash works; this one just spreads the top bits.
///     (keys[index as usize].len() as u64 + index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
/// };
///
/// let mut table = IndexHashTable::build(keys.len() as u32);
/// for index in 0..keys.len() as u32 {
///     table.insert_unconditional(hash_of(index), index, hash_of);
/// }
///
/// assert_eq!(table.find(hash_of(1), |i| keys[i as usize] == "beta"), Some(1));
/// assert_eq!(table.len(), 3);
///
/// table.demolish();
/// assert!(table.is_demolished());
/// ```
pub struct IndexHashTable {
    control: Option<NonNull<Control>>,
}

// SAFETY: The table exclusively owns its allocation, which holds plain bytes.
unsafe impl Send for IndexHashTable {}
// SAFETY: Shared references only read the allocation.
unsafe impl Sync for IndexHashTable {}

impl Debug for IndexHashTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use alloc::format;
        use alloc::string::ToString;
        use alloc::vec::Vec;

        let Some(control) = self.control else {
            return f
                .debug_struct("IndexHashTable")
                .field("metadata", &"demolished")
                .finish();
        };

        // SAFETY: The control pointer is live until `demolish`.
        let c = unsafe { control.as_ref() };
        let slots = self.slots().collect::<Vec<_>>();
        f.debug_struct("IndexHashTable")
            .field(
                "metadata",
                &slots
                    .chunks(16)
                    .map(|w| {
                        w.iter()
                            .map(|slot| match slot.index {
                                Some(index) => format!("{:02x}:{index}", slot.probe_distance),
                                None => "..".to_string(),
                            })
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .collect::<Vec<_>>(),
            )
            .field("official_size", &c.official_size)
            .field("cur_items", &c.cur_items)
            .field("max_items", &c.max_items)
            .field("key_right_shift", &c.key_right_shift)
            .field("probe_overflow_size", &c.probe_overflow_size)
            .finish()
    }
}

impl Clone for IndexHashTable {
    fn clone(&self) -> Self {
        let Some(control) = self.control else {
            return Self { control: None };
        };

        // SAFETY: Both allocations share one layout, derived from the same
        // header, and the source is live. Entries in empty slots may be
        // uninitialized, which a raw byte copy tolerates.
        unsafe {
            let layout = DataLayout::for_control(control.as_ref());
            let src = control.cast::<u8>().sub(layout.control_offset);
            let dst = alloc::alloc::alloc(layout.layout);
            if dst.is_null() {
                handle_alloc_error(layout.layout);
            }
            core::ptr::copy_nonoverlapping(src.as_ptr(), dst, layout.layout.size());

            Self {
                control: Some(NonNull::new_unchecked(
                    dst.add(layout.control_offset).cast::<Control>(),
                )),
            }
        }
    }
}

impl Drop for IndexHashTable {
    fn drop(&mut self) {
        self.demolish();
    }
}

impl IndexHashTable {
    /// Builds a table sized for `expected_entries` indices without growing.
    ///
    /// `official_size` is the smallest power of two whose 3/4 load factor
    /// covers `expected_entries`, and never less than 8.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use index_hash::IndexHashTable;
    /// #
    /// let table = IndexHashTable::build(0);
    /// assert_eq!(table.official_size(), 8);
    /// assert_eq!(table.capacity(), 6);
    ///
    /// let table = IndexHashTable::build(100);
    /// assert!(table.capacity() >= 100);
    /// ```
    pub fn build(expected_entries: u32) -> Self {
        Self {
            control: Some(allocate(size_base_2_for(expected_entries))),
        }
    }

    /// Inserts `index` under `key_hash` without checking for an equal key.
    ///
    /// If the table is full it grows first, rehashing every stored index
    /// through `hasher`, which must return the same hash the index was
    /// originally inserted with.
    ///
    /// # Panics
    ///
    /// Panics if the table was demolished, if `index` is already present
    /// under the same hash, or if growth cannot fit the rehashed entries.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use index_hash::IndexHashTable;
    /// #
    /// let hash_of = |index: u32| (index as u64) << 61;
    /// let mut table = IndexHashTable::build(0);
    /// for index in 0..7 {
    ///     table.insert_unconditional(hash_of(index), index, hash_of);
    /// }
    ///
    /// // The seventh insertion outgrew the 8-bucket table.
    /// assert_eq!(table.official_size(), 16);
    /// assert_eq!(table.len(), 7);
    /// ```
    pub fn insert_unconditional(
        &mut self,
        key_hash: u64,
        index: u32,
        hasher: impl Fn(u32) -> u64,
    ) {
        let Some(mut control) = self.control else {
            oops(Oops::Demolished);
        };

        // SAFETY: The control pointer is live until `demolish`.
        if unsafe { control.as_ref().cur_items >= control.as_ref().max_items } {
            control = self.grow(&hasher);
        }

        // SAFETY: `control` is the live (possibly freshly grown) table.
        unsafe {
            insert_internal(control, key_hash, index);
            (*control.as_ptr()).cur_items += 1;
        }
    }

    #[cold]
    #[inline(never)]
    fn grow(&mut self, hasher: &impl Fn(u32) -> u64) -> NonNull<Control> {
        let Some(old) = self.control else {
            oops(Oops::Demolished);
        };

        // SAFETY: The old control pointer is live until the swap below.
        let (official_size_log2, cur_items) = unsafe {
            let c = old.as_ref();
            (u64::BITS - c.key_right_shift as u32 + 1, c.cur_items)
        };

        let new = allocate(official_size_log2);
        // Owned by a table value so a panic while rehashing frees it and
        // leaves `self` untouched.
        let mut grown = Self { control: Some(new) };

        for index in self.iter() {
            // SAFETY: `new` is live and owned by `grown`.
            unsafe {
                insert_internal(new, hasher(index), index);
                (*new.as_ptr()).cur_items += 1;
            }
        }
        // SAFETY: `new` is live and owned by `grown`.
        debug_assert_eq!(unsafe { new.as_ref().cur_items }, cur_items);

        core::mem::swap(self, &mut grown);
        // `grown` now holds the old allocation and releases it here.
        drop(grown);

        new
    }

    /// Releases the table's allocation.
    ///
    /// Calling it again, or dropping the table afterwards, does nothing.
    /// Queries on a demolished table behave as if it were empty, and
    /// insertion panics.
    pub fn demolish(&mut self) {
        let Some(control) = self.control.take() else {
            return;
        };

        // SAFETY: The control pointer was live and is no longer reachable. The
        // header still describes the layout it was allocated with, since
        // `probe_overflow_size` never changes after allocation.
        unsafe {
            let layout = DataLayout::for_control(control.as_ref());
            let raw_alloc = control.cast::<u8>().sub(layout.control_offset);
            alloc::alloc::dealloc(raw_alloc.as_ptr(), layout.layout);
        }
    }

    /// Returns `true` once [`demolish`](Self::demolish) has released the
    /// table.
    pub fn is_demolished(&self) -> bool {
        self.control.is_none()
    }

    fn header(&self) -> Option<&Control> {
        // SAFETY: The control pointer is live until `demolish`, which needs
        // `&mut self`.
        self.control.map(|control| unsafe { control.as_ref() })
    }

    /// Looks up the index whose key hashes to `key_hash` and satisfies `eq`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use index_hash::IndexHashTable;
    /// #
    /// let keys = ["x", "y"];
    /// let hash_of = |index: u32| (index as u64 + 1) << 62;
    /// let mut table = IndexHashTable::build(2);
    /// table.insert_unconditional(hash_of(0), 0, hash_of);
    /// table.insert_unconditional(hash_of(1), 1, hash_of);
    ///
    /// assert_eq!(table.find(hash_of(1), |i| keys[i as usize] == "y"), Some(1));
    /// assert_eq!(table.find(hash_of(1), |i| keys[i as usize] == "z"), None);
    /// ```
    pub fn find(&self, key_hash: u64, eq: impl Fn(u32) -> bool) -> Option<u32> {
        let control = self.control?;
        let c = self.header()?;
        if c.cur_items == 0 {
            return None;
        }

        // SAFETY: The sentinel byte after the last slot is occupied at probe
        // distance 1, so the scan stops on or before it.
        unsafe {
            let metadata = metadata_ptr(control).as_ptr();
            let mut position = (key_hash >> c.key_right_shift) as usize;
            let mut probe_distance = 1u32;
            loop {
                let stored = *metadata.add(position) as u32;
                if stored == probe_distance {
                    let index = entry_ptr(control, position).read().index;
                    if eq(index) {
                        return Some(index);
                    }
                } else if stored < probe_distance {
                    return None;
                }
                position += 1;
                probe_distance += 1;
            }
        }
    }

    /// Returns `true` if `index` is stored under `key_hash`.
    pub fn contains_index(&self, key_hash: u64, index: u32) -> bool {
        self.find(key_hash, |i| i == index).is_some()
    }

    /// Returns an iterator over the stored indices in bucket order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            slots: self.slots(),
        }
    }

    /// Returns an iterator over every slot in bucket order, occupied or not.
    ///
    /// The sentinel is not reported.
    pub fn slots(&self) -> Slots<'_> {
        Slots {
            table: self,
            position: 0,
            end: self.header().map_or(0, Control::allocated_items),
        }
    }

    /// Returns the number of stored indices.
    pub fn len(&self) -> usize {
        self.header().map_or(0, |c| c.cur_items as usize)
    }

    /// Returns `true` if no indices are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns how many indices the table accepts before the next insertion
    /// grows it.
    ///
    /// This is 3/4 of [`official_size`](Self::official_size), or `0` once
    /// some entry has reached [`MAX_PROBE_DISTANCE`].
    pub fn capacity(&self) -> usize {
        self.header().map_or(0, |c| c.max_items as usize)
    }

    /// Returns the number of primary buckets, always a power of two.
    pub fn official_size(&self) -> usize {
        self.header().map_or(0, |c| c.official_size as usize)
    }

    /// Returns the shift that turns a 64-bit hash into a bucket.
    pub fn key_right_shift(&self) -> u8 {
        self.header().map_or(0, |c| c.key_right_shift)
    }

    /// Returns the number of slots past the primary buckets that entries may
    /// spill into.
    pub fn probe_overflow_size(&self) -> u8 {
        self.header().map_or(0, |c| c.probe_overflow_size)
    }

    /// Computes a histogram of probe distances.
    ///
    /// Index `d` counts the entries that sit `d` slots past their ideal
    /// bucket. The vector ends at the longest distance present.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_histogram(&self) -> alloc::vec::Vec<usize> {
        let mut hist = alloc::vec::Vec::new();
        for slot in self.slots().filter(|slot| slot.index.is_some()) {
            let distance = slot.probe_distance as usize - 1;
            if hist.len() <= distance {
                hist.resize(distance + 1, 0);
            }
            hist[distance] += 1;
        }
        hist
    }

    /// Returns detailed utilization statistics for debugging.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let total_slots = self.header().map_or(0, Control::allocated_items);
        let (max_probe_distance, total_probe_distance) = self
            .slots()
            .filter(|slot| slot.index.is_some())
            .fold((0u8, 0usize), |(max, sum), slot| {
                (max.max(slot.probe_distance), sum + slot.probe_distance as usize)
            });
        let populated = self.len();
        let capacity = self.capacity();

        DebugStats {
            populated,
            capacity,
            official_size: self.official_size(),
            total_slots,
            max_probe_distance,
            mean_probe_distance: if populated == 0 {
                0.0
            } else {
                total_probe_distance as f64 / populated as f64
            },
            load_factor: if capacity == 0 {
                0.0
            } else {
                populated as f64 / capacity as f64
            },
            slot_utilization: if total_slots == 0 {
                0.0
            } else {
                populated as f64 / total_slots as f64
            },
            total_bytes: self
                .header()
                .map_or(0, |c| DataLayout::for_control(c).layout.size()),
            wasted_bytes: (total_slots - populated) * size_of::<Entry>(),
        }
    }

    /// Pretty-prints the probe-distance histogram horizontally using stdout.
    #[cfg(all(any(test, feature = "stats"), feature = "std"))]
    pub fn print_probe_histogram(&self) {
        let hist = self.probe_histogram();
        let max = *hist.iter().max().unwrap_or(&0);
        if max == 0 {
            println!("probe histogram: empty");
            return;
        }

        let max_bar = 60usize;
        let total_units = max_bar * 8;
        println!("probe histogram ({} entries):", self.len());

        let make_bar = |count: usize| -> alloc::string::String {
            if count == 0 {
                return alloc::string::String::new();
            }
            let units = ((count as u128 * total_units as u128).div_ceil(max as u128)) as usize;
            let mut bar = "█".repeat(units / 8);
            let partial = ['▏', '▎', '▍', '▌', '▋', '▊', '▉'];
            if units % 8 > 0 {
                bar.push(partial[units % 8 - 1]);
            }
            bar
        };

        for (distance, &count) in hist.iter().enumerate() {
            println!("{:>3} | {} ({})", distance, make_bar(count), count);
        }
    }
}

/// An iterator over every slot of an [`IndexHashTable`].
///
/// This struct is created by [`IndexHashTable::slots`].
pub struct Slots<'a> {
    table: &'a IndexHashTable,
    position: usize,
    end: usize,
}

impl Iterator for Slots<'_> {
    type Item = Slot;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.end {
            return None;
        }
        let control = self.table.control?;
        let position = self.position;
        self.position += 1;

        // SAFETY: `position < allocated_items`, and entries are initialized
        // wherever the metadata byte is non-zero.
        unsafe {
            let probe_distance = *metadata_ptr(control).as_ptr().add(position);
            let index =
                (probe_distance != 0).then(|| entry_ptr(control, position).read().index);
            Some(Slot {
                position,
                probe_distance,
                index,
            })
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Slots<'_> {}

/// An iterator over the indices stored in an [`IndexHashTable`], in bucket
/// order.
///
/// This struct is created by [`IndexHashTable::iter`].
pub struct Iter<'a> {
    slots: Slots<'a>,
}

impl Iterator for Iter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        self.slots.by_ref().find_map(|slot| slot.index)
    }
}

impl<'a> IntoIterator for &'a IndexHashTable {
    type Item = u32;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::vec::Vec;
    use core::hash::Hasher;

    use rand::Rng;
    use rand::SeedableRng;
    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use rand::rngs::SmallRng;
    use siphasher::sip::SipHasher;

    use super::*;

    struct HashState {
        k0: u64,
        k1: u64,
    }

    impl HashState {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k0: rng.try_next_u64().unwrap(),
                k1: rng.try_next_u64().unwrap(),
            }
        }

        fn hash_index(&self, index: u32) -> u64 {
            let mut h = SipHasher::new_with_keys(self.k0, self.k1);
            h.write_u32(index);
            h.finish()
        }
    }

    /// Hash landing in `bucket` of a table with `2^log2` buckets.
    fn bucket_hash(bucket: u64, log2: u32) -> u64 {
        bucket << (64 - log2)
    }

    fn assert_robin_hood(table: &IndexHashTable, hash_of: impl Fn(u32) -> u64) {
        let shift = table.key_right_shift();
        let mut previous = 0u32;
        let mut seen = Vec::new();
        for slot in table.slots() {
            match slot.index {
                None => {
                    assert_eq!(slot.probe_distance, 0);
                    previous = 0;
                }
                Some(index) => {
                    let probe_distance = slot.probe_distance as u32;
                    assert!(
                        probe_distance >= 1 && probe_distance <= previous + 1,
                        "slot {} out of order after {}: {:#?}",
                        slot.position,
                        previous,
                        table
                    );
                    assert_eq!(
                        slot.ideal_bucket(),
                        Some((hash_of(index) >> shift) as usize),
                        "{:#?}",
                        table
                    );
                    previous = probe_distance;
                    seen.push(index);
                }
            }
        }

        assert_eq!(seen.len(), table.len());
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), table.len(), "duplicate indices: {:#?}", table);
    }

    fn occupied(table: &IndexHashTable) -> Vec<(usize, u8, u32)> {
        table
            .slots()
            .filter_map(|s| s.index.map(|i| (s.position, s.probe_distance, i)))
            .collect()
    }

    #[test]
    fn build_minimum_sizing() {
        let table = IndexHashTable::build(0);
        assert_eq!(table.official_size(), 8);
        assert_eq!(table.capacity(), 6);
        assert_eq!(table.key_right_shift(), 61);
        assert_eq!(table.probe_overflow_size(), 5);
        assert_eq!(table.slots().len(), 13);
        assert!(table.is_empty());
        assert!(table.slots().all(|s| s.probe_distance == 0));
    }

    #[test]
    fn build_sizing_follows_load_factor() {
        for (expected, official_size) in [
            (1, 8),
            (6, 8),
            (7, 16),
            (12, 16),
            (13, 32),
            (384, 512),
            (385, 1024),
            (1000, 2048),
        ] {
            let table = IndexHashTable::build(expected);
            assert_eq!(table.official_size(), official_size, "expected {expected}");
            assert!(table.capacity() >= expected as usize);
            assert_eq!(
                table.key_right_shift() as u32,
                64 - official_size.trailing_zeros()
            );
        }

        assert_eq!(IndexHashTable::build(1000).probe_overflow_size(), 254);
        assert_eq!(IndexHashTable::build(60).probe_overflow_size(), 95);
    }

    #[test]
    fn layout_offsets_match_accessors() {
        let layout = DataLayout::new(8, 5);
        assert_eq!(layout.allocated_items, 13);
        assert_eq!(layout.control_offset, 13 * size_of::<Entry>());
        assert_eq!(layout.metadata_offset, layout.control_offset + size_of::<Control>());
        assert!(layout.layout.size() >= layout.metadata_offset + 14);

        let table = IndexHashTable::build(0);
        let control = table.control.unwrap();
        unsafe {
            let base = control.cast::<u8>().sub(layout.control_offset);
            assert_eq!(
                entry_ptr(control, 0).cast::<u8>().as_ptr(),
                base.as_ptr().add((13 - 1) * size_of::<Entry>())
            );
            assert_eq!(entry_ptr(control, 12).cast::<u8>().as_ptr(), base.as_ptr());
            assert_eq!(
                metadata_ptr(control).as_ptr(),
                base.as_ptr().add(layout.metadata_offset)
            );
            assert_eq!(*metadata_ptr(control).as_ptr().add(13), 1);
        }
    }

    #[test]
    fn distinct_buckets_then_growth() {
        let hash_of = |index: u32| bucket_hash(index as u64, 3);
        let mut table = IndexHashTable::build(0);
        for index in 0..6 {
            table.insert_unconditional(hash_of(index), index, hash_of);
            assert!(table.len() <= table.capacity());
        }

        assert_eq!(table.len(), 6);
        assert_eq!(table.official_size(), 8);
        assert_eq!(
            occupied(&table),
            (0..6).map(|i| (i as usize, 1, i)).collect::<Vec<_>>()
        );

        table.insert_unconditional(hash_of(6), 6, hash_of);
        assert_eq!(table.official_size(), 16);
        assert_eq!(table.key_right_shift(), 60);
        assert_eq!(table.len(), 7);
        for index in 0..7 {
            assert!(table.contains_index(hash_of(index), index), "{:#?}", table);
            assert_eq!(
                table.slots().find(|s| s.index == Some(index)).unwrap().position,
                2 * index as usize
            );
        }
        assert_robin_hood(&table, hash_of);
    }

    #[test]
    fn collisions_keep_runs_sorted() {
        let hashes = [(10, 2), (11, 2), (12, 2), (20, 3), (30, 1), (40, 2)];
        let hash_of = |index: u32| {
            let bucket = hashes.iter().find(|(i, _)| *i == index).unwrap().1;
            bucket_hash(bucket, 3)
        };

        let mut table = IndexHashTable::build(0);
        for (index, _) in hashes {
            table.insert_unconditional(hash_of(index), index, hash_of);
            assert_robin_hood(&table, hash_of);
        }

        assert_eq!(
            occupied(&table),
            [(1, 1, 30), (2, 1, 10), (3, 2, 11), (4, 3, 12), (5, 4, 40), (6, 4, 20)]
        );
    }

    #[test]
    fn shift_moves_whole_run() {
        let hashes = [(1, 1), (2, 1), (3, 2), (4, 0), (5, 0)];
        let hash_of = |index: u32| {
            let bucket = hashes.iter().find(|(i, _)| *i == index).unwrap().1;
            bucket_hash(bucket, 3)
        };

        let mut table = IndexHashTable::build(0);
        for (index, _) in hashes {
            table.insert_unconditional(hash_of(index), index, hash_of);
        }

        assert_eq!(
            occupied(&table),
            [(0, 1, 4), (1, 2, 5), (2, 2, 1), (3, 3, 2), (4, 3, 3)]
        );
        assert_robin_hood(&table, hash_of);
    }

    #[test]
    fn spill_into_probe_overflow() {
        let hash_of = |_: u32| bucket_hash(7, 3);
        let mut table = IndexHashTable::build(0);
        for index in 0..6 {
            table.insert_unconditional(hash_of(index), index, hash_of);
        }

        assert_eq!(
            occupied(&table),
            (0..6u32)
                .map(|i| (7 + i as usize, i as u8 + 1, i))
                .collect::<Vec<_>>()
        );
        for index in 0..6 {
            assert!(table.contains_index(hash_of(index), index));
        }
        assert!(!table.contains_index(hash_of(6), 6));
    }

    #[test]
    #[should_panic(expected = "insert duplicate for 3")]
    fn duplicate_index_is_fatal() {
        let hash_of = |_: u32| bucket_hash(4, 3);
        let mut table = IndexHashTable::build(0);
        for index in [1, 2, 3, 4] {
            table.insert_unconditional(hash_of(index), index, hash_of);
        }
        table.insert_unconditional(hash_of(3), 3, hash_of);
    }

    #[test]
    fn probe_overflow_forces_growth() {
        // All share a bucket in 512 buckets but split across two in 1024.
        let hash_of = |index: u32| match index {
            1000 => bucket_hash(500, 10),
            _ => bucket_hash(index as u64 % 2, 10),
        };

        let mut table = IndexHashTable::build(384);
        assert_eq!(table.official_size(), 512);
        for index in 0..255 {
            table.insert_unconditional(hash_of(index), index, hash_of);
        }
        assert_eq!(table.capacity(), 0);
        assert_eq!(table.debug_stats().max_probe_distance, MAX_PROBE_DISTANCE);

        table.insert_unconditional(hash_of(1000), 1000, hash_of);
        assert_eq!(table.official_size(), 1024);
        assert_eq!(table.capacity(), 768);
        assert_eq!(table.len(), 256);
        assert!(table.debug_stats().max_probe_distance < MAX_PROBE_DISTANCE);
        assert_robin_hood(&table, hash_of);
        for index in (0..255).chain([1000]) {
            assert!(table.contains_index(hash_of(index), index));
        }
    }

    #[test]
    #[should_panic(expected = "attempt to recursively call grow when adding 999")]
    fn growth_that_overflows_is_fatal() {
        let hash_of = |_: u32| 0u64;
        let mut table = IndexHashTable::build(384);
        for index in 0..255 {
            table.insert_unconditional(hash_of(index), index, hash_of);
        }
        table.insert_unconditional(hash_of(999), 999, hash_of);
    }

    #[test]
    #[cfg(feature = "std")]
    fn panic_while_rehashing_keeps_old_table() {
        use std::panic::AssertUnwindSafe;
        use std::panic::catch_unwind;

        let hash_of = |index: u32| bucket_hash(index as u64, 3);
        let mut table = IndexHashTable::build(0);
        for index in 0..6 {
            table.insert_unconditional(hash_of(index), index, hash_of);
        }
        let before = occupied(&table);

        let result = catch_unwind(AssertUnwindSafe(|| {
            table.insert_unconditional(hash_of(6), 6, |index: u32| {
                if index == 3 {
                    panic!("hasher failed on {index}");
                }
                hash_of(index)
            });
        }));
        assert!(result.is_err());

        assert_eq!(table.official_size(), 8);
        assert_eq!(table.len(), 6);
        assert_eq!(table.capacity(), 6);
        assert_eq!(occupied(&table), before);
        for index in 0..6 {
            assert!(table.contains_index(hash_of(index), index));
        }
        assert!(!table.contains_index(hash_of(6), 6));

        table.insert_unconditional(hash_of(6), 6, hash_of);
        assert_eq!(table.official_size(), 16);
        assert_eq!(table.len(), 7);
        assert_robin_hood(&table, hash_of);
    }

    #[test]
    #[cfg(feature = "std")]
    fn overflowing_growth_leaves_grown_table_installed() {
        use std::panic::AssertUnwindSafe;
        use std::panic::catch_unwind;

        let hash_of = |_: u32| 0u64;
        let mut table = IndexHashTable::build(384);
        for index in 0..255 {
            table.insert_unconditional(hash_of(index), index, hash_of);
        }

        let result = catch_unwind(AssertUnwindSafe(|| {
            table.insert_unconditional(hash_of(999), 999, hash_of);
        }));
        assert!(result.is_err());

        assert_eq!(table.official_size(), 1024);
        assert_eq!(table.len(), 255);
        assert_eq!(table.capacity(), 0);
        assert!(!table.contains_index(hash_of(999), 999));
    }

    #[test]
    #[should_panic(expected = "index hash table cannot hold 2^32 buckets")]
    fn oversized_build_is_fatal() {
        IndexHashTable::build(1 << 31);
    }

    #[test]
    #[should_panic(expected = "index hash table cannot hold 2^33 buckets")]
    fn largest_request_is_fatal() {
        IndexHashTable::build(u32::MAX);
    }

    #[test]
    fn demolish_is_idempotent() {
        let hash_of = |index: u32| bucket_hash(index as u64, 3);
        let mut table = IndexHashTable::build(0);
        table.insert_unconditional(hash_of(1), 1, hash_of);

        table.demolish();
        assert!(table.is_demolished());
        table.demolish();

        assert_eq!(table.len(), 0);
        assert_eq!(table.capacity(), 0);
        assert_eq!(table.find(hash_of(1), |_| true), None);
        assert_eq!(table.iter().count(), 0);
        assert!(format!("{:?}", table).contains("demolished"));
    }

    #[test]
    #[should_panic(expected = "index hash table used after demolish")]
    fn insert_after_demolish_is_fatal() {
        let mut table = IndexHashTable::build(0);
        table.demolish();
        table.insert_unconditional(0, 0, |_| 0);
    }

    #[test]
    fn identical_sequences_give_identical_layouts() {
        let mut rng = SmallRng::seed_from_u64(0x1D3A);
        let hashes = (0..500).map(|_| rng.random::<u64>()).collect::<Vec<_>>();
        let hash_of = |index: u32| hashes[index as usize];

        let mut a = IndexHashTable::build(0);
        let mut b = IndexHashTable::build(0);
        for index in 0..500 {
            a.insert_unconditional(hash_of(index), index, hash_of);
            b.insert_unconditional(hash_of(index), index, hash_of);
        }

        assert!(a.slots().eq(b.slots()));
        assert_robin_hood(&a, hash_of);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn insert_many() {
        let state = HashState::default();
        let hash_of = |index: u32| state.hash_index(index);
        let mut table = IndexHashTable::build(0);
        for index in 0..100_000 {
            table.insert_unconditional(hash_of(index), index, hash_of);
            assert!(table.len() <= table.capacity());
        }

        assert_eq!(table.len(), 100_000);
        assert_robin_hood(&table, hash_of);
        for index in 0..100_000 {
            assert_eq!(
                table.find(hash_of(index), |i| i == index),
                Some(index),
                "{index}"
            );
        }

        let mut all = table.iter().collect::<Vec<_>>();
        all.sort_unstable();
        assert!(all.into_iter().eq(0..100_000));
    }

    #[test]
    fn presized_table_does_not_grow() {
        let state = HashState::default();
        let hash_of = |index: u32| state.hash_index(index);
        let mut table = IndexHashTable::build(1000);
        let official_size = table.official_size();
        for index in 0..1000 {
            table.insert_unconditional(hash_of(index), index, hash_of);
        }
        assert_eq!(table.official_size(), official_size);
        assert_robin_hood(&table, hash_of);
    }

    #[test]
    fn find_misses() {
        let state = HashState::default();
        let hash_of = |index: u32| state.hash_index(index);
        let mut table = IndexHashTable::build(0);
        assert_eq!(table.find(hash_of(0), |_| true), None);

        for index in 0..64 {
            table.insert_unconditional(hash_of(index), index, hash_of);
        }
        for index in 64..128 {
            assert!(!table.contains_index(hash_of(index), index));
        }
    }

    #[test]
    fn test_clone() {
        let state = HashState::default();
        let hash_of = |index: u32| state.hash_index(index);
        let mut table = IndexHashTable::build(0);
        for index in 0..50 {
            table.insert_unconditional(hash_of(index), index, hash_of);
        }

        let mut cloned = table.clone();
        assert!(table.slots().eq(cloned.slots()));
        assert_eq!(cloned.len(), 50);

        cloned.insert_unconditional(hash_of(50), 50, hash_of);
        assert_eq!(table.len(), 50);
        assert!(!table.contains_index(hash_of(50), 50));
        assert!(cloned.contains_index(hash_of(50), 50));

        table.demolish();
        assert!(table.clone().is_demolished());
        assert_robin_hood(&cloned, hash_of);
    }

    #[test]
    fn probe_histogram_counts_every_entry() {
        let hash_of = |index: u32| bucket_hash(index as u64 / 2 * 2, 3);
        let mut table = IndexHashTable::build(0);
        for index in 0..6 {
            table.insert_unconditional(hash_of(index), index, hash_of);
        }

        assert_eq!(table.probe_histogram(), [3, 3]);
        let stats = table.debug_stats();
        assert_eq!(stats.populated, 6);
        assert_eq!(stats.total_slots, 13);
        assert_eq!(stats.max_probe_distance, 2);
        assert_eq!(stats.wasted_bytes, 7 * size_of::<Entry>());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    #[cfg(feature = "std")]
    fn histogram_output() {
        let state = HashState::default();
        let hash_of = |index: u32| state.hash_index(index);
        let mut table = IndexHashTable::build(10_000);
        for index in 0..table.capacity() as u32 {
            table.insert_unconditional(hash_of(index), index, hash_of);
        }

        table.print_probe_histogram();
        table.debug_stats().print();
    }
}
