use core::fmt;

/// A broken caller contract.
///
/// None of these are recoverable: the table reports them through [`oops`],
/// which panics with the `Display` text of the variant. They exist as a type
/// so that the messages stay uniform and hosts can match on the wording in
/// their own tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oops {
    /// The same index was inserted twice for the same bucket.
    DuplicateIndex {
        /// The offending index.
        index: u32,
    },
    /// Rehashing into a freshly grown table overflowed the probe distance
    /// limit, which would require growing again from inside growth.
    RecursiveGrow {
        /// The index being inserted when the condition was detected.
        index: u32,
    },
    /// Insertion into a table that was already demolished.
    Demolished,
    /// The table would need more than `2^31` buckets.
    TooLarge {
        /// The log2 of the requested bucket count.
        official_size_log2: u32,
    },
}

impl fmt::Display for Oops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Oops::DuplicateIndex { index } => write!(f, "insert duplicate for {index}"),
            Oops::RecursiveGrow { index } => {
                write!(f, "attempt to recursively call grow when adding {index}")
            }
            Oops::Demolished => f.write_str("index hash table used after demolish"),
            Oops::TooLarge { official_size_log2 } => write!(
                f,
                "index hash table cannot hold 2^{official_size_log2} buckets"
            ),
        }
    }
}

#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn oops(oops: Oops) -> ! {
    panic!("{oops}")
}
