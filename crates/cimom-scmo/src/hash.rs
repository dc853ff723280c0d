//! Name hashing and chained lookup for the in-arena hash tables.
//!
//! The hash is order-sensitive and case-insensitive: the same name in any
//! ASCII case folds to the same bucket, but transpositions do not. Collisions
//! are resolved by explicit singly-linked chains (`has_next`/`next_node`
//! fields on the nodes themselves), appended in insertion order — never by
//! rehashing or bucket resizing. The table size is fixed when a class
//! descriptor is built, so chain order is deterministic and part of the
//! format: when two same-hash names exist, the first one inserted is the one
//! found first.

/// Order-sensitive, case-insensitive string hash (djb2 over folded bytes).
#[must_use]
pub fn name_hash(name: &str) -> u32 {
    let mut h: u32 = 5381;
    for b in name.bytes() {
        h = h
            .wrapping_shl(5)
            .wrapping_add(h)
            .wrapping_add(u32::from(b.to_ascii_lowercase()));
    }
    h
}

/// Bucket count for a table expected to hold `entries` nodes.
///
/// Power of two so the bucket is a mask, minimum 8. Fixed at build time;
/// chains absorb any excess.
#[must_use]
pub fn bucket_count_for(entries: usize) -> u32 {
    entries.max(8).next_power_of_two() as u32
}

/// Length-aware case-insensitive byte comparison.
///
/// The caller has both lengths from the stored handles, so unequal lengths
/// never scan.
#[must_use]
pub fn name_eq_ignore_case(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.to_ascii_lowercase() == y.to_ascii_lowercase())
}
