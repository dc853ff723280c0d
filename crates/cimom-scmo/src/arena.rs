//! The relocatable arena backing every compact class/instance descriptor.
//!
//! One contiguous buffer; everything inside it references everything else via
//! `(start offset, length)` pairs relative to the buffer base, so the buffer
//! can grow (reallocate and move) without any pointer fix-ups. The first 16
//! bytes are a header:
//!
//! | offset | field            |
//! |--------|------------------|
//! | 0..4   | magic tag        |
//! | 4..8   | total size       |
//! | 8..12  | free bytes       |
//! | 12..16 | first free byte  |
//!
//! The header lives *in* the buffer so the raw block is directly transmissible
//! across the provider-agent boundary. Values that cannot live in the arena
//! (references to other descriptor objects) are held in an external-reference
//! index by the owning descriptor, never in here.

use std::fmt;

/// Magic tag at offset 0 of every arena block (`"SCMO"`).
pub const ARENA_MAGIC: u32 = 0x5343_4D4F;

/// Size of the fixed arena header.
pub const HEADER_SIZE: u32 = 16;

const INITIAL_CAPACITY: usize = 128;

/// A typed handle into the arena: start offset plus length.
///
/// The null handle `(0, 0)` marks "absent" (empty strings, unset refs); offset
/// 0 is inside the header and can never be a real allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaRef {
    pub start: u32,
    pub len: u32,
}

impl ArenaRef {
    /// The absent/empty marker.
    pub const NULL: Self = Self { start: 0, len: 0 };

    /// Whether this is the absent/empty marker.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.start == 0
    }
}

impl fmt::Display for ArenaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}+{}", self.start, self.len)
    }
}

/// The growable single-allocation block.
///
/// Growth doubles capacity and never shrinks. Callers must hold only
/// [`ArenaRef`] handles across any call to [`Arena::allocate`]; absolute
/// slices obtained earlier are invalidated by reallocation.
#[derive(Clone)]
pub struct Arena {
    buf: Vec<u8>,
}

impl Arena {
    /// A fresh arena containing only the header.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// A fresh arena with at least `capacity` bytes reserved.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = capacity.max(HEADER_SIZE as usize).next_power_of_two();
        let mut arena = Self { buf: vec![0; cap] };
        arena.put_u32(0, ARENA_MAGIC);
        arena.set_first_free(HEADER_SIZE);
        arena.sync_header();
        arena
    }

    /// Rehydrate an arena from a raw block (offset 0 becomes the new base).
    ///
    /// Validates the magic tag and the recorded total size. Returns `None`
    /// on any mismatch; a truncated or foreign block is never accepted.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE as usize {
            return None;
        }
        let arena = Self {
            buf: bytes.to_vec(),
        };
        if arena.get_u32(0) != ARENA_MAGIC {
            return None;
        }
        let total = arena.get_u32(4) as usize;
        let first_free = arena.get_u32(12) as usize;
        if total != bytes.len() || first_free < HEADER_SIZE as usize || first_free > total {
            return None;
        }
        Some(arena)
    }

    /// The whole block, header included, with the header fields current.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Offset of the first unallocated byte.
    #[inline]
    #[must_use]
    pub fn first_free(&self) -> u32 {
        self.get_u32(12)
    }

    fn set_first_free(&mut self, off: u32) {
        self.put_u32(12, off);
    }

    /// Bytes remaining before the next growth.
    #[inline]
    #[must_use]
    pub fn free_bytes(&self) -> u32 {
        self.buf.len() as u32 - self.first_free()
    }

    /// Total block size in bytes.
    #[inline]
    #[must_use]
    pub fn total_size(&self) -> u32 {
        self.buf.len() as u32
    }

    fn sync_header(&mut self) {
        let total = self.buf.len() as u32;
        let free = total - self.first_free();
        self.put_u32(4, total);
        self.put_u32(8, free);
    }

    /// Reserve `size` zero-initialized bytes, 8-byte aligned.
    ///
    /// Grows the block (doubling) when the free space is insufficient.
    /// Returns the aligned start offset. A zero-size request still returns a
    /// distinct aligned offset with no bytes reserved.
    pub fn allocate(&mut self, size: u32) -> u32 {
        let start = (self.first_free() + 7) & !7;
        let end = start as usize + size as usize;
        if end > self.buf.len() {
            let mut new_cap = self.buf.len();
            while new_cap < end {
                new_cap *= 2;
            }
            self.buf.resize(new_cap, 0);
        }
        self.set_first_free(end as u32);
        self.sync_header();
        start
    }

    /// Copy a UTF-8 string into fresh arena space.
    ///
    /// Empty input yields [`ArenaRef::NULL`] with no allocation.
    pub fn write_string(&mut self, s: &str) -> ArenaRef {
        self.write_binary(s.as_bytes())
    }

    /// Copy a raw buffer into fresh arena space.
    ///
    /// Empty input yields [`ArenaRef::NULL`] with no allocation.
    pub fn write_binary(&mut self, data: &[u8]) -> ArenaRef {
        if data.is_empty() {
            return ArenaRef::NULL;
        }
        let start = self.allocate(data.len() as u32);
        self.buf[start as usize..start as usize + data.len()].copy_from_slice(data);
        ArenaRef {
            start,
            len: data.len() as u32,
        }
    }

    /// The bytes behind a handle (empty slice for the null handle).
    #[must_use]
    pub fn bytes(&self, r: ArenaRef) -> &[u8] {
        if r.is_null() {
            return &[];
        }
        &self.buf[r.start as usize..(r.start + r.len) as usize]
    }

    /// The string behind a handle.
    ///
    /// Corrupted (non-UTF-8) bytes decode as an empty string rather than
    /// failing; only wire-rehydrated blocks can carry such bytes.
    #[must_use]
    pub fn str_at(&self, r: ArenaRef) -> &str {
        std::str::from_utf8(self.bytes(r)).unwrap_or("")
    }

    // Fixed-width field accessors. All little-endian.

    pub fn put_u8(&mut self, off: u32, v: u8) {
        self.buf[off as usize] = v;
    }

    #[must_use]
    pub fn get_u8(&self, off: u32) -> u8 {
        self.buf[off as usize]
    }

    pub fn put_u16(&mut self, off: u32, v: u16) {
        self.buf[off as usize..off as usize + 2].copy_from_slice(&v.to_le_bytes());
    }

    #[must_use]
    pub fn get_u16(&self, off: u32) -> u16 {
        let o = off as usize;
        u16::from_le_bytes([self.buf[o], self.buf[o + 1]])
    }

    pub fn put_u32(&mut self, off: u32, v: u32) {
        self.buf[off as usize..off as usize + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[must_use]
    pub fn get_u32(&self, off: u32) -> u32 {
        let o = off as usize;
        u32::from_le_bytes([self.buf[o], self.buf[o + 1], self.buf[o + 2], self.buf[o + 3]])
    }

    pub fn put_u64(&mut self, off: u32, v: u64) {
        self.buf[off as usize..off as usize + 8].copy_from_slice(&v.to_le_bytes());
    }

    #[must_use]
    pub fn get_u64(&self, off: u32) -> u64 {
        let o = off as usize;
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.buf[o..o + 8]);
        u64::from_le_bytes(b)
    }

    /// Store an [`ArenaRef`] as two u32 fields.
    pub fn put_ref(&mut self, off: u32, r: ArenaRef) {
        self.put_u32(off, r.start);
        self.put_u32(off + 4, r.len);
    }

    /// Load an [`ArenaRef`] from two u32 fields.
    #[must_use]
    pub fn get_ref(&self, off: u32) -> ArenaRef {
        ArenaRef {
            start: self.get_u32(off),
            len: self.get_u32(off + 4),
        }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("total_size", &self.total_size())
            .field("first_free", &self.first_free())
            .field("free_bytes", &self.free_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_arena_has_valid_header() {
        let a = Arena::new();
        assert_eq!(a.get_u32(0), ARENA_MAGIC);
        assert_eq!(a.first_free(), HEADER_SIZE);
        assert_eq!(a.total_size() as usize, INITIAL_CAPACITY);
    }

    #[test]
    fn allocate_is_aligned_and_zeroed() {
        let mut a = Arena::new();
        let r1 = a.allocate(3);
        let r2 = a.allocate(8);
        assert_eq!(r1 % 8, 0);
        assert_eq!(r2 % 8, 0);
        assert!(r2 >= r1 + 3);
        assert!(a.bytes(ArenaRef { start: r2, len: 8 }).iter().all(|&b| b == 0));
    }

    #[test]
    fn growth_doubles_and_preserves_content() {
        let mut a = Arena::with_capacity(64);
        let r = a.write_string("survivor");
        let before = a.total_size();
        // Force at least three reallocations.
        for _ in 0..200 {
            a.allocate(64);
        }
        assert!(a.total_size() >= before * 8);
        assert_eq!(a.str_at(r), "survivor");
    }

    #[test]
    fn empty_string_is_null_marker() {
        let mut a = Arena::new();
        let before = a.first_free();
        let r = a.write_string("");
        assert!(r.is_null());
        assert_eq!(a.first_free(), before);
        assert_eq!(a.str_at(r), "");
    }

    #[test]
    fn fixed_width_round_trip() {
        let mut a = Arena::new();
        let off = a.allocate(32);
        a.put_u8(off, 0xAB);
        a.put_u16(off + 2, 0xBEEF);
        a.put_u32(off + 4, 0xDEAD_BEEF);
        a.put_u64(off + 8, u64::MAX - 1);
        a.put_ref(off + 16, ArenaRef { start: 7, len: 9 });
        assert_eq!(a.get_u8(off), 0xAB);
        assert_eq!(a.get_u16(off + 2), 0xBEEF);
        assert_eq!(a.get_u32(off + 4), 0xDEAD_BEEF);
        assert_eq!(a.get_u64(off + 8), u64::MAX - 1);
        assert_eq!(a.get_ref(off + 16), ArenaRef { start: 7, len: 9 });
    }

    #[test]
    fn rehydration_validates_header() {
        let mut a = Arena::new();
        let r = a.write_string("carried across");
        let bytes = a.as_bytes().to_vec();

        let b = Arena::from_bytes(&bytes).unwrap();
        assert_eq!(b.str_at(r), "carried across");

        // Wrong magic.
        let mut bad = bytes.clone();
        bad[0] ^= 0xFF;
        assert!(Arena::from_bytes(&bad).is_none());

        // Truncated.
        assert!(Arena::from_bytes(&bytes[..8]).is_none());
        assert!(Arena::from_bytes(&bytes[..bytes.len() - 1]).is_none());
    }

    #[test]
    fn free_byte_accounting() {
        let mut a = Arena::with_capacity(128);
        let free0 = a.free_bytes();
        a.allocate(24);
        assert!(a.free_bytes() <= free0 - 24);
        assert_eq!(
            a.free_bytes(),
            a.total_size() - a.first_free(),
        );
    }
}
