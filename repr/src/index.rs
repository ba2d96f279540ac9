//! Index Block
//!
//! Each file owns exactly one index block. The block is a packed array of `CAPACITY` little
//! endian `u32` words, one per slot. A word stores two pieces of information:
//!
//! ```text
//!  31            20 19                              0
//! +----------------+---------------------------------+
//! |   occupancy    |          block number           |
//! +----------------+---------------------------------+
//! ```
//!
//! The occupancy is the number of valid bytes stored at the start of the referenced data block.
//! Since it only has `BLOCK_LOG` bits, a block can never be recorded as holding all of its
//! `BLOCK_SIZE` bytes, so an insert-mode entry holds at most `MAX_PAYLOAD` bytes.
//!
//! Live entries are stored contiguously from slot 0. The first all-zero word terminates the
//! list; every slot after it must also be zero. Entry `i` covers the logical byte range
//! starting at the sum of the occupancies of entries `0..i`.
//!
//! Fixed-size ("normal") files use the same slots but leave the occupancy at zero: every
//! entry covers exactly `BLOCK_SIZE` bytes of the file.

use crate::{BlockNo, BLOCK_LOG, BLOCK_SIZE, MAX_PAYLOAD};
use static_assertions::{assert_eq_size, const_assert_eq};
use std::fmt;
use thiserror::Error;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

/// Size in bytes of one slot
pub const ENTRY_SIZE: usize = 4;

/// Number of slots in an index block
pub const CAPACITY: usize = BLOCK_SIZE / ENTRY_SIZE;

/// Number of low bits holding the block number
pub const BLOCK_BITS: u32 = 32 - BLOCK_LOG;

/// The largest block number an entry can reference
pub const MAX_BLOCK: u32 = (1 << BLOCK_BITS) - 1;

/// The largest file an insert-mode index block can describe
pub const MAX_FILE_SIZE: u64 = CAPACITY as u64 * MAX_PAYLOAD as u64;

assert_eq_size!(RawEntry, u32);
const_assert_eq!(CAPACITY * ENTRY_SIZE, BLOCK_SIZE);

/// A slot exactly as stored on disk
#[derive(Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct RawEntry(U32<LittleEndian>);

impl RawEntry {
    pub fn word(self) -> u32 {
        self.0.get()
    }

    pub fn block(self) -> BlockNo {
        BlockNo(self.word() & MAX_BLOCK)
    }

    pub fn occupancy(self) -> u16 {
        (self.word() >> BLOCK_BITS) as u16
    }

    pub fn is_sentinel(self) -> bool {
        self.word() == 0
    }
}

impl From<Entry> for RawEntry {
    fn from(entry: Entry) -> Self {
        let word = (u32::from(entry.occupancy) << BLOCK_BITS) | entry.block.0;
        RawEntry(U32::new(word))
    }
}

impl fmt::Debug for RawEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RawEntry")
            .field("block", &self.block())
            .field("occupancy", &self.occupancy())
            .finish()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("block number {0} does not fit in an index entry")]
    BlockOutOfRange(u32),
    #[error("occupancy {0} exceeds the payload of a block")]
    Oversized(usize),
    #[error("entry without a block claims {0} bytes")]
    NullBlock(u16),
    #[error("non-zero slot {0} after the end of the entry list")]
    TrailingSlot(usize),
    #[error("{0} entries do not fit in an index block")]
    TooMany(usize),
}

/// A live slot of the index: a data block and the number of bytes it holds
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Entry {
    block: BlockNo,
    occupancy: u16,
}

impl Entry {
    pub fn new(block: BlockNo, occupancy: usize) -> Result<Self, EntryError> {
        if block.is_null() || block.0 > MAX_BLOCK {
            return Err(EntryError::BlockOutOfRange(block.0));
        }
        if occupancy > MAX_PAYLOAD {
            return Err(EntryError::Oversized(occupancy));
        }
        Ok(Self {
            block,
            occupancy: occupancy as u16,
        })
    }

    #[inline]
    pub fn block(self) -> BlockNo {
        self.block
    }

    #[inline]
    pub fn occupancy(self) -> usize {
        usize::from(self.occupancy)
    }

    /// Bytes that can still be appended before the entry is full
    #[inline]
    pub fn free_space(self) -> usize {
        MAX_PAYLOAD - self.occupancy()
    }

    #[inline]
    pub fn is_full(self) -> bool {
        self.occupancy() == MAX_PAYLOAD
    }

    pub fn with_occupancy(self, occupancy: usize) -> Result<Self, EntryError> {
        Self::new(self.block, occupancy)
    }
}

impl std::convert::TryFrom<RawEntry> for Entry {
    type Error = EntryError;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        let block = raw.block();
        if block.is_null() {
            return Err(EntryError::NullBlock(raw.occupancy()));
        }
        Entry::new(block, usize::from(raw.occupancy()))
    }
}

/// Decode the live entries of an index block
///
/// `data` must be exactly `BLOCK_SIZE` bytes long.
pub fn decode(data: &[u8]) -> Result<Vec<Entry>, EntryError> {
    use std::convert::TryFrom;

    assert_eq!(data.len(), BLOCK_SIZE);
    let verified = LayoutVerified::<_, [RawEntry]>::new_slice_unaligned(data)
        .expect("RawEntry is unaligned");
    let raw: &[RawEntry] = &verified;

    let end = raw
        .iter()
        .position(|slot| slot.is_sentinel())
        .unwrap_or(raw.len());
    if let Some(i) = raw[end..].iter().position(|slot| !slot.is_sentinel()) {
        return Err(EntryError::TrailingSlot(end + i));
    }
    raw[..end].iter().map(|&slot| Entry::try_from(slot)).collect()
}

/// Encode `entries` into an index block, zeroing every slot after the last entry
pub fn encode(entries: &[Entry], dst: &mut [u8]) -> Result<(), EntryError> {
    assert_eq!(dst.len(), BLOCK_SIZE);
    if entries.len() > CAPACITY {
        return Err(EntryError::TooMany(entries.len()));
    }
    let raw: Vec<RawEntry> = entries.iter().map(|&e| RawEntry::from(e)).collect();
    let (live, rest) = dst.split_at_mut(raw.len() * ENTRY_SIZE);
    live.copy_from_slice(raw.as_bytes());
    rest.iter_mut().for_each(|b| *b = 0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing() {
        let entry = Entry::new(BlockNo(0x1_2345), 0xABC).unwrap();
        let raw = RawEntry::from(entry);
        assert_eq!(raw.word(), 0xABC1_2345);
        assert_eq!(raw.as_bytes(), &[0x45, 0x23, 0xC1, 0xAB]);
        assert_eq!(raw.block(), BlockNo(0x1_2345));
        assert_eq!(raw.occupancy(), 0xABC);
    }

    #[test]
    fn validated_construction() {
        assert_eq!(
            Entry::new(BlockNo(7), BLOCK_SIZE),
            Err(EntryError::Oversized(BLOCK_SIZE))
        );
        assert_eq!(
            Entry::new(BlockNo::NULL, 0),
            Err(EntryError::BlockOutOfRange(0))
        );
        assert_eq!(
            Entry::new(BlockNo(MAX_BLOCK + 1), 0),
            Err(EntryError::BlockOutOfRange(MAX_BLOCK + 1))
        );
        let full = Entry::new(BlockNo(MAX_BLOCK), MAX_PAYLOAD).unwrap();
        assert!(full.is_full());
        assert_eq!(full.free_space(), 0);
    }

    #[test]
    fn decode_stops_at_sentinel() {
        let entries = vec![
            Entry::new(BlockNo(10), 100).unwrap(),
            Entry::new(BlockNo(11), MAX_PAYLOAD).unwrap(),
            Entry::new(BlockNo(12), 0).unwrap(),
        ];
        let mut block = vec![0xFF; BLOCK_SIZE];
        encode(&entries, &mut block).unwrap();
        assert!(block[entries.len() * ENTRY_SIZE..].iter().all(|&b| b == 0));
        assert_eq!(decode(&block).unwrap(), entries);
    }

    #[test]
    fn decode_rejects_garbage() {
        let mut block = vec![0; BLOCK_SIZE];
        // Occupancy without a block
        block[..4].copy_from_slice(&(5u32 << BLOCK_BITS).to_le_bytes());
        assert_eq!(decode(&block), Err(EntryError::NullBlock(5)));

        let mut block = vec![0; BLOCK_SIZE];
        block[8..12].copy_from_slice(&9u32.to_le_bytes());
        assert_eq!(decode(&block), Err(EntryError::TrailingSlot(2)));
    }

    #[test]
    fn encode_rejects_overflow() {
        let entry = Entry::new(BlockNo(1), 1).unwrap();
        let entries = vec![entry; CAPACITY + 1];
        let mut block = vec![0; BLOCK_SIZE];
        assert_eq!(
            encode(&entries, &mut block),
            Err(EntryError::TooMany(CAPACITY + 1))
        );
        assert!(encode(&entries[..CAPACITY], &mut block).is_ok());
        assert_eq!(decode(&block).unwrap().len(), CAPACITY);
    }
}
