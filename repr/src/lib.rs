//! An insfs volume is a flat array of fixed size blocks. Every regular file owns:
//!
//! * An [Index Block](index/index.html), a single block holding a packed table of entries
//! * Zero or more data blocks, each referenced by exactly one index entry
//!
//! Block number `0` is never used for data: in an index entry it marks an unallocated slot.

use static_assertions::const_assert;
use std::fmt;

pub mod index;

/// log2 of the block size
pub const BLOCK_LOG: u32 = 12;

/// The size of every block on the volume: 4 KiB
pub const BLOCK_SIZE: usize = 1 << BLOCK_LOG;

/// The most bytes an insert-mode entry can hold.
///
/// The occupancy of a block is stored in `BLOCK_LOG` bits, which can count up to
/// `BLOCK_SIZE - 1` but never `BLOCK_SIZE` itself.
pub const MAX_PAYLOAD: usize = BLOCK_SIZE - 1;

const_assert!(BLOCK_SIZE.is_power_of_two());
const_assert!(MAX_PAYLOAD < (1 << BLOCK_LOG));

/// A physical block number on the volume
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockNo(pub u32);

impl BlockNo {
    pub const NULL: BlockNo = BlockNo(0);

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Byte offset of the block from the start of the volume
    #[inline]
    pub fn byte_offset(self) -> u64 {
        u64::from(self.0) * BLOCK_SIZE as u64
    }
}

impl fmt::Display for BlockNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[test]
fn block_offsets() {
    assert_eq!(BlockNo(0).byte_offset(), 0);
    assert_eq!(BlockNo(3).byte_offset(), 3 * 4096);
    assert!(BlockNo::NULL.is_null());
    assert!(!BlockNo(1).is_null());
}
