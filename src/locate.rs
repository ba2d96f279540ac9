//! Mapping logical file offsets onto insert-mode index entries.

use crate::errors::{Error, Result};
use crate::table::IndexTable;
use repr::index::CAPACITY;
use repr::MAX_PAYLOAD;
use std::convert::TryFrom;

/// Which side of an entry boundary a position resolves to
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    /// A position at the end of an entry resolves to the end of that entry, so appends fill
    /// it up. A full entry resolves to the start of the next one instead.
    Write,
    /// A position at the end of an entry resolves to the start of the next one, since the
    /// last byte of the entry is at `end - 1`.
    Read,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Location {
    /// Slot of the entry. May be past the last live entry.
    pub index: usize,
    /// Offset of the position inside that entry's block
    pub offset: usize,
}

/// Find the entry holding logical position `pos`
///
/// Positions past the end of the file resolve to slots after the last live entry, as if every
/// slot in between held `MAX_PAYLOAD` bytes. Fails with `FileTooBig` when the slot would be
/// outside of the index block.
pub fn locate(table: &IndexTable, pos: u64, access: Access) -> Result<Location> {
    let mut total = 0u64;
    for (i, entry) in table.entries().iter().enumerate() {
        let start = total;
        total += entry.occupancy() as u64;
        let found = match access {
            Access::Write => total >= pos,
            Access::Read => total > pos,
        };
        if found {
            let offset = (pos - start) as usize;
            let location = if offset >= MAX_PAYLOAD {
                Location {
                    index: i + 1,
                    offset: 0,
                }
            } else {
                Location { index: i, offset }
            };
            return check(location, pos);
        }
    }

    let remaining = pos - total;
    let skipped = usize::try_from(remaining / MAX_PAYLOAD as u64).unwrap_or(usize::MAX);
    let location = Location {
        index: table.len().saturating_add(skipped),
        offset: (remaining % MAX_PAYLOAD as u64) as usize,
    };
    check(location, pos)
}

fn check(location: Location, pos: u64) -> Result<Location> {
    if location.index >= CAPACITY {
        return Err(Error::FileTooBig { pos });
    }
    Ok(location)
}
