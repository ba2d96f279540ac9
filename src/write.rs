//! Insert-mode writes.
//!
//! A write never overwrites existing bytes. When the write position falls before the end of the
//! data already stored in an entry, the tail of that entry is moved into a freshly allocated
//! block inserted right after it, and the new bytes are appended in its place.
//!
//! Every block and index mutation is written through to the device before the next one, and
//! nothing is rolled back on failure. The in-memory table only changes once its store succeeds,
//! so the size derived from it always matches the index on the device.
//!
//! A write that runs into the capacity limit after storing some of its bytes is a short write.

use crate::errors::{Error, Result};
use crate::layout::Storage;
use crate::locate::{locate, Access, Location};
use crate::pool;
use crate::table::IndexTable;
use crate::volume::FileRecord;
use repr::index::{Entry, CAPACITY, MAX_FILE_SIZE};
use repr::MAX_PAYLOAD;
use std::cmp;

pub(crate) fn write(
    storage: &Storage<'_>,
    file: &mut FileRecord,
    pos: u64,
    data: &[u8],
) -> Result<usize> {
    if pos >= MAX_FILE_SIZE {
        return Err(Error::FileTooBig { pos });
    }
    if data.is_empty() {
        return Ok(0);
    }

    let mut table = storage.load_table(file)?;
    let target = locate(&table, pos, Access::Write)?;

    let result = fill_holes(storage, &mut table, target.index)
        .and_then(|()| write_entries(storage, file, &mut table, pos, data));

    // Whatever happened, the size is what the index says it is
    file.size = table.logical_size();
    file.blocks = table.len() as u64 + 1;
    file.touch();
    if let Err(e) = &result {
        slog::warn!(storage.logger, "write failed, keeping partial changes";
            "error" => %e,
            "size" => file.size,
            "entries" => table.len());
    }
    result
}

/// Materialize every unallocated slot before `target` as a full block of zeros
fn fill_holes(storage: &Storage<'_>, table: &mut IndexTable, target: usize) -> Result<()> {
    if target <= table.len() {
        return Ok(());
    }
    slog::debug!(storage.logger, "filling hole";
        "first" => table.len(),
        "count" => target - table.len());
    while table.len() < target {
        let block = storage.allocate_zeroed()?;
        let entry = Entry::new(block, MAX_PAYLOAD).map_err(|e| storage.corrupt(table, e))?;
        if let Err(e) = table.update(storage.device, |t| t.push(entry)) {
            storage.free(block);
            return Err(e);
        }
    }
    Ok(())
}

fn write_entries(
    storage: &Storage<'_>,
    file: &mut FileRecord,
    table: &mut IndexTable,
    mut pos: u64,
    data: &[u8],
) -> Result<usize> {
    let mut written = 0;
    while written < data.len() {
        let Location { index, offset } = match locate(table, pos, Access::Write) {
            Ok(location) => location,
            Err(Error::FileTooBig { .. }) if written > 0 => {
                slog::debug!(storage.logger, "short write at capacity";
                    "written" => written,
                    "requested" => data.len());
                break;
            }
            Err(e) => return Err(e),
        };
        if index == table.len() {
            let block = storage.allocate_zeroed()?;
            let entry = Entry::new(block, 0).map_err(|e| storage.corrupt(table, e))?;
            if let Err(e) = table.update(storage.device, |t| t.push(entry)) {
                storage.free(block);
                return Err(e);
            }
        }
        let entry = table.get(index)?;

        let mut buf = pool::block();
        storage.read(entry.block(), &mut buf)?;

        let occupancy = entry.occupancy();
        if offset < occupancy {
            split(storage, table, index, &mut buf, offset)?;
        } else if offset > occupancy {
            slog::debug!(storage.logger, "zero filling gap";
                "entry" => index,
                "from" => occupancy,
                "to" => offset);
            buf[occupancy..offset].iter_mut().for_each(|b| *b = 0);
        }

        let n = cmp::min(data.len() - written, MAX_PAYLOAD - offset);
        buf[offset..offset + n].copy_from_slice(&data[written..written + n]);
        storage.write(entry.block(), &buf)?;
        table.update(storage.device, |t| t.set_occupancy(index, offset + n))?;

        pos += n as u64;
        written += n;
        file.size = table.logical_size();
    }
    Ok(written)
}

/// Move bytes `at..occupancy` of entry `index` into a new entry inserted right after it
///
/// `buf` holds the contents of the entry's block; the moved bytes are zeroed in it, and the
/// caller is responsible for writing it back.
fn split(
    storage: &Storage<'_>,
    table: &mut IndexTable,
    index: usize,
    buf: &mut [u8],
    at: usize,
) -> Result<()> {
    if table.is_full() {
        return Err(Error::IndexFull { capacity: CAPACITY });
    }
    let entry = table.get(index)?;
    let occupancy = entry.occupancy();
    let moved = occupancy - at;

    let block = storage.allocator.allocate()?;
    let mut tail = pool::block();
    tail[..moved].copy_from_slice(&buf[at..occupancy]);
    if let Err(e) = storage.write(block, &tail) {
        storage.allocator.free(block);
        return Err(e);
    }
    buf[at..occupancy].iter_mut().for_each(|b| *b = 0);

    let new_entry = Entry::new(block, moved).map_err(|e| storage.corrupt(table, e))?;
    let stored = table.update(storage.device, |t| {
        t.insert(index + 1, new_entry)?;
        t.set_occupancy(index, at)
    });
    if let Err(e) = stored {
        storage.free(block);
        return Err(e);
    }

    slog::debug!(storage.logger, "split entry";
        "entry" => index,
        "at" => at,
        "moved" => moved,
        "new_block" => %block);
    Ok(())
}
