//! Compaction of insert-mode files.
//!
//! Each pass walks the entries front to back, pulling bytes from the start of the next entry
//! into the free tail of the current one. Entries drained completely are freed and dropped from
//! the index. Passes repeat until one no longer reduces the wasted space.

use crate::errors::{Error, Result};
use crate::layout::Storage;
use crate::pool;
use crate::table::IndexTable;
use crate::volume::FileRecord;
use repr::index::Entry;
use repr::{BlockNo, MAX_PAYLOAD};
use std::cmp;

/// Bytes left unused across every entry
fn waste(table: &IndexTable) -> u64 {
    table
        .entries()
        .iter()
        .map(|e| e.free_space() as u64)
        .sum()
}

#[derive(Debug, Default)]
struct Pass {
    moved: u64,
    freed: u64,
}

pub(crate) fn defragment(storage: &Storage<'_>, file: &mut FileRecord) -> Result<()> {
    let mut table = storage.load_table(file)?;
    let before = waste(&table);
    let entries = table.len();

    let mut passes = 0;
    let mut totals = Pass::default();
    let mut result = Ok(());
    let mut last = before;
    loop {
        passes += 1;
        match compact(storage, &mut table) {
            Ok(pass) => {
                totals.moved += pass.moved;
                totals.freed += pass.freed;
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
        let now = waste(&table);
        if now >= last {
            break;
        }
        last = now;
    }

    file.size = table.logical_size();
    file.blocks = table.len() as u64 + 1;
    file.touch();

    match &result {
        Ok(()) => slog::info!(storage.logger, "defragmented";
            "passes" => passes,
            "entries_before" => entries,
            "entries_after" => table.len(),
            "waste_before" => before,
            "waste_after" => waste(&table),
            "bytes_moved" => totals.moved,
            "blocks_freed" => totals.freed),
        Err(e) => slog::warn!(storage.logger, "defragment failed, keeping partial changes";
            "error" => %e,
            "entries" => table.len()),
    }
    result
}

/// A single front to back pass over the entries
///
/// Each migration ends with one index store. The remainder of a partly drained entry is copied
/// to a new block rather than shifted in place, so until that store the blocks the index points
/// at are unchanged within the bytes it covers. Only a full volume forces the in-place shift.
fn compact(storage: &Storage<'_>, table: &mut IndexTable) -> Result<Pass> {
    let mut pass = Pass::default();
    let mut current = pool::block();
    let mut next = pool::block();

    let mut i = 0;
    while i + 1 < table.len() {
        let entry = table.get(i)?;
        if entry.is_full() {
            i += 1;
            continue;
        }
        let following = table.get(i + 1)?;
        let occupancy = entry.occupancy();
        let available = following.occupancy();
        let movable = cmp::min(MAX_PAYLOAD - occupancy, available);

        if movable > 0 {
            storage.read(entry.block(), &mut current)?;
            storage.read(following.block(), &mut next)?;
            // Lands past the stored occupancy of entry i
            current[occupancy..occupancy + movable].copy_from_slice(&next[..movable]);
            storage.write(entry.block(), &current)?;
        }

        if available == movable {
            table.update(storage.device, |t| {
                t.set_occupancy(i, occupancy + movable)?;
                t.remove(i + 1).map(drop)
            })?;
            storage.free(following.block());
            slog::debug!(storage.logger, "drained entry";
                "entry" => i + 1,
                "block" => %following.block(),
                "bytes" => movable);
            pass.moved += movable as u64;
            pass.freed += 1;
            // Entry i may still have room for the entry that slid into i + 1
            continue;
        }

        let rest = available - movable;
        next.copy_within(movable..available, 0);
        next[rest..available].iter_mut().for_each(|b| *b = 0);
        let block = match relocate(storage, &next)? {
            Some(block) => block,
            None => {
                slog::debug!(storage.logger, "no free block, shifting in place";
                    "entry" => i + 1);
                storage.write(following.block(), &next)?;
                following.block()
            }
        };
        let remainder = Entry::new(block, rest).map_err(|e| storage.corrupt(table, e))?;
        let stored = table.update(storage.device, |t| {
            t.set_occupancy(i, occupancy + movable)?;
            t.set(i + 1, remainder)
        });
        if block != following.block() {
            // Whichever block the stored index no longer points at goes back
            match stored {
                Ok(()) => storage.free(following.block()),
                Err(_) => storage.free(block),
            }
        }
        stored?;

        slog::debug!(storage.logger, "migrated bytes";
            "from" => i + 1,
            "to" => i,
            "bytes" => movable,
            "block" => %block);
        pass.moved += movable as u64;
        i += 1;
    }
    Ok(pass)
}

/// Copy `data` into a newly allocated block, or `None` when the volume is full
fn relocate(storage: &Storage<'_>, data: &[u8]) -> Result<Option<BlockNo>> {
    let block = match storage.allocator.allocate() {
        Ok(block) => block,
        Err(Error::NoSpace) => return Ok(None),
        Err(e) => return Err(e),
    };
    if let Err(e) = storage.write(block, data) {
        storage.free(block);
        return Err(e);
    }
    Ok(Some(block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read;
    use crate::volume::test_storage;
    use crate::write;

    fn contents(storage: &Storage<'_>, file: &FileRecord) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0; MAX_PAYLOAD];
        loop {
            let n = read::read(storage, file, out.len() as u64, &mut buf).unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    fn occupancies(storage: &Storage<'_>, file: &FileRecord) -> Vec<usize> {
        let table = storage.load_table(file).unwrap();
        table.entries().iter().map(|e| e.occupancy()).collect()
    }

    #[test]
    fn merges_single_byte_entries() {
        test_storage(64, |storage, file| {
            // Inserting at the front every time splits off one entry per byte
            for b in (b'a'..=b'j').rev() {
                write::write(storage, file, 0, &[b]).unwrap();
            }
            assert_eq!(occupancies(storage, file).len(), 10);
            let free_before = storage.allocator.free_blocks();

            defragment(storage, file).unwrap();
            assert_eq!(occupancies(storage, file), vec![10]);
            assert_eq!(contents(storage, file), b"abcdefghij");
            assert_eq!(file.size, 10);
            assert_eq!(file.blocks, 2);
            assert_eq!(storage.allocator.free_blocks(), free_before + 9);
        });
    }

    #[test]
    fn preserves_content_and_is_idempotent() {
        test_storage(64, |storage, file| {
            let base: Vec<u8> = (0..6000u32).map(|i| (i % 241) as u8).collect();
            write::write(storage, file, 0, &base).unwrap();
            write::write(storage, file, 100, b"inserted").unwrap();
            write::write(storage, file, 4500, &[9; 300]).unwrap();
            let before = contents(storage, file);

            defragment(storage, file).unwrap();
            let once = occupancies(storage, file);
            assert_eq!(contents(storage, file), before);
            assert_eq!(file.size, before.len() as u64);
            // Every entry but the last is full
            assert!(once[..once.len() - 1].iter().all(|&o| o == MAX_PAYLOAD));

            defragment(storage, file).unwrap();
            assert_eq!(occupancies(storage, file), once);
            assert_eq!(contents(storage, file), before);
        });
    }

    #[test]
    fn empty_and_single_entry_files() {
        test_storage(16, |storage, file| {
            defragment(storage, file).unwrap();
            assert_eq!(file.size, 0);

            write::write(storage, file, 0, b"abc").unwrap();
            defragment(storage, file).unwrap();
            assert_eq!(occupancies(storage, file), vec![3]);
        });
    }

    #[test]
    fn drops_empty_entries() {
        test_storage(16, |storage, file| {
            let mut table = storage.load_table(file).unwrap();
            for occupancy in &[5, 0, 0, 7] {
                let block = storage.allocate_zeroed().unwrap();
                table.push(Entry::new(block, *occupancy).unwrap()).unwrap();
            }
            table.store(storage.device).unwrap();
            file.size = 12;

            defragment(storage, file).unwrap();
            assert_eq!(occupancies(storage, file), vec![12]);
        });
    }

    #[test]
    fn shifts_in_place_when_volume_is_full() {
        // Index block plus two data blocks
        test_storage(4, |storage, file| {
            write::write(storage, file, 0, &vec![b'b'; MAX_PAYLOAD]).unwrap();
            write::write(storage, file, 0, b"a").unwrap();
            assert_eq!(occupancies(storage, file), vec![1, MAX_PAYLOAD]);
            assert_eq!(storage.allocator.free_blocks(), 0);
            let before = contents(storage, file);

            defragment(storage, file).unwrap();
            assert_eq!(occupancies(storage, file), vec![MAX_PAYLOAD, 1]);
            assert_eq!(contents(storage, file), before);
            assert_eq!(storage.allocator.free_blocks(), 0);
        });
    }
}
