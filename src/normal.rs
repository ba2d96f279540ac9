//! Fixed block encoding.
//!
//! Entry `i` covers bytes `[i * BLOCK_SIZE, (i + 1) * BLOCK_SIZE)` of the file, and writes
//! overwrite in place. Entries carry no occupancy; the file size alone says how much of the
//! last block is data. A write reaching past the last block stores what fits and returns a
//! short count.

use crate::errors::{Error, Result};
use crate::file::BlockInfo;
use crate::layout::Storage;
use crate::pool;
use crate::table::IndexTable;
use crate::volume::FileRecord;
use repr::index::{Entry, CAPACITY};
use repr::BLOCK_SIZE;
use std::cmp;

pub(crate) const PAYLOAD: usize = BLOCK_SIZE;
pub(crate) const MAX_FILE_SIZE: u64 = CAPACITY as u64 * BLOCK_SIZE as u64;

fn split_pos(pos: u64) -> Result<(usize, usize)> {
    if pos >= MAX_FILE_SIZE {
        return Err(Error::FileTooBig { pos });
    }
    let block = BLOCK_SIZE as u64;
    Ok(((pos / block) as usize, (pos % block) as usize))
}

pub(crate) fn write(
    storage: &Storage<'_>,
    file: &mut FileRecord,
    pos: u64,
    data: &[u8],
) -> Result<usize> {
    let (target, _) = split_pos(pos)?;
    if data.is_empty() {
        return Ok(0);
    }
    let mut table = storage.load_table(file)?;

    let result = write_blocks(storage, file, &mut table, target, pos, data);

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

fn allocate_slot(storage: &Storage<'_>, table: &mut IndexTable) -> Result<()> {
    let block = storage.allocate_zeroed()?;
    let entry = Entry::new(block, 0).map_err(|e| storage.corrupt(table, e))?;
    table.update(storage.device, |t| t.push(entry)).map_err(|e| {
        storage.free(block);
        e
    })
}

fn write_blocks(
    storage: &Storage<'_>,
    file: &mut FileRecord,
    table: &mut IndexTable,
    target: usize,
    mut pos: u64,
    data: &[u8],
) -> Result<usize> {
    if table.len() < target {
        slog::debug!(storage.logger, "filling hole";
            "first" => table.len(),
            "count" => target - table.len());
    }
    while table.len() < target {
        allocate_slot(storage, table)?;
    }

    let mut written = 0;
    while written < data.len() {
        let (index, offset) = match split_pos(pos) {
            Ok(split) => split,
            Err(Error::FileTooBig { .. }) if written > 0 => {
                slog::debug!(storage.logger, "short write at capacity";
                    "written" => written,
                    "requested" => data.len());
                break;
            }
            Err(e) => return Err(e),
        };
        if index == table.len() {
            allocate_slot(storage, table)?;
        }
        let block = table.get(index)?.block();

        let mut buf = pool::block();
        let n = cmp::min(data.len() - written, PAYLOAD - offset);
        if n < PAYLOAD {
            storage.read(block, &mut buf)?;
        }
        buf[offset..offset + n].copy_from_slice(&data[written..written + n]);
        storage.write(block, &buf)?;

        pos += n as u64;
        written += n;
        file.size = cmp::max(file.size, pos);
    }
    Ok(written)
}

pub(crate) fn read(
    storage: &Storage<'_>,
    file: &FileRecord,
    pos: u64,
    dst: &mut [u8],
) -> Result<usize> {
    if pos >= file.size || dst.is_empty() {
        return Ok(0);
    }
    let (index, offset) = split_pos(pos)?;
    let table = storage.load_table(file)?;
    let entry = table.get(index)?;

    let remaining = (file.size - pos).min(PAYLOAD as u64) as usize;
    let n = cmp::min(dst.len(), cmp::min(PAYLOAD - offset, remaining));

    let mut buf = pool::block();
    storage.read(entry.block(), &mut buf)?;
    dst[..n].copy_from_slice(&buf[offset..offset + n]);
    Ok(n)
}

pub(crate) fn usage(table: &IndexTable, size: u64) -> Vec<BlockInfo> {
    table
        .entries()
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let start = i as u64 * PAYLOAD as u64;
            BlockInfo {
                block: e.block(),
                bytes: size.saturating_sub(start).min(PAYLOAD as u64) as usize,
            }
        })
        .collect()
}
