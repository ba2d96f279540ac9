//! Insert-mode reads.

use crate::errors::Result;
use crate::layout::Storage;
use crate::locate::{locate, Access};
use crate::pool;
use crate::volume::FileRecord;
use std::cmp;

/// Read from the single entry holding `pos`
///
/// Never crosses an entry boundary, so short reads are normal. Returns 0 at or past the end of
/// the file.
pub(crate) fn read(
    storage: &Storage<'_>,
    file: &FileRecord,
    pos: u64,
    dst: &mut [u8],
) -> Result<usize> {
    if pos >= file.size || dst.is_empty() {
        return Ok(0);
    }
    let table = storage.load_table(file)?;
    let location = locate(&table, pos, Access::Read)?;
    let entry = table.get(location.index).map_err(|e| {
        slog::error!(storage.logger, "size points past the index";
            "pos" => pos,
            "size" => file.size,
            "entries" => table.len());
        e
    })?;

    let available = entry.occupancy().saturating_sub(location.offset);
    let n = cmp::min(dst.len(), available);
    if n == 0 {
        return Ok(0);
    }

    let mut buf = pool::block();
    storage.read(entry.block(), &mut buf)?;
    dst[..n].copy_from_slice(&buf[location.offset..location.offset + n]);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::volume::test_storage;
    use crate::write;
    use repr::index::Entry;
    use repr::MAX_PAYLOAD;

    #[test]
    fn reads_stop_at_entry_boundaries() {
        test_storage(16, |storage, file| {
            write::write(storage, file, 0, b"world").unwrap();
            write::write(storage, file, 0, b"hello ").unwrap();

            let mut buf = [0u8; 64];
            assert_eq!(read(storage, file, 0, &mut buf).unwrap(), 6);
            assert_eq!(&buf[..6], b"hello ");
            assert_eq!(read(storage, file, 6, &mut buf).unwrap(), 5);
            assert_eq!(&buf[..5], b"world");
            assert_eq!(read(storage, file, 8, &mut buf[..2]).unwrap(), 2);
            assert_eq!(&buf[..2], b"rl");
        });
    }

    #[test]
    fn eof() {
        test_storage(16, |storage, file| {
            let mut buf = [0u8; 8];
            assert_eq!(read(storage, file, 0, &mut buf).unwrap(), 0);
            write::write(storage, file, 0, b"abc").unwrap();
            assert_eq!(read(storage, file, 3, &mut buf).unwrap(), 0);
            assert_eq!(read(storage, file, 300, &mut buf).unwrap(), 0);
            assert_eq!(read(storage, file, 2, &mut buf[..0]).unwrap(), 0);
        });
    }

    #[test]
    fn full_block_boundary() {
        test_storage(16, |storage, file| {
            let data: Vec<u8> = (0..MAX_PAYLOAD + 1).map(|i| (i % 256) as u8).collect();
            write::write(storage, file, 0, &data).unwrap();

            let mut buf = vec![0u8; MAX_PAYLOAD + 10];
            assert_eq!(read(storage, file, 0, &mut buf).unwrap(), MAX_PAYLOAD);
            assert_eq!(&buf[..MAX_PAYLOAD], &data[..MAX_PAYLOAD]);
            assert_eq!(read(storage, file, MAX_PAYLOAD as u64, &mut buf).unwrap(), 1);
            assert_eq!(buf[0], data[MAX_PAYLOAD]);
        });
    }

    #[test]
    fn size_past_index_is_reported() {
        test_storage(16, |storage, file| {
            let mut table = storage.load_table(file).unwrap();
            let block = storage.allocate_zeroed().unwrap();
            table.push(Entry::new(block, 10).unwrap()).unwrap();
            table.store(storage.device).unwrap();
            file.size = 20;

            let mut buf = [0u8; 8];
            assert!(matches!(
                read(storage, file, 15, &mut buf),
                Err(Error::EntryMissing { index: 1 })
            ));
        });
    }
}
