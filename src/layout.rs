//! Shared plumbing for the two file encodings.

use crate::alloc::BlockAllocator;
use crate::config::Encoding;
use crate::device::BlockDevice;
use crate::errors::{Error, Result};
use crate::file::BlockInfo;
use crate::table::IndexTable;
use crate::volume::FileRecord;
use crate::{defrag, normal, pool, read, write};
use repr::index::{EntryError, MAX_FILE_SIZE};
use repr::{BlockNo, MAX_PAYLOAD};
use slog::Logger;
use static_assertions::const_assert;

// Insert-mode entries give up one byte of every block to fit the occupancy in the index word
const_assert!(MAX_PAYLOAD < normal::PAYLOAD);
const_assert!(MAX_FILE_SIZE < normal::MAX_FILE_SIZE);

/// Borrowed view of the volume a file operation runs against
#[derive(Clone, Copy)]
pub(crate) struct Storage<'a> {
    pub device: &'a dyn BlockDevice,
    pub allocator: &'a dyn BlockAllocator,
    pub logger: &'a Logger,
}

impl<'a> Storage<'a> {
    pub fn read(&self, block: BlockNo, buf: &mut [u8]) -> Result<()> {
        self.device
            .read_block(block, buf)
            .map_err(|e| Error::io(block, e))
    }

    pub fn write(&self, block: BlockNo, buf: &[u8]) -> Result<()> {
        self.device
            .write_block(block, buf)
            .map_err(|e| Error::io(block, e))
    }

    /// Allocate a block and clear it on the device
    ///
    /// The block is handed back to the allocator if clearing it fails.
    pub fn allocate_zeroed(&self) -> Result<BlockNo> {
        let block = self.allocator.allocate()?;
        let zeros = pool::block();
        if let Err(e) = self.write(block, &zeros) {
            self.allocator.free(block);
            return Err(e);
        }
        Ok(block)
    }

    pub fn free(&self, block: BlockNo) {
        slog::trace!(self.logger, "freeing block"; "block" => %block);
        self.allocator.free(block);
    }

    pub fn load_table(&self, file: &FileRecord) -> Result<IndexTable> {
        IndexTable::load(self.device, file.index_block)
    }

    pub fn corrupt(&self, table: &IndexTable, source: EntryError) -> Error {
        Error::corrupt(table.block(), source)
    }
}

/// The operations whose behaviour depends on a file's encoding
///
/// Callers hold the file's lock for the whole call.
pub(crate) trait Layout {
    /// Bytes of data a single block can hold
    fn payload(&self) -> usize;

    /// One past the largest position a write may start at
    fn max_file_size(&self) -> u64;

    fn read(&self, storage: &Storage<'_>, file: &FileRecord, pos: u64, dst: &mut [u8])
        -> Result<usize>;

    fn write(&self, storage: &Storage<'_>, file: &mut FileRecord, pos: u64, data: &[u8])
        -> Result<usize>;

    /// Bytes of file data held by each allocated entry, in file order
    fn usage(&self, table: &IndexTable, size: u64) -> Vec<BlockInfo>;

    fn defragment(&self, storage: &Storage<'_>, file: &mut FileRecord) -> Result<()>;
}

impl Layout for Encoding {
    fn payload(&self) -> usize {
        match self {
            Encoding::Insert => MAX_PAYLOAD,
            Encoding::Normal => normal::PAYLOAD,
        }
    }

    fn max_file_size(&self) -> u64 {
        match self {
            Encoding::Insert => MAX_FILE_SIZE,
            Encoding::Normal => normal::MAX_FILE_SIZE,
        }
    }

    fn read(
        &self,
        storage: &Storage<'_>,
        file: &FileRecord,
        pos: u64,
        dst: &mut [u8],
    ) -> Result<usize> {
        match self {
            Encoding::Insert => read::read(storage, file, pos, dst),
            Encoding::Normal => normal::read(storage, file, pos, dst),
        }
    }

    fn write(
        &self,
        storage: &Storage<'_>,
        file: &mut FileRecord,
        pos: u64,
        data: &[u8],
    ) -> Result<usize> {
        match self {
            Encoding::Insert => write::write(storage, file, pos, data),
            Encoding::Normal => normal::write(storage, file, pos, data),
        }
    }

    fn usage(&self, table: &IndexTable, size: u64) -> Vec<BlockInfo> {
        match self {
            Encoding::Insert => table
                .entries()
                .iter()
                .map(|e| BlockInfo {
                    block: e.block(),
                    bytes: e.occupancy(),
                })
                .collect(),
            Encoding::Normal => normal::usage(table, size),
        }
    }

    fn defragment(&self, storage: &Storage<'_>, file: &mut FileRecord) -> Result<()> {
        match self {
            Encoding::Insert => defrag::defragment(storage, file),
            Encoding::Normal => {
                slog::debug!(storage.logger, "defragment is a no-op for normal files");
                Ok(())
            }
        }
    }
}
