use crate::device::{check_request, BlockDevice};
use parking_lot::Mutex;
use positioned_io::{ReadAt, WriteAt};
use repr::{BlockNo, BLOCK_SIZE};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

/// A volume image stored in a regular file
///
/// Block `n` lives at byte offset `n * BLOCK_SIZE`. Every write is followed by `sync_data`.
#[derive(Debug)]
pub struct FileDevice {
    file: Mutex<fs::File>,
    block_count: u32,
}

impl FileDevice {
    /// Create (or truncate) an image at `path` sized for `block_count` blocks
    pub fn create<P: AsRef<Path>>(path: P, block_count: u32) -> io::Result<Self> {
        Self::_create(path.as_ref(), block_count)
    }

    fn _create(path: &Path, block_count: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(u64::from(block_count) * BLOCK_SIZE as u64)?;
        Ok(Self::new(file, block_count))
    }

    /// Wrap an already open image of `block_count` blocks
    pub fn new(file: fs::File, block_count: u32) -> Self {
        Self {
            file: Mutex::new(file),
            block_count,
        }
    }
}

impl BlockDevice for FileDevice {
    fn read_block(&self, block: BlockNo, buf: &mut [u8]) -> io::Result<()> {
        check_request(block, buf.len(), self.block_count)?;
        let file = self.file.lock();
        ReadAt::read_exact_at(&*file, block.byte_offset(), buf)
    }

    fn write_block(&self, block: BlockNo, buf: &[u8]) -> io::Result<()> {
        check_request(block, buf.len(), self.block_count)?;
        let mut file = self.file.lock();
        WriteAt::write_all_at(&mut *file, block.byte_offset(), buf)?;
        WriteAt::flush(&mut *file)?;
        file.sync_data()
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.img");

        let device = FileDevice::create(&path, 16).unwrap();
        let mut buf = vec![0; BLOCK_SIZE];
        buf[..5].copy_from_slice(b"hello");
        device.write_block(BlockNo(5), &buf).unwrap();
        drop(device);

        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        assert_eq!(file.metadata().unwrap().len(), 16 * BLOCK_SIZE as u64);
        let device = FileDevice::new(file, 16);
        let mut out = vec![0xFF; BLOCK_SIZE];
        device.read_block(BlockNo(5), &mut out).unwrap();
        assert_eq!(out, buf);
        device.read_block(BlockNo(6), &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
        assert!(device.read_block(BlockNo(16), &mut out).is_err());
    }
}
