use parking_lot::{Mutex, RwLock};
use repr::{BlockNo, BLOCK_SIZE};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

/// Fixed size block storage
///
/// Buffers passed in and out are always exactly `BLOCK_SIZE` bytes. A write is durable once
/// `write_block` returns.
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, block: BlockNo, buf: &mut [u8]) -> io::Result<()>;
    fn write_block(&self, block: BlockNo, buf: &[u8]) -> io::Result<()>;

    /// Number of addressable blocks, including the reserved block 0
    fn block_count(&self) -> u32;
}

impl<D: BlockDevice + ?Sized> BlockDevice for Box<D> {
    fn read_block(&self, block: BlockNo, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_block(block, buf)
    }

    fn write_block(&self, block: BlockNo, buf: &[u8]) -> io::Result<()> {
        (**self).write_block(block, buf)
    }

    fn block_count(&self) -> u32 {
        (**self).block_count()
    }
}

impl<D: BlockDevice + ?Sized> BlockDevice for Arc<D> {
    fn read_block(&self, block: BlockNo, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_block(block, buf)
    }

    fn write_block(&self, block: BlockNo, buf: &[u8]) -> io::Result<()> {
        (**self).write_block(block, buf)
    }

    fn block_count(&self) -> u32 {
        (**self).block_count()
    }
}

pub(crate) fn check_request(block: BlockNo, len: usize, block_count: u32) -> io::Result<()> {
    if len != BLOCK_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("buffer of {} bytes is not a block", len),
        ));
    }
    if block.is_null() || block.0 >= block_count {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("block {} outside of the device", block),
        ));
    }
    Ok(())
}

/// Switches for injecting device errors in tests
#[derive(Debug, Default)]
struct Faults {
    failing: bool,
    read_only: bool,
    failing_block: Option<BlockNo>,
    writes_left: Option<usize>,
}

impl Faults {
    fn check_write(&mut self, block: BlockNo) -> io::Result<()> {
        if self.read_only {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "device is read-only",
            ));
        }
        if self.failing_block == Some(block) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("write to block {} failed", block),
            ));
        }
        match &mut self.writes_left {
            Some(0) => Err(io::Error::new(io::ErrorKind::Other, "write budget exhausted")),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Sparse in-memory device. Blocks never written read back as zeros.
#[derive(Debug)]
pub struct MemoryDevice {
    blocks: RwLock<HashMap<BlockNo, Box<[u8]>>>,
    block_count: u32,
    faults: Mutex<Faults>,
}

impl MemoryDevice {
    pub fn new(block_count: u32) -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
            block_count,
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Make every following read and write fail with an I/O error
    pub fn set_failing(&self, failing: bool) {
        self.faults.lock().failing = failing;
    }

    /// Make every following write fail, while reads keep working
    pub fn set_read_only(&self, read_only: bool) {
        self.faults.lock().read_only = read_only;
    }

    /// Make writes to `block` fail, leaving every other block writable
    pub fn set_failing_block(&self, block: Option<BlockNo>) {
        self.faults.lock().failing_block = block;
    }

    /// Let `writes` more writes through, then fail every write after them
    ///
    /// `None` lifts the limit.
    pub fn set_write_budget(&self, writes: Option<usize>) {
        self.faults.lock().writes_left = writes;
    }

    /// Number of blocks that have been written at least once
    pub fn written_blocks(&self) -> usize {
        self.blocks.read().len()
    }

    fn check(&self, block: BlockNo, len: usize) -> io::Result<()> {
        if self.faults.lock().failing {
            return Err(io::Error::new(io::ErrorKind::Other, "device failure"));
        }
        check_request(block, len, self.block_count)
    }
}

impl BlockDevice for MemoryDevice {
    fn read_block(&self, block: BlockNo, buf: &mut [u8]) -> io::Result<()> {
        self.check(block, buf.len())?;
        match self.blocks.read().get(&block) {
            Some(data) => buf.copy_from_slice(data),
            None => buf.iter_mut().for_each(|b| *b = 0),
        }
        Ok(())
    }

    fn write_block(&self, block: BlockNo, buf: &[u8]) -> io::Result<()> {
        self.check(block, buf.len())?;
        self.faults.lock().check_write(block)?;
        self.blocks.write().insert(block, buf.into());
        Ok(())
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_blocks_are_zero() {
        let device = MemoryDevice::new(8);
        let mut buf = vec![0xFF; BLOCK_SIZE];
        device.read_block(BlockNo(3), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));

        buf[0] = 7;
        device.write_block(BlockNo(3), &buf).unwrap();
        let mut out = vec![0; BLOCK_SIZE];
        device.read_block(BlockNo(3), &mut out).unwrap();
        assert_eq!(out[0], 7);
        assert_eq!(device.written_blocks(), 1);
    }

    #[test]
    fn rejects_bad_requests() {
        let device = MemoryDevice::new(8);
        let mut buf = vec![0; BLOCK_SIZE];
        assert!(device.read_block(BlockNo(8), &mut buf).is_err());
        assert!(device.read_block(BlockNo::NULL, &mut buf).is_err());
        assert!(device.write_block(BlockNo(1), &buf[..10]).is_err());

        device.set_failing(true);
        assert!(device.read_block(BlockNo(1), &mut buf).is_err());
        device.set_failing(false);
        assert!(device.read_block(BlockNo(1), &mut buf).is_ok());

        device.set_read_only(true);
        assert!(device.read_block(BlockNo(1), &mut buf).is_ok());
        assert!(device.write_block(BlockNo(1), &buf).is_err());
    }

    #[test]
    fn targeted_write_faults() {
        let device = MemoryDevice::new(8);
        let buf = vec![0; BLOCK_SIZE];
        device.set_failing_block(Some(BlockNo(2)));
        assert!(device.write_block(BlockNo(2), &buf).is_err());
        assert!(device.write_block(BlockNo(3), &buf).is_ok());
        device.set_failing_block(None);
        assert!(device.write_block(BlockNo(2), &buf).is_ok());

        device.set_write_budget(Some(2));
        assert!(device.write_block(BlockNo(1), &buf).is_ok());
        assert!(device.write_block(BlockNo(1), &buf).is_ok());
        assert!(device.write_block(BlockNo(1), &buf).is_err());
        let mut out = vec![0; BLOCK_SIZE];
        assert!(device.read_block(BlockNo(1), &mut out).is_ok());
        device.set_write_budget(None);
        assert!(device.write_block(BlockNo(1), &buf).is_ok());
    }
}
