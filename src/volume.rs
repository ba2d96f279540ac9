use crate::alloc::{BitmapAllocator, BlockAllocator};
use crate::config::Encoding;
use crate::device::{BlockDevice, MemoryDevice};
use crate::errors::{Error, Result};
use crate::file::{File, OpenFlags};
use crate::file_device::FileDevice;
use crate::layout::Storage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use repr::index::MAX_BLOCK;
use repr::BlockNo;
use slog::Logger;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Everything the volume remembers about a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// The block holding the file's index table
    pub index_block: BlockNo,
    /// Logical size in bytes
    pub size: u64,
    /// Allocated blocks, including the index block
    pub blocks: u64,
    pub encoding: Encoding,
    pub mtime: DateTime<Utc>,
}

impl FileRecord {
    pub(crate) fn new(index_block: BlockNo, encoding: Encoding) -> Self {
        Self {
            index_block,
            size: 0,
            blocks: 1,
            encoding,
            mtime: Utc::now(),
        }
    }

    pub(crate) fn touch(&mut self) {
        self.mtime = Utc::now();
    }
}

/// A file on a volume
///
/// Clones refer to the same file. The record's mutex is the per-file lock: every read, write,
/// defragmentation and statistic holds it for the whole operation.
#[derive(Clone)]
pub struct Node {
    record: Arc<Mutex<FileRecord>>,
}

impl Node {
    pub(crate) fn record(&self) -> &Mutex<FileRecord> {
        &self.record
    }

    /// A copy of the current record
    pub fn stat(&self) -> FileRecord {
        self.record.lock().clone()
    }

    pub fn index_block(&self) -> BlockNo {
        self.record.lock().index_block
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("record", &*self.record.lock())
            .finish()
    }
}

pub(crate) struct VolumeInner {
    device: Box<dyn BlockDevice>,
    allocator: BitmapAllocator,
    encoding: Encoding,
    pub(crate) logger: Logger,
}

impl VolumeInner {
    pub(crate) fn storage(&self) -> Storage<'_> {
        Storage {
            device: &*self.device,
            allocator: &self.allocator,
            logger: &self.logger,
        }
    }
}

/// A set of files sharing one block device and its allocator
#[derive(Clone)]
pub struct Volume {
    inner: Arc<VolumeInner>,
}

impl Volume {
    pub(crate) fn inner(&self) -> &Arc<VolumeInner> {
        &self.inner
    }

    /// Allocate an index block for a new, empty file
    pub fn create_file(&self) -> Result<Node> {
        let storage = self.inner.storage();
        let index_block = storage.allocate_zeroed()?;
        slog::debug!(self.inner.logger, "created file";
            "index_block" => %index_block,
            "encoding" => %self.inner.encoding);
        Ok(Node {
            record: Arc::new(Mutex::new(FileRecord::new(
                index_block,
                self.inner.encoding,
            ))),
        })
    }

    pub fn open(&self, node: &Node, flags: OpenFlags) -> Result<File> {
        File::open(self.clone(), node.clone(), flags)
    }

    /// Free every block of `node`, including its index block
    ///
    /// The node is left empty with a null index block; later operations on it fail.
    pub fn remove_file(&self, node: &Node) -> Result<()> {
        let mut record = node.record.lock();
        let storage = self.inner.storage();
        let mut table = storage.load_table(&record)?;
        let entries = table.clear();
        for entry in &entries {
            storage.free(entry.block());
        }
        storage.free(record.index_block);
        slog::debug!(self.inner.logger, "removed file";
            "index_block" => %record.index_block,
            "blocks_freed" => entries.len() + 1);

        record.index_block = BlockNo::NULL;
        record.size = 0;
        record.blocks = 0;
        record.touch();
        Ok(())
    }

    pub fn free_blocks(&self) -> u32 {
        self.inner.allocator.free_blocks()
    }

    pub fn block_count(&self) -> u32 {
        self.inner.device.block_count()
    }

    pub fn default_encoding(&self) -> Encoding {
        self.inner.encoding
    }

    pub fn logger(&self) -> &Logger {
        &self.inner.logger
    }
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("block_count", &self.block_count())
            .field("free_blocks", &self.free_blocks())
            .field("encoding", &self.inner.encoding)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct VolumeBuilder {
    /// Blocks on the device, including the reserved block 0
    ///
    /// Only used when the builder creates the device itself.
    pub block_count: u32,
    /// Encoding given to newly created files
    pub encoding: Encoding,

    logger: Option<Logger>,
}

impl Default for VolumeBuilder {
    fn default() -> Self {
        VolumeBuilder {
            block_count: 1 << 14,
            encoding: Encoding::default(),
            logger: None,
        }
    }
}

impl VolumeBuilder {
    fn validate(block_count: u32) -> Result<()> {
        if block_count < 2 || block_count > MAX_BLOCK + 1 {
            return Err(Error::InvalidGeometry(format!(
                "block count must be between 2 and {}, got {}",
                MAX_BLOCK + 1,
                block_count
            )));
        }
        Ok(())
    }

    pub fn new() -> Self {
        Default::default()
    }

    pub fn set_logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = Some(logger);
        self
    }

    pub fn set_encoding(&mut self, encoding: Encoding) -> &mut Self {
        self.encoding = encoding;
        self
    }

    pub fn build<D: BlockDevice + 'static>(self, device: D) -> Result<Volume> {
        let block_count = device.block_count();
        Self::validate(block_count)?;

        let logger = self.logger.unwrap_or_else(crate::default_logger);
        slog::debug!(logger, "volume ready";
            "block_count" => block_count,
            "encoding" => %self.encoding);
        Ok(Volume {
            inner: Arc::new(VolumeInner {
                device: Box::new(device),
                allocator: BitmapAllocator::new(block_count),
                encoding: self.encoding,
                logger,
            }),
        })
    }

    pub fn build_in_memory(self) -> Result<Volume> {
        Self::validate(self.block_count)?;
        let device = MemoryDevice::new(self.block_count);
        self.build(device)
    }

    /// Create a fresh image file at `path`
    pub fn build_path<P: AsRef<Path>>(self, path: P) -> Result<Volume> {
        self._build_path(path.as_ref())
    }

    fn _build_path(mut self, path: &Path) -> Result<Volume> {
        Self::validate(self.block_count)?;
        let logger = self.logger.take().unwrap_or_else(crate::default_logger);
        let path_str = path.display().to_string();
        self.logger = Some(logger.new(slog::o!("image" => path_str)));

        let device = FileDevice::create(path, self.block_count)
            .map_err(|e| Error::io(BlockNo::NULL, e))?;
        self.build(device)
    }
}

/// Run `f` against a fresh volume of `block_count` blocks holding one empty insert-mode file
#[cfg(test)]
pub(crate) fn test_storage<F>(block_count: u32, f: F)
where
    F: FnOnce(&Storage<'_>, &mut FileRecord),
{
    let mut builder = VolumeBuilder::new();
    builder.block_count = block_count;
    builder.set_logger(crate::test_logger());
    let volume = builder.build_in_memory().unwrap();
    let node = volume.create_file().unwrap();
    let mut record = node.record().lock();
    f(&volume.inner.storage(), &mut *record);
}
