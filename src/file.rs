use crate::config::Encoding;
use crate::errors::{Error, Result};
use crate::layout::{Layout, Storage};
use crate::volume::{FileRecord, Node, Volume};
use bitflags::bitflags;
use repr::{BlockNo, MAX_PAYLOAD};
use slog::Logger;
use std::cmp;
use std::convert::TryFrom;
use std::fmt;
use std::io;

bitflags! {
    pub struct OpenFlags: u32 {
        const READ   = 1;
        const WRITE  = 1 << 1;
        /// Every write goes to the end of the file, wherever the cursor is
        const APPEND = 1 << 2;
        /// Drop the file's contents when opening it for writing
        const TRUNC  = 1 << 3;
    }
}

/// How much file data a block holds
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub block: BlockNo,
    pub bytes: usize,
}

/// An open file with its own cursor
///
/// Every call takes the file's lock for its whole duration, so handles on the same node can be
/// used from different threads.
pub struct File {
    volume: Volume,
    node: Node,
    flags: OpenFlags,
    pos: u64,
    logger: Logger,
}

impl File {
    pub(crate) fn open(volume: Volume, node: Node, flags: OpenFlags) -> Result<Self> {
        let logger = volume
            .logger()
            .new(slog::o!("index_block" => node.index_block().0));
        let file = File {
            volume,
            node,
            flags,
            pos: 0,
            logger,
        };
        if flags.contains(OpenFlags::WRITE | OpenFlags::TRUNC) {
            file.locked(|storage, record| {
                if record.blocks > 1 || record.size > 0 {
                    truncate(storage, record)?;
                }
                Ok(())
            })?;
        }
        Ok(file)
    }

    fn locked<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Storage<'_>, &mut FileRecord) -> Result<T>,
    {
        let storage = Storage {
            logger: &self.logger,
            ..self.volume.inner().storage()
        };
        let mut record = self.node.record().lock();
        f(&storage, &mut *record)
    }

    fn check_readable(&self) -> Result<()> {
        if !self.flags.contains(OpenFlags::READ) {
            return Err(Error::NotReadable);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(Error::NotWritable);
        }
        Ok(())
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn size(&self) -> u64 {
        self.node.record().lock().size
    }

    /// The cursor used by `read`, `write` and `Seek`
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn encoding(&self) -> Encoding {
        self.node.record().lock().encoding
    }

    /// One past the last position the file's encoding can address
    pub fn max_size(&self) -> u64 {
        self.encoding().max_file_size()
    }

    /// Copy bytes starting at `pos` into `buf`
    ///
    /// Insert-mode reads never cross an entry, so fewer bytes than `buf.len()` may be
    /// returned before the end of the file. Returns 0 at the end of the file.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        self.check_readable()?;
        self.locked(|storage, record| record.encoding.read(storage, record, pos, buf))
    }

    /// Read at the cursor, advancing it
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Write `data` at `pos`
    ///
    /// In insert mode the bytes already at or after `pos` move up by `data.len()`; in normal
    /// mode they are overwritten.
    pub fn write_at(&self, pos: u64, data: &[u8]) -> Result<usize> {
        self.check_writable()?;
        self.locked(|storage, record| {
            let encoding = record.encoding;
            encoding.write(storage, record, pos, data)
        })
    }

    /// Write at the cursor, or at the end of the file when opened with `APPEND`
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.write_from(data, data.len())
    }

    /// Write `len` bytes pulled from `reader`, the same way as `write`
    ///
    /// A failing reader is reported as `Fault`. Bytes pulled before the failure stay written.
    /// Reaching the encoding's size limit after storing some bytes returns a short count.
    pub fn write_from<R: io::Read>(&mut self, mut reader: R, len: usize) -> Result<usize> {
        self.check_writable()?;
        let append = self.flags.contains(OpenFlags::APPEND);
        let cursor = self.pos;
        let (start, written) = self.locked(|storage, record| {
            let start = if append { record.size } else { cursor };
            let encoding = record.encoding;
            let mut chunk = vec![0; cmp::min(len, MAX_PAYLOAD)];
            let mut written = 0;
            while written < len {
                let n = cmp::min(len - written, chunk.len());
                reader.read_exact(&mut chunk[..n]).map_err(Error::Fault)?;
                let pos = start + written as u64;
                match encoding.write(storage, record, pos, &chunk[..n]) {
                    Ok(stored) => {
                        written += stored;
                        if stored < n {
                            break;
                        }
                    }
                    Err(Error::FileTooBig { .. }) if written > 0 => break,
                    Err(e) => return Err(e),
                }
            }
            Ok((start, written))
        })?;
        self.pos = start + written as u64;
        Ok(written)
    }

    /// Read at the cursor into `writer`, advancing the cursor
    ///
    /// At most one entry's worth is transferred. A failing writer is reported as `Fault` and
    /// leaves the cursor in place.
    pub fn read_to<W: io::Write>(&mut self, mut writer: W, len: usize) -> Result<usize> {
        let mut buf = vec![0; cmp::min(len, repr::BLOCK_SIZE)];
        let n = self.read_at(self.pos, &mut buf)?;
        writer.write_all(&buf[..n]).map_err(Error::Fault)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn usage(&self) -> Result<(usize, Vec<BlockInfo>)> {
        self.locked(|storage, record| {
            let table = storage.load_table(record)?;
            let encoding = record.encoding;
            Ok((encoding.payload(), encoding.usage(&table, record.size)))
        })
    }

    /// Blocks held by the file, counting its index block
    pub fn used_blocks(&self) -> Result<u64> {
        self.locked(|storage, record| Ok(storage.load_table(record)?.len() as u64 + 1))
    }

    /// Data blocks holding less than a full block's payload
    pub fn partially_filled_blocks(&self) -> Result<usize> {
        let (payload, usage) = self.usage()?;
        Ok(usage.iter().filter(|info| info.bytes < payload).count())
    }

    /// Unused payload bytes summed over every data block
    pub fn fragmentation_waste(&self) -> Result<u64> {
        let (payload, usage) = self.usage()?;
        Ok(usage
            .iter()
            .map(|info| (payload - cmp::min(info.bytes, payload)) as u64)
            .sum())
    }

    /// Every data block in file order with the bytes of file data it holds
    pub fn blocks(&self) -> Result<Vec<BlockInfo>> {
        let (_, usage) = self.usage()?;
        for info in &usage {
            slog::info!(self.logger, "Block {}: {} bytes", info.block, info.bytes);
        }
        Ok(usage)
    }

    /// Pack the file's data into as few blocks as possible
    pub fn defragment(&self) -> Result<()> {
        self.check_writable()?;
        self.locked(|storage, record| {
            let encoding = record.encoding;
            encoding.defragment(storage, record)
        })
    }

    /// Free every data block of the file
    pub fn truncate_to_empty(&mut self) -> Result<()> {
        self.check_writable()?;
        self.locked(truncate)?;
        self.pos = 0;
        Ok(())
    }

    /// Switch the encoding of an empty file
    pub fn set_encoding(&self, encoding: Encoding) -> Result<()> {
        self.locked(|storage, record| {
            if record.encoding == encoding {
                return Ok(());
            }
            let table = storage.load_table(record)?;
            if !table.is_empty() {
                return Err(Error::IncompatibleEncoding {
                    from: record.encoding,
                    to: encoding,
                });
            }
            slog::debug!(storage.logger, "switched encoding";
                "from" => %record.encoding,
                "to" => %encoding);
            record.encoding = encoding;
            Ok(())
        })
    }

    /// Switch an empty file to the other encoding, returning the new one
    pub fn toggle_encoding(&self) -> Result<Encoding> {
        let encoding = self.encoding().toggled();
        self.set_encoding(encoding)?;
        Ok(encoding)
    }
}

fn truncate(storage: &Storage<'_>, record: &mut FileRecord) -> Result<()> {
    let mut table = storage.load_table(record)?;
    let entries = table.clear();
    table.store(storage.device)?;
    for entry in &entries {
        storage.free(entry.block());
    }
    slog::debug!(storage.logger, "truncated";
        "size" => record.size,
        "blocks_freed" => entries.len());
    record.size = 0;
    record.blocks = 1;
    record.touch();
    Ok(())
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("node", &self.node)
            .field("flags", &self.flags)
            .field("pos", &self.pos)
            .finish()
    }
}

impl io::Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf).map_err(io::Error::from)
    }
}

impl io::Write for File {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Every block is durable once written
        Ok(())
    }
}

impl io::Seek for File {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (base, delta) = match pos {
            io::SeekFrom::Start(off) => {
                self.pos = off;
                return Ok(off);
            }
            io::SeekFrom::Current(off) => (self.pos, off),
            io::SeekFrom::End(off) => (self.size(), off),
        };
        let next = i128::from(base) + i128::from(delta);
        let next = u64::try_from(next).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        self.pos = next;
        Ok(next)
    }
}
