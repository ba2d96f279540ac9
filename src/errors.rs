use crate::config::Encoding;
use repr::index::EntryError;
use repr::BlockNo;
use std::io;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by file operations
///
/// Nothing is rolled back when an operation fails half way: blocks allocated and entries
/// written before the failure stay in place, and the file size is re-derived from the index so
/// it always matches what was kept.
#[derive(Debug, Error)]
pub enum Error {
    #[error("position {pos} is beyond the largest file an index block can describe")]
    FileTooBig { pos: u64 },
    #[error("no free blocks left on the volume")]
    NoSpace,
    #[error("index block is full ({capacity} entries)")]
    IndexFull { capacity: usize },
    #[error("I/O error on block {block}: {source}")]
    Io {
        block: BlockNo,
        #[source]
        source: io::Error,
    },
    #[error("caller buffer inaccessible: {0}")]
    Fault(#[source] io::Error),
    #[error("entry {index} is not allocated")]
    EntryMissing { index: usize },
    #[error("corrupt index block {block}: {source}")]
    Corrupt {
        block: BlockNo,
        #[source]
        source: EntryError,
    },
    #[error("cannot switch a non-empty file from {from} to {to} encoding")]
    IncompatibleEncoding { from: Encoding, to: Encoding },
    #[error("invalid volume geometry: {0}")]
    InvalidGeometry(String),
    #[error("file is not open for reading")]
    NotReadable,
    #[error("file is not open for writing")]
    NotWritable,
}

impl Error {
    pub(crate) fn io(block: BlockNo, source: io::Error) -> Self {
        Error::Io { block, source }
    }

    pub(crate) fn corrupt(block: BlockNo, source: EntryError) -> Self {
        Error::Corrupt { block, source }
    }

    /// The POSIX errno reported for this error
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::FileTooBig { .. } => libc::EFBIG,
            Error::NoSpace => libc::ENOSPC,
            Error::IndexFull { .. } => libc::ENOSPC,
            Error::Io { .. } => libc::EIO,
            Error::Fault(_) => libc::EFAULT,
            Error::EntryMissing { .. } => libc::EIO,
            Error::Corrupt { .. } => libc::EIO,
            Error::IncompatibleEncoding { .. } => libc::EINVAL,
            Error::InvalidGeometry(_) => libc::EINVAL,
            Error::NotReadable => libc::EBADF,
            Error::NotWritable => libc::EBADF,
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io { source, .. } | Error::Fault(source) => source,
            other => io::Error::from_raw_os_error(other.to_errno()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(Error::FileTooBig { pos: 0 }.to_errno(), libc::EFBIG);
        assert_eq!(Error::NoSpace.to_errno(), libc::ENOSPC);
        assert_eq!(Error::IndexFull { capacity: 1 }.to_errno(), libc::ENOSPC);
        assert_eq!(Error::EntryMissing { index: 3 }.to_errno(), libc::EIO);

        let e: io::Error = Error::NotWritable.into();
        assert_eq!(e.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn io_errors_keep_their_source() {
        let source = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        let e: io::Error = Error::io(BlockNo(4), source).into();
        assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
    }
}
