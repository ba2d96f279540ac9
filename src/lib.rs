//! File data layout for insfs volumes.
//!
//! Every file maps its byte stream onto the entries of a single index block. Files use one of
//! two [encodings](config/enum.Encoding.html): fixed size blocks, or the insert encoding where
//! each entry records how many bytes of its block are in use, so data can be inserted in the
//! middle of a file without rewriting everything after it.

use slog::{Drain, Logger};

pub mod alloc;
pub mod config;
pub mod device;
pub mod errors;
pub mod file;
pub mod file_device;
pub mod locate;
pub mod table;
pub mod volume;

mod defrag;
mod layout;
mod normal;
mod pool;
mod read;
mod write;

pub use config::Encoding;
pub use errors::{Error, Result};
pub use file::{BlockInfo, File, OpenFlags};
pub use repr::index::{Entry, CAPACITY, MAX_FILE_SIZE};
pub use repr::{BlockNo, BLOCK_SIZE, MAX_PAYLOAD};
pub use volume::{Node, Volume, VolumeBuilder};

pub(crate) fn default_logger() -> Logger {
    slog::Logger::root(slog_stdlog::StdLog.fuse(), slog::o!())
}

#[cfg(test)]
pub(crate) fn test_logger() -> Logger {
    use sloggers::Build;

    sloggers::null::NullLoggerBuilder
        .build()
        .expect("null logger")
}
