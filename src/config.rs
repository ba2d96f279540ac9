use std::fmt;

/// How a file lays its bytes out over the entries of its index block
///
/// The two encodings are not layout compatible, so a file can only change encoding while it is
/// empty.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Encoding {
    /// Every entry covers a full block
    ///
    /// Byte `pos` always lives in entry `pos / BLOCK_SIZE`
    Normal,
    /// Every entry records how many bytes of its block are used
    ///
    /// Writes in the middle of the file insert data instead of overwriting it, splitting
    /// blocks as needed.
    Insert,
}

impl Encoding {
    /// The other encoding
    pub fn toggled(self) -> Self {
        match self {
            Encoding::Normal => Encoding::Insert,
            Encoding::Insert => Encoding::Normal,
        }
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Insert
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Encoding::Normal => "normal",
            Encoding::Insert => "insert",
        })
    }
}
