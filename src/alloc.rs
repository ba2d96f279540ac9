use crate::errors::{Error, Result};
use parking_lot::Mutex;
use repr::BlockNo;

/// Hands out free blocks of a volume
///
/// Implementations must be safe to share between files: two callers never receive the same
/// block.
pub trait BlockAllocator: Send + Sync {
    fn allocate(&self) -> Result<BlockNo>;
    fn free(&self, block: BlockNo);
    fn free_blocks(&self) -> u32;
}

impl<A: BlockAllocator + ?Sized> BlockAllocator for Box<A> {
    fn allocate(&self) -> Result<BlockNo> {
        (**self).allocate()
    }

    fn free(&self, block: BlockNo) {
        (**self).free(block)
    }

    fn free_blocks(&self) -> u32 {
        (**self).free_blocks()
    }
}

#[derive(Debug)]
struct Bitmap {
    words: Vec<u64>,
    free: u32,
    hint: usize,
}

impl Bitmap {
    fn is_set(&self, idx: usize) -> bool {
        self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    fn set(&mut self, idx: usize) {
        self.words[idx / 64] |= 1 << (idx % 64);
    }

    fn clear(&mut self, idx: usize) {
        self.words[idx / 64] &= !(1 << (idx % 64));
    }
}

/// In-memory first fit bitmap allocator
///
/// Block 0 is never handed out. Searching resumes after the last allocated block.
#[derive(Debug)]
pub struct BitmapAllocator {
    bitmap: Mutex<Bitmap>,
    block_count: u32,
}

impl BitmapAllocator {
    pub fn new(block_count: u32) -> Self {
        let len = block_count as usize;
        let mut bitmap = Bitmap {
            words: vec![0; (len + 63) / 64],
            free: block_count.saturating_sub(1),
            hint: 1,
        };
        // Tail bits past the end of the volume stay permanently used
        for idx in len..bitmap.words.len() * 64 {
            bitmap.set(idx);
        }
        if len > 0 {
            bitmap.set(0);
        }
        Self {
            bitmap: Mutex::new(bitmap),
            block_count,
        }
    }
}

impl BlockAllocator for BitmapAllocator {
    fn allocate(&self) -> Result<BlockNo> {
        let mut bitmap = self.bitmap.lock();
        if bitmap.free == 0 {
            return Err(Error::NoSpace);
        }
        let words = bitmap.words.len();
        let start = bitmap.hint / 64;
        for step in 0..=words {
            let w = (start + step) % words;
            let word = bitmap.words[w];
            if word == u64::MAX {
                continue;
            }
            let idx = w * 64 + (!word).trailing_zeros() as usize;
            bitmap.set(idx);
            bitmap.free -= 1;
            bitmap.hint = idx + 1;
            return Ok(BlockNo(idx as u32));
        }
        Err(Error::NoSpace)
    }

    fn free(&self, block: BlockNo) {
        let idx = block.0 as usize;
        if block.is_null() || idx >= self.block_count as usize {
            return;
        }
        let mut bitmap = self.bitmap.lock();
        if bitmap.is_set(idx) {
            bitmap.clear(idx);
            bitmap.free += 1;
        }
    }

    fn free_blocks(&self) -> u32 {
        self.bitmap.lock().free
    }
}
