//! Recycled block sized scratch buffers.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use repr::BLOCK_SIZE;
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};

struct Pool {
    free: Mutex<Vec<Box<[u8]>>>,
    capacity: usize,
}

impl Pool {
    fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    fn get(&self) -> Block<'_> {
        let data = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0; BLOCK_SIZE].into_boxed_slice());
        Block { data, pool: self }
    }

    fn put(&self, mut data: Box<[u8]>) {
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            data.iter_mut().for_each(|b| *b = 0);
            free.push(data);
        }
    }
}

/// A zeroed block buffer, handed back to its pool when dropped
pub struct Block<'a> {
    data: Box<[u8]>,
    pool: &'a Pool,
}

impl Deref for Block<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for Block<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for Block<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.data.len())
            .finish()
    }
}

impl Drop for Block<'_> {
    fn drop(&mut self) {
        self.pool.put(mem::take(&mut self.data));
    }
}

fn blocks() -> &'static Pool {
    static INSTANCE: OnceCell<Pool> = OnceCell::new();

    // The defragmenter holds two blocks at a time per thread
    INSTANCE.get_or_init(|| Pool::new(num_cpus::get() * 4))
}

/// A zeroed `BLOCK_SIZE` buffer
pub fn block() -> Block<'static> {
    blocks().get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returned_blocks_are_zeroed() {
        let pool = Pool::new(1);
        {
            let mut block = pool.get();
            block[10] = 0xAA;
            block[BLOCK_SIZE - 1] = 0xBB;
        }
        let block = pool.get();
        assert_eq!(block.len(), BLOCK_SIZE);
        assert!(block.iter().all(|&b| b == 0));
    }

    #[test]
    fn pool_does_not_grow_past_capacity() {
        let pool = Pool::new(2);
        let handles: Vec<_> = (0..5).map(|_| pool.get()).collect();
        drop(handles);
        assert_eq!(pool.free.lock().len(), 2);
    }
}
