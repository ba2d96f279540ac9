//! The in-memory view of a file's index block.

use crate::device::BlockDevice;
use crate::errors::{Error, Result};
use crate::pool;
use repr::index::{self, Entry, CAPACITY};
use repr::BlockNo;

/// The live entries of an index block, in file order
///
/// Holds at most `CAPACITY` entries. Slots past `len()` are unallocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTable {
    block: BlockNo,
    entries: Vec<Entry>,
}

impl IndexTable {
    pub fn new(block: BlockNo) -> Self {
        Self {
            block,
            entries: Vec::new(),
        }
    }

    pub fn load<D: BlockDevice + ?Sized>(device: &D, block: BlockNo) -> Result<Self> {
        let mut data = pool::block();
        device
            .read_block(block, &mut data)
            .map_err(|e| Error::io(block, e))?;
        let entries = index::decode(&data).map_err(|e| Error::corrupt(block, e))?;
        Ok(Self { block, entries })
    }

    pub fn store<D: BlockDevice + ?Sized>(&self, device: &D) -> Result<()> {
        let mut data = pool::block();
        index::encode(&self.entries, &mut data).map_err(|e| Error::corrupt(self.block, e))?;
        device
            .write_block(self.block, &data)
            .map_err(|e| Error::io(self.block, e))
    }

    /// Apply `f` to a copy of the table and store the copy
    ///
    /// The table only takes on the changes once they are on the device, so it never drifts
    /// from the stored index when `f` or the store fails.
    pub fn update<D, F>(&mut self, device: &D, f: F) -> Result<()>
    where
        D: BlockDevice + ?Sized,
        F: FnOnce(&mut IndexTable) -> Result<()>,
    {
        let mut next = self.clone();
        f(&mut next)?;
        next.store(device)?;
        *self = next;
        Ok(())
    }

    /// The index block itself
    pub fn block(&self) -> BlockNo {
        self.block
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= CAPACITY
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Result<Entry> {
        self.entries
            .get(index)
            .copied()
            .ok_or(Error::EntryMissing { index })
    }

    /// Replace the entry at an allocated slot
    pub fn set(&mut self, index: usize, entry: Entry) -> Result<()> {
        let slot = self
            .entries
            .get_mut(index)
            .ok_or(Error::EntryMissing { index })?;
        *slot = entry;
        Ok(())
    }

    pub fn set_occupancy(&mut self, index: usize, occupancy: usize) -> Result<()> {
        let entry = self
            .get(index)?
            .with_occupancy(occupancy)
            .map_err(|e| Error::corrupt(self.block, e))?;
        self.set(index, entry)
    }

    pub fn push(&mut self, entry: Entry) -> Result<()> {
        let len = self.entries.len();
        self.insert(len, entry)
    }

    /// Insert `entry` at `index`, moving every following entry one slot right
    pub fn insert(&mut self, index: usize, entry: Entry) -> Result<()> {
        if self.is_full() {
            return Err(Error::IndexFull { capacity: CAPACITY });
        }
        if index > self.entries.len() {
            return Err(Error::EntryMissing { index });
        }
        self.entries.insert(index, entry);
        Ok(())
    }

    /// Remove the entry at `index`, moving every following entry one slot left
    pub fn remove(&mut self, index: usize) -> Result<Entry> {
        if index >= self.entries.len() {
            return Err(Error::EntryMissing { index });
        }
        Ok(self.entries.remove(index))
    }

    /// Drop every entry, returning them
    pub fn clear(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.entries)
    }

    /// Sum of the occupancies of every entry
    pub fn logical_size(&self) -> u64 {
        self.entries.iter().map(|e| e.occupancy() as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;

    fn entry(block: u32, occupancy: usize) -> Entry {
        Entry::new(BlockNo(block), occupancy).unwrap()
    }

    #[test]
    fn store_and_load() {
        let device = MemoryDevice::new(16);
        let mut table = IndexTable::new(BlockNo(1));
        table.push(entry(2, 10)).unwrap();
        table.push(entry(3, 20)).unwrap();
        table.store(&device).unwrap();

        let loaded = IndexTable::load(&device, BlockNo(1)).unwrap();
        assert_eq!(loaded, table);
        assert_eq!(loaded.logical_size(), 30);
    }

    #[test]
    fn insert_and_remove_shift_entries() {
        let mut table = IndexTable::new(BlockNo(1));
        table.push(entry(2, 1)).unwrap();
        table.push(entry(4, 3)).unwrap();
        table.insert(1, entry(3, 2)).unwrap();
        let blocks: Vec<_> = table.entries().iter().map(|e| e.block().0).collect();
        assert_eq!(blocks, vec![2, 3, 4]);

        assert_eq!(table.remove(0).unwrap(), entry(2, 1));
        let blocks: Vec<_> = table.entries().iter().map(|e| e.block().0).collect();
        assert_eq!(blocks, vec![3, 4]);
        assert!(matches!(
            table.remove(2),
            Err(Error::EntryMissing { index: 2 })
        ));
        assert!(matches!(
            table.insert(5, entry(9, 0)),
            Err(Error::EntryMissing { index: 5 })
        ));
    }

    #[test]
    fn capacity_is_enforced() {
        let mut table = IndexTable::new(BlockNo(1));
        for i in 0..CAPACITY {
            table.push(entry(i as u32 + 2, 1)).unwrap();
        }
        assert!(table.is_full());
        assert!(matches!(
            table.insert(3, entry(5000, 1)),
            Err(Error::IndexFull { capacity: CAPACITY })
        ));
        assert_eq!(table.len(), CAPACITY);
    }

    #[test]
    fn update_keeps_table_on_failed_store() {
        let device = MemoryDevice::new(16);
        let mut table = IndexTable::new(BlockNo(1));
        table
            .update(&device, |t| t.push(entry(2, 10)))
            .unwrap();
        assert_eq!(IndexTable::load(&device, BlockNo(1)).unwrap(), table);

        device.set_failing_block(Some(BlockNo(1)));
        assert!(matches!(
            table.update(&device, |t| t.set_occupancy(0, 20)),
            Err(Error::Io { .. })
        ));
        assert_eq!(table.get(0).unwrap(), entry(2, 10));

        device.set_failing_block(None);
        assert!(matches!(
            table.update(&device, |t| t.remove(4).map(drop)),
            Err(Error::EntryMissing { index: 4 })
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn corrupt_index_is_reported() {
        let device = MemoryDevice::new(4);
        let mut data = vec![0; repr::BLOCK_SIZE];
        data[..4].copy_from_slice(&(7u32 << repr::index::BLOCK_BITS).to_le_bytes());
        device.write_block(BlockNo(1), &data).unwrap();
        assert!(matches!(
            IndexTable::load(&device, BlockNo(1)),
            Err(Error::Corrupt { .. })
        ));
    }
}
