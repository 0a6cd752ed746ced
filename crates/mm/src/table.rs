//! Fixed-capacity page table storage.

use crate::{PageEntry, layout::ENTRIES_PER_TABLE};

/// One page directory or page table.
///
/// The table occupies exactly one page-aligned frame, which is what the hardware
/// expects. All indexing is bounds-checked against [`ENTRIES_PER_TABLE`]; callers get
/// `None` rather than an entry from beyond the end of the table.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; ENTRIES_PER_TABLE],
}

const _: () = assert!(core::mem::size_of::<PageTable>() == crate::layout::PAGE_SIZE);

impl PageTable {
    /// Creates a new, empty page table.
    ///
    /// All entries are initialized to zero (not present).
    pub const fn new() -> Self {
        Self {
            entries: [PageEntry::from_raw(0); ENTRIES_PER_TABLE],
        }
    }

    /// Returns the entry at the given index, or None if the index is out of bounds.
    pub fn entry(&self, index: usize) -> Option<PageEntry> {
        self.entries.get(index).copied()
    }

    /// Returns a mutable reference to the entry at the given index.
    pub fn entry_mut(&mut self, index: usize) -> Option<&mut PageEntry> {
        self.entries.get_mut(index)
    }

    /// Returns `count` consecutive entries starting at `start`.
    ///
    /// Returns None if the run would extend past the end of the table.
    pub fn run_mut(&mut self, start: usize, count: usize) -> Option<&mut [PageEntry]> {
        let end = start.checked_add(count)?;
        self.entries.get_mut(start..end)
    }

    /// Iterates over `(index, entry)` for every present entry.
    pub fn present_entries(&self) -> impl Iterator<Item = (usize, PageEntry)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, entry)| entry.is_present())
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PageFlags, PhysicalAddress};

    #[test]
    fn new_table_is_empty() {
        let table = PageTable::new();
        assert_eq!(table.present_entries().count(), 0);
    }

    #[test]
    fn entry_out_of_bounds() {
        let mut table = PageTable::new();
        assert!(table.entry(ENTRIES_PER_TABLE - 1).is_some());
        assert!(table.entry(ENTRIES_PER_TABLE).is_none());
        assert!(table.entry_mut(ENTRIES_PER_TABLE).is_none());
    }

    #[test]
    fn run_stays_inside_table() {
        let mut table = PageTable::new();
        assert_eq!(table.run_mut(ENTRIES_PER_TABLE - 2, 2).map(|r| r.len()), Some(2));
        assert!(table.run_mut(ENTRIES_PER_TABLE - 2, 3).is_none());
        assert!(table.run_mut(usize::MAX, 2).is_none());
    }

    #[test]
    fn present_entries_skips_holes() {
        let mut table = PageTable::new();
        let flags = PageFlags::PRESENT | PageFlags::USER;
        if let Some(entry) = table.entry_mut(3) {
            *entry = PageEntry::new(PhysicalAddress::new(0x3000), flags);
        }
        if let Some(entry) = table.entry_mut(9) {
            *entry = PageEntry::new(PhysicalAddress::new(0x9000), flags);
        }

        let indices: Vec<usize> = table.present_entries().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![3, 9]);
    }
}
