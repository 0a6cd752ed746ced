//! Page directory and page table entries.
//!
//! Both levels of the x86 two-level hierarchy share one 32-bit format: a 4 KiB-aligned
//! frame address in bits 12..31 and status/permission flags in bits 0..11.

use bitflags::bitflags;

use crate::PhysicalAddress;

bitflags! {
    /// Flags stored in the low bits of a page directory or page table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PageFlags: u32 {
        /// The entry maps a page (or, in the directory, a page table).
        const PRESENT = 1 << 0;
        /// Stores to the page are allowed.
        const WRITABLE = 1 << 1;
        /// The page is accessible from user mode.
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        /// Set by the processor on any access.
        const ACCESSED = 1 << 5;
        /// Set by the processor on a write.
        const DIRTY = 1 << 6;
        /// Directory entry maps a 4 MiB page instead of a page table.
        const HUGE_PAGE = 1 << 7;
    }
}

/// A single page directory or page table entry.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(u32);

impl PageEntry {
    /// Frame address bits (12-31).
    const ADDRESS_MASK: u32 = 0xFFFF_F000;

    /// Flag bits (0-11).
    const FLAGS_MASK: u32 = !Self::ADDRESS_MASK;

    /// Creates a new entry pointing at `address`.
    ///
    /// The physical address must be page-aligned (lowest 12 bits must be zero).
    pub fn new(address: PhysicalAddress, flags: PageFlags) -> Self {
        debug_assert!(
            address.as_usize() & 0xFFF == 0,
            "physical address must be page-aligned"
        );

        let addr_bits = address.as_usize() as u32 & Self::ADDRESS_MASK;
        let flag_bits = flags.bits() & Self::FLAGS_MASK;
        Self(addr_bits | flag_bits)
    }

    /// Returns the physical address stored in this entry.
    ///
    /// Returns None if the entry is not present.
    pub fn address(self) -> Option<PhysicalAddress> {
        if self.is_present() {
            Some(PhysicalAddress::new((self.0 & Self::ADDRESS_MASK) as usize))
        } else {
            None
        }
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_retain(self.0 & Self::FLAGS_MASK)
    }

    /// Sets the flags for this entry, preserving the address.
    pub fn set_flags(&mut self, flags: PageFlags) {
        let addr_bits = self.0 & Self::ADDRESS_MASK;
        let flag_bits = flags.bits() & Self::FLAGS_MASK;
        self.0 = addr_bits | flag_bits;
    }

    /// Returns whether this entry is present (valid).
    pub fn is_present(self) -> bool {
        self.flags().contains(PageFlags::PRESENT)
    }

    pub fn is_writable(self) -> bool {
        self.flags().contains(PageFlags::WRITABLE)
    }

    pub fn is_user(self) -> bool {
        self.flags().contains(PageFlags::USER)
    }

    /// Returns whether this directory entry maps a large page directly
    /// rather than referencing a page table.
    pub fn is_leaf(self) -> bool {
        self.is_present() && self.flags().contains(PageFlags::HUGE_PAGE)
    }

    /// Clears this entry (sets it to zero).
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Creates an entry from a raw value.
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }
}

impl core::fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "PageEntry({:#010x}, {:?})",
            self.0 & Self::ADDRESS_MASK,
            self.flags()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_keeps_address_and_flags() {
        let entry = PageEntry::new(
            PhysicalAddress::new(0x0012_3000),
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
        );
        assert_eq!(entry, PageEntry::from_raw(0x0012_3007));
        assert_eq!(entry.address(), Some(PhysicalAddress::new(0x0012_3000)));
        assert!(entry.is_writable());
        assert!(entry.is_user());
    }

    #[test]
    fn absent_entry_has_no_address() {
        let entry = PageEntry::new(PhysicalAddress::new(0x0012_3000), PageFlags::USER);
        assert_eq!(entry.address(), None);
        assert!(!entry.is_present());
    }

    #[test]
    fn set_flags_preserves_address() {
        let mut entry = PageEntry::new(
            PhysicalAddress::new(0x8000),
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::DIRTY,
        );
        let mut flags = entry.flags();
        flags.remove(PageFlags::WRITABLE);
        entry.set_flags(flags);

        assert_eq!(entry.address(), Some(PhysicalAddress::new(0x8000)));
        assert_eq!(entry.flags(), PageFlags::PRESENT | PageFlags::DIRTY);
    }

    #[test]
    fn huge_page_is_leaf() {
        let entry = PageEntry::from_raw(0x0040_0083);
        assert!(entry.is_leaf());
        assert!(!PageEntry::from_raw(0x0040_0003).is_leaf());
    }

    #[test]
    fn clear() {
        let mut entry = PageEntry::from_raw(0x0040_0007);
        entry.clear();
        assert_eq!(entry, PageEntry::default());
    }
}
