//! Paging geometry and the virtual memory layout.
//!
//! Tern uses classic two-level 32-bit x86 paging: a page directory of
//! [`ENTRIES_PER_TABLE`] entries, each referencing a second-level page table of the
//! same capacity, each entry of which maps one [`PAGE_SIZE`] page.
//!
//! A linear address splits into three fields:
//!
//! ```text
//! +-----------------+-----------------+----------------+
//! | directory index |   table index   |     offset     |
//! |   bits 22..31   |   bits 12..21   |   bits 0..11   |
//! +-----------------+-----------------+----------------+
//! ```

/// Size of a page (and of a physical frame) in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Number of entries in a page directory or a page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Number of bytes mapped by a single second-level page table.
pub const TABLE_SPAN: usize = PAGE_SIZE * ENTRIES_PER_TABLE;

/// Shift of the page offset field (the table index starts here).
pub const TABLE_SHIFT: usize = 12;

/// Shift of the directory index field.
pub const DIRECTORY_SHIFT: usize = 22;

/// Width in bits of both index fields.
const INDEX_BITS: usize = 10;

/// First kernel virtual address. Everything below belongs to user space.
pub const KERNBASE: usize = 0x8000_0000;

/// Alignment unit required of the start address of a protection change.
pub const PROTECTION_ALIGNMENT: usize = PAGE_SIZE;

/// Highest physical address reachable without PAE.
pub const MAX_PHYSICAL_ADDRESS: usize = u32::MAX as usize;

/// Highest linear address.
pub const MAX_VIRTUAL_ADDRESS: usize = u32::MAX as usize;

/// Returns the page directory index of `address`.
#[inline]
pub const fn directory_index(address: usize) -> usize {
    (address >> DIRECTORY_SHIFT) & ((1 << INDEX_BITS) - 1)
}

/// Returns the page table index of `address`.
#[inline]
pub const fn table_index(address: usize) -> usize {
    (address >> TABLE_SHIFT) & ((1 << INDEX_BITS) - 1)
}

/// Returns true if `address` lies in the user half of the address space.
#[inline]
pub const fn is_user(address: usize) -> bool {
    address < KERNBASE
}

/// Rounds a byte count up to a whole number of pages.
#[inline]
pub const fn page_round_up(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// Validates a physical address.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr <= MAX_PHYSICAL_ADDRESS
}

/// Validates a virtual address.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    addr <= MAX_VIRTUAL_ADDRESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_address_fields() {
        // 0x1234_5678 = directory 0x048, table 0x345, offset 0x678
        assert_eq!(directory_index(0x1234_5678), 0x048);
        assert_eq!(table_index(0x1234_5678), 0x345);
    }

    #[test]
    fn last_user_page() {
        let last = KERNBASE - PAGE_SIZE;
        assert!(is_user(last));
        assert!(!is_user(KERNBASE));
        assert_eq!(directory_index(last), 0x1FF);
        assert_eq!(table_index(last), ENTRIES_PER_TABLE - 1);
    }

    #[test]
    fn table_span_matches_directory_stride() {
        assert_eq!(directory_index(TABLE_SPAN), 1);
        assert_eq!(table_index(TABLE_SPAN), 0);
        assert_eq!(table_index(TABLE_SPAN - PAGE_SIZE), ENTRIES_PER_TABLE - 1);
    }

    #[test]
    fn rounding() {
        assert_eq!(page_round_up(0), 0);
        assert_eq!(page_round_up(1), PAGE_SIZE);
        assert_eq!(page_round_up(PAGE_SIZE), PAGE_SIZE);
    }

    #[test]
    fn validates_32_bit_addresses() {
        assert!(validate_virtual(0xFFFF_FFFF));
        assert!(validate_physical(0xFFFF_F000));
        #[cfg(target_pointer_width = "64")]
        {
            assert!(!validate_virtual(0x1_0000_0000));
            assert!(!validate_physical(0x1_0000_0000));
        }
    }
}
