//! Two-level page table management.
//!
//! This module provides the `PageDirectory` type, which owns the root table of an
//! address space together with every second-level table hanging off it, and provides
//! the operations for mapping, unmapping and locating entries.

use core::fmt;

use crate::{
    AddressTranslator, PageEntry, PageFlags, PageTable, PhysicalAddress, VirtualAddress, arch,
    layout::{self, ENTRIES_PER_TABLE},
};

/// Errors that can occur while editing a page directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// No frame was available for a new page table.
    OutOfMemory,
    /// The virtual address already has a present entry.
    AlreadyMapped,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::OutOfMemory => write!(f, "out of memory for page tables"),
            MapError::AlreadyMapped => write!(f, "address is already mapped"),
        }
    }
}

impl core::error::Error for MapError {}

/// Flags given to directory entries that reference a page table.
///
/// The hardware intersects permissions across both levels, so directory entries grant
/// everything and the leaf entries alone decide what a page allows.
const TABLE_FLAGS: PageFlags = PageFlags::PRESENT
    .union(PageFlags::WRITABLE)
    .union(PageFlags::USER);

/// First directory slot of the kernel half. Slots from here on are shared, never owned.
const FIRST_KERNEL_SLOT: usize = layout::directory_index(layout::KERNBASE);

/// Root of the directory whose kernel half is copied into every new directory.
#[cfg(not(emulated))]
static KERNEL_TEMPLATE: spin::Once<PhysicalAddress> = spin::Once::new();

#[cfg(emulated)]
std::thread_local! {
    static KERNEL_TEMPLATE: spin::Once<PhysicalAddress> = spin::Once::new();
}

fn kernel_template() -> Option<PhysicalAddress> {
    #[cfg(not(emulated))]
    {
        KERNEL_TEMPLATE.get().copied()
    }

    #[cfg(emulated)]
    {
        KERNEL_TEMPLATE.with(|t| t.get().copied())
    }
}

/// The root of a two-level page table.
///
/// The directory and every second-level table live in frames obtained from the current
/// [`AddressTranslator`], and are reached through its physical-to-virtual mapping. The
/// tables covering user space are freed when the directory is dropped; the frames
/// mapped by leaf entries are not, since the directory does not own them.
pub struct PageDirectory {
    /// Physical address of the root table.
    root: PhysicalAddress,
}

impl PageDirectory {
    /// Creates a page directory with no user mappings.
    ///
    /// If a kernel template is registered, its kernel half is shared with the new
    /// directory, so the kernel stays mapped once the directory is loaded.
    pub fn new() -> Result<Self, MapError> {
        let root = AddressTranslator::current()
            .allocate_frame()
            .ok_or(MapError::OutOfMemory)?;
        let mut directory = Self { root };
        if let Some(template) = kernel_template() {
            directory.share_kernel_half(template);
        }
        Ok(directory)
    }

    /// Registers the directory whose kernel half every new directory shares.
    ///
    /// # Safety
    /// `root` must be a page directory mapping the running kernel at and above
    /// `KERNBASE`. Its kernel page tables must never be freed.
    ///
    /// # Panics
    /// Panics if a template has already been registered.
    pub unsafe fn set_kernel_template(root: PhysicalAddress) {
        let register = |template: &spin::Once<PhysicalAddress>| {
            if template.get().is_some() {
                panic!("kernel template already set");
            }
            template.call_once(|| root);
        };

        #[cfg(not(emulated))]
        register(&KERNEL_TEMPLATE);

        #[cfg(emulated)]
        KERNEL_TEMPLATE.with(register);

        log::debug!("kernel template directory at {}", root);
    }

    /// Returns the root of the directory the processor is currently using.
    pub fn active_root() -> PhysicalAddress {
        arch::current_root()
    }

    fn share_kernel_half(&mut self, template: PhysicalAddress) {
        let template = AddressTranslator::current().phys_to_ptr::<PageTable>(template);
        // SAFETY: The caller of `set_kernel_template` vouched for the template.
        let template = unsafe { &*template };
        let root = self.root_mut();
        for index in FIRST_KERNEL_SLOT..ENTRIES_PER_TABLE {
            if let (Some(entry), Some(slot)) = (template.entry(index), root.entry_mut(index)) {
                *slot = entry;
            }
        }
    }

    /// Returns the physical address of the root table, the value loaded into CR3.
    pub fn physical_address(&self) -> PhysicalAddress {
        self.root
    }

    /// Makes this directory the active one, flushing all cached translations.
    ///
    /// # Safety
    /// The directory must map everything the processor touches after the switch,
    /// including the running kernel code and stack.
    pub unsafe fn activate(&self) {
        // SAFETY: Forwarded to the caller.
        unsafe { arch::load_root(self.root) }
    }

    /// Returns true if this directory is the one currently loaded.
    pub fn is_active(&self) -> bool {
        arch::current_root() == self.root
    }

    /// Maps a virtual page to a physical frame with the given flags.
    ///
    /// The page table covering `virt` is allocated if it does not exist yet. The present
    /// bit is always added to `flags`.
    ///
    /// # Panics
    /// Panics if either address is not page-aligned.
    pub fn map(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        assert!(
            virt.is_aligned(layout::PAGE_SIZE),
            "virtual address must be page-aligned"
        );
        assert!(
            phys.is_aligned(layout::PAGE_SIZE),
            "physical address must be page-aligned"
        );

        let table = self.table_or_create(virt)?;
        let Some(entry) = table.entry_mut(virt.table_index()) else {
            unreachable!("table index is always below ENTRIES_PER_TABLE")
        };
        if entry.is_present() {
            return Err(MapError::AlreadyMapped);
        }

        *entry = PageEntry::new(phys, flags | PageFlags::PRESENT);
        log::trace!("mapped {} -> {} ({:?})", virt, phys, flags);
        Ok(())
    }

    /// Unmaps a virtual page.
    ///
    /// Returns the physical address that was mapped, or None if the page was not mapped.
    /// Empty page tables are kept.
    pub fn unmap(&mut self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let entry = self.table_mut(virt)?.entry_mut(virt.table_index())?;
        let phys = entry.address()?;
        entry.clear();
        log::trace!("unmapped {} (was {})", virt, phys);
        Some(phys)
    }

    /// Returns the leaf entry for `virt`, or None if no page table covers it.
    pub fn entry(&self, virt: VirtualAddress) -> Option<PageEntry> {
        self.table(virt)?.entry(virt.table_index())
    }

    /// Resolves the page table covering `virt`.
    ///
    /// Returns None if the directory entry is absent or maps a large page, in which
    /// case there is no second-level table to return.
    pub fn table(&self, virt: VirtualAddress) -> Option<&PageTable> {
        let phys = Self::table_address(self.root().entry(virt.directory_index())?)?;
        // SAFETY: Present, non-leaf directory entries are only ever written by
        // `table_or_create`, which points them at a zeroed frame holding a PageTable.
        Some(unsafe { &*AddressTranslator::current().phys_to_ptr::<PageTable>(phys) })
    }

    /// Resolves the page table covering `virt` for mutation.
    ///
    /// This is the mutable counterpart of [`PageDirectory::table`], with the same
    /// presence checks.
    pub fn table_mut(&mut self, virt: VirtualAddress) -> Option<&mut PageTable> {
        let phys = Self::table_address(self.root().entry(virt.directory_index())?)?;
        // SAFETY: See `table`. The exclusive borrow of the directory covers its tables.
        Some(unsafe { &mut *AddressTranslator::current().phys_to_ptr::<PageTable>(phys) })
    }

    fn table_address(entry: PageEntry) -> Option<PhysicalAddress> {
        if entry.is_leaf() {
            return None;
        }
        entry.address()
    }

    /// Resolves the page table covering `virt`, allocating it if needed.
    fn table_or_create(&mut self, virt: VirtualAddress) -> Result<&mut PageTable, MapError> {
        let index = virt.directory_index();
        let Some(entry) = self.root_mut().entry_mut(index) else {
            unreachable!("directory index is always below ENTRIES_PER_TABLE")
        };

        if !entry.is_present() {
            let frame = AddressTranslator::current()
                .allocate_frame()
                .ok_or(MapError::OutOfMemory)?;
            *entry = PageEntry::new(frame, TABLE_FLAGS);
            log::trace!("allocated page table {} for directory slot {}", frame, index);
        } else if entry.is_leaf() {
            return Err(MapError::AlreadyMapped);
        }

        self.table_mut(virt).ok_or(MapError::OutOfMemory)
    }

    pub(crate) fn root(&self) -> &PageTable {
        // SAFETY: The root frame was allocated in `new` and is owned by this directory.
        unsafe { &*AddressTranslator::current().phys_to_ptr::<PageTable>(self.root) }
    }

    pub(crate) fn root_mut(&mut self) -> &mut PageTable {
        // SAFETY: As in `root`, and we hold the directory exclusively.
        unsafe { &mut *AddressTranslator::current().phys_to_ptr::<PageTable>(self.root) }
    }
}

impl Drop for PageDirectory {
    fn drop(&mut self) {
        let translator = AddressTranslator::current();

        for index in 0..FIRST_KERNEL_SLOT {
            let Some(entry) = self.root().entry(index) else {
                continue;
            };
            if let Some(table) = Self::table_address(entry) {
                translator.deallocate_frame(table);
            }
        }
        translator.deallocate_frame(self.root);
    }
}
