//! User address space management.
//!
//! An [`AddressSpace`] is the memory image of one process: a page directory plus the
//! size of the user region, which is always mapped contiguously from address zero.

use core::fmt;

use crate::{
    AddressTranslator, MapError, PageDirectory, PageFlags, PhysicalAddress, VirtualAddress,
    layout::{self, KERNBASE, PAGE_SIZE, TABLE_SPAN},
};

/// Errors that can occur while resizing or copying an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowError {
    /// No frame was available for a page or a page table.
    OutOfMemory,
    /// The new size would reach into the kernel half of the address space.
    ExceedsUserSpace,
    /// The new size would be negative.
    BelowZero,
}

impl fmt::Display for GrowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrowError::OutOfMemory => write!(f, "out of memory"),
            GrowError::ExceedsUserSpace => write!(f, "size exceeds user space"),
            GrowError::BelowZero => write!(f, "size would be negative"),
        }
    }
}

impl core::error::Error for GrowError {}

impl From<MapError> for GrowError {
    fn from(_: MapError) -> Self {
        // Fresh user pages are never already mapped, so every failure reaching
        // this conversion is a missing frame.
        GrowError::OutOfMemory
    }
}

/// The kind of access a translation is performed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Faults raised by [`AddressSpace::translate`], mirroring what the MMU would report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFault {
    /// No present entry maps the page.
    NotPresent,
    /// A write hit a page without the writable bit.
    WriteProtected,
    /// The page is not accessible from user mode.
    Privilege,
}

impl fmt::Display for PageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageFault::NotPresent => write!(f, "page not present"),
            PageFault::WriteProtected => write!(f, "write to read-only page"),
            PageFault::Privilege => write!(f, "page not accessible from user mode"),
        }
    }
}

impl core::error::Error for PageFault {}

/// Flags of freshly allocated user pages.
const USER_PAGE_FLAGS: PageFlags = PageFlags::WRITABLE.union(PageFlags::USER);

/// The address space of a user process.
///
/// User memory covers `0..size`; every page from zero up to `size` rounded up to a
/// page boundary is mapped to a frame owned by this address space. Dropping it frees
/// those frames and the page tables.
pub struct AddressSpace {
    directory: PageDirectory,
    size: usize,
}

impl AddressSpace {
    /// Creates an empty address space.
    pub fn new() -> Result<Self, GrowError> {
        Ok(Self {
            directory: PageDirectory::new()?,
            size: 0,
        })
    }

    /// Returns the size of user memory in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of mapped user pages.
    pub fn page_count(&self) -> usize {
        self.size.div_ceil(PAGE_SIZE)
    }

    /// Returns the page directory of this address space.
    pub fn directory(&self) -> &PageDirectory {
        &self.directory
    }

    pub(crate) fn directory_mut(&mut self) -> &mut PageDirectory {
        &mut self.directory
    }

    /// Grows or shrinks user memory by `delta` bytes, returning the previous size.
    ///
    /// New pages are zeroed and mapped writable. On failure the address space is left
    /// as it was; pages allocated by this call are released.
    pub fn grow(&mut self, delta: isize) -> Result<usize, GrowError> {
        let old = self.size;
        let new = if delta >= 0 {
            old.checked_add(delta.unsigned_abs())
                .filter(|&size| size < KERNBASE)
                .ok_or(GrowError::ExceedsUserSpace)?
        } else {
            old.checked_sub(delta.unsigned_abs())
                .ok_or(GrowError::BelowZero)?
        };

        let mapped = layout::page_round_up(old);
        let wanted = layout::page_round_up(new);
        if wanted > mapped {
            self.allocate_pages(mapped, wanted)?;
        } else if wanted < mapped {
            self.release_pages(wanted, mapped);
        }

        log::trace!("address space resized from {:#x} to {:#x}", old, new);
        self.size = new;
        Ok(old)
    }

    /// Maps zeroed frames over the page-aligned range `start..end`.
    fn allocate_pages(&mut self, start: usize, end: usize) -> Result<(), GrowError> {
        let translator = AddressTranslator::current();

        for page in (start..end).step_by(PAGE_SIZE) {
            let mapped = translator
                .allocate_frame()
                .ok_or(MapError::OutOfMemory)
                .and_then(|frame| {
                    self.directory
                        .map(VirtualAddress::new(page), frame, USER_PAGE_FLAGS)
                        .inspect_err(|_| translator.deallocate_frame(frame))
                });

            if let Err(err) = mapped {
                log::debug!("out of memory growing to {:#x}; rolling back", end);
                self.release_pages(start, page);
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Unmaps the page-aligned range `start..end` and frees the frames behind it.
    fn release_pages(&mut self, start: usize, end: usize) {
        let translator = AddressTranslator::current();

        for page in (start..end).step_by(PAGE_SIZE) {
            if let Some(frame) = self.directory.unmap(VirtualAddress::new(page)) {
                translator.deallocate_frame(frame);
            }
        }
    }

    /// Creates a copy of this address space for a child process.
    ///
    /// Every page is copied into a new frame and mapped with the same flags, so
    /// read-only pages stay read-only in the copy.
    pub fn duplicate(&self) -> Result<AddressSpace, GrowError> {
        let translator = AddressTranslator::current();
        let mut child = AddressSpace::new()?;
        // Set up front so a partial copy is released by Drop.
        child.size = self.size;

        let tables = layout::page_round_up(self.size).div_ceil(TABLE_SPAN);
        for slot in 0..tables {
            let base = slot * TABLE_SPAN;
            let Some(table) = self.directory.table(VirtualAddress::new(base)) else {
                continue;
            };

            for (index, entry) in table.present_entries() {
                let Some(source) = entry.address() else {
                    continue;
                };
                let virt = VirtualAddress::new(base + index * PAGE_SIZE);

                let frame = translator.allocate_frame().ok_or(GrowError::OutOfMemory)?;
                // SAFETY: Both frames are distinct, page-sized and reachable through the
                // translator; the source belongs to `self` and the target is brand new.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        translator.phys_to_ptr::<u8>(source),
                        translator.phys_to_ptr::<u8>(frame),
                        PAGE_SIZE,
                    );
                }
                child
                    .directory
                    .map(virt, frame, entry.flags())
                    .inspect_err(|_| translator.deallocate_frame(frame))?;
            }
        }

        Ok(child)
    }

    /// Translates a user address the way the MMU would for an access from user mode.
    pub fn translate(
        &self,
        address: VirtualAddress,
        access: Access,
    ) -> Result<PhysicalAddress, PageFault> {
        if !address.is_user() {
            return Err(PageFault::Privilege);
        }

        let entry = self
            .directory
            .entry(address)
            .filter(|entry| entry.is_present())
            .ok_or(PageFault::NotPresent)?;
        if !entry.is_user() {
            return Err(PageFault::Privilege);
        }
        if access == Access::Write && !entry.is_writable() {
            return Err(PageFault::WriteProtected);
        }

        let frame = entry.address().ok_or(PageFault::NotPresent)?;
        Ok(frame + address.page_offset())
    }

    /// Copies user memory starting at `address` into `buf`.
    pub fn read_bytes(&self, address: usize, buf: &mut [u8]) -> Result<(), PageFault> {
        self.for_each_chunk(address, buf.len(), Access::Read, |src, offset, len| {
            // SAFETY: `src` points at `len` bytes inside one mapped user frame.
            unsafe { core::ptr::copy_nonoverlapping(src, buf[offset..].as_mut_ptr(), len) }
        })
    }

    /// Copies `data` into user memory starting at `address`.
    ///
    /// Fails with [`PageFault::WriteProtected`] on read-only pages. Chunks before the
    /// faulting page have already been written, as they would be on hardware.
    pub fn write_bytes(&mut self, address: usize, data: &[u8]) -> Result<(), PageFault> {
        self.for_each_chunk(address, data.len(), Access::Write, |dst, offset, len| {
            // SAFETY: `dst` points at `len` bytes inside one mapped, writable user frame.
            unsafe { core::ptr::copy_nonoverlapping(data[offset..].as_ptr(), dst, len) }
        })
    }

    /// Calls `f(pointer, offset, len)` for each page-bounded chunk of `address..address + len`.
    fn for_each_chunk(
        &self,
        address: usize,
        len: usize,
        access: Access,
        mut f: impl FnMut(*mut u8, usize, usize),
    ) -> Result<(), PageFault> {
        let translator = AddressTranslator::current();
        let mut done = 0;

        while done < len {
            let current = address
                .checked_add(done)
                .filter(|&addr| layout::is_user(addr))
                .ok_or(PageFault::Privilege)?;
            let phys = self.translate(VirtualAddress::new(current), access)?;
            let chunk = (PAGE_SIZE - current % PAGE_SIZE).min(len - done);

            f(translator.phys_to_ptr::<u8>(phys), done, chunk);
            done += chunk;
        }
        Ok(())
    }

    /// Loads this address space's directory, flushing cached translations.
    ///
    /// # Safety
    /// See [`PageDirectory::activate`].
    pub unsafe fn activate(&self) {
        // SAFETY: Forwarded to the caller.
        unsafe { self.directory.activate() }
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.release_pages(0, layout::page_round_up(self.size));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PageEntry, ProtectionError};

    fn setup() {
        if AddressTranslator::try_current().is_none() {
            AddressTranslator::set_current(AddressTranslator::emulated(256 * PAGE_SIZE));
        }
    }

    fn frames_in_use() -> usize {
        AddressTranslator::current()
            .emulated_memory()
            .map(|mem| mem.frames_in_use())
            .unwrap_or(0)
    }

    fn root_loads() -> usize {
        AddressTranslator::current()
            .emulated_memory()
            .map(|mem| mem.root_loads())
            .unwrap_or(0)
    }

    #[test]
    fn new_space_is_empty() {
        setup();
        let space = AddressSpace::new().unwrap();
        assert_eq!(space.size(), 0);
        assert_eq!(space.page_count(), 0);
        assert_eq!(
            space.translate(VirtualAddress::new(0), Access::Read),
            Err(PageFault::NotPresent)
        );
    }

    #[test]
    fn grow_maps_zeroed_user_pages() {
        setup();
        let mut space = AddressSpace::new().unwrap();
        assert_eq!(space.grow(2 * PAGE_SIZE as isize), Ok(0));
        assert_eq!(space.grow(100), Ok(2 * PAGE_SIZE));
        assert_eq!(space.size(), 2 * PAGE_SIZE + 100);
        assert_eq!(space.page_count(), 3);

        for page in 0..3 {
            let entry = space
                .directory()
                .entry(VirtualAddress::new(page * PAGE_SIZE))
                .unwrap();
            assert_eq!(
                entry.flags(),
                PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER
            );
        }

        let mut buf = [0xFFu8; 16];
        space.read_bytes(PAGE_SIZE, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn shrink_frees_frames() {
        setup();
        let mut space = AddressSpace::new().unwrap();
        space.grow(4 * PAGE_SIZE as isize).unwrap();
        let before = frames_in_use();

        assert_eq!(space.grow(-(3 * PAGE_SIZE as isize)), Ok(4 * PAGE_SIZE));
        assert_eq!(space.size(), PAGE_SIZE);
        assert_eq!(frames_in_use(), before - 3);
        assert!(
            !space
                .directory()
                .entry(VirtualAddress::new(PAGE_SIZE))
                .unwrap()
                .is_present()
        );
    }

    #[test]
    fn grow_into_kernel_fails() {
        setup();
        let mut space = AddressSpace::new().unwrap();
        space.grow(PAGE_SIZE as isize).unwrap();

        assert_eq!(
            space.grow(KERNBASE as isize),
            Err(GrowError::ExceedsUserSpace)
        );
        assert_eq!(space.size(), PAGE_SIZE);
    }

    #[test]
    fn shrink_below_zero_fails() {
        setup();
        let mut space = AddressSpace::new().unwrap();
        space.grow(PAGE_SIZE as isize).unwrap();

        assert_eq!(space.grow(-(2 * PAGE_SIZE as isize)), Err(GrowError::BelowZero));
        assert_eq!(space.size(), PAGE_SIZE);
    }

    #[test]
    fn out_of_memory_rolls_back() {
        // Frame 0 is reserved, so seven frames are usable.
        AddressTranslator::set_current(AddressTranslator::emulated(8 * PAGE_SIZE));
        let mut space = AddressSpace::new().unwrap();

        assert_eq!(space.grow(10 * PAGE_SIZE as isize), Err(GrowError::OutOfMemory));
        assert_eq!(space.size(), 0);
        // The root and the page table remain.
        assert_eq!(frames_in_use(), 2);

        assert_eq!(space.grow(5 * PAGE_SIZE as isize), Ok(0));
        assert_eq!(frames_in_use(), 7);
    }

    #[test]
    fn read_write_across_pages() {
        setup();
        let mut space = AddressSpace::new().unwrap();
        space.grow(2 * PAGE_SIZE as isize).unwrap();

        let data: Vec<u8> = (0..32).collect();
        space.write_bytes(PAGE_SIZE - 16, &data).unwrap();

        let mut back = [0u8; 32];
        space.read_bytes(PAGE_SIZE - 16, &mut back).unwrap();
        assert_eq!(&back[..], &data[..]);

        assert_eq!(
            space.write_bytes(2 * PAGE_SIZE - 4, &data),
            Err(PageFault::NotPresent)
        );
    }

    #[test]
    fn kernel_addresses_fault() {
        setup();
        let space = AddressSpace::new().unwrap();
        assert_eq!(
            space.translate(VirtualAddress::new(KERNBASE), Access::Read),
            Err(PageFault::Privilege)
        );
        let mut buf = [0u8; 4];
        assert_eq!(
            space.read_bytes(KERNBASE - 2, &mut buf),
            Err(PageFault::NotPresent)
        );
    }

    #[test]
    fn duplicate_copies_contents_and_flags() {
        setup();
        let mut parent = AddressSpace::new().unwrap();
        parent.grow(2 * PAGE_SIZE as isize).unwrap();
        parent.write_bytes(10, b"parent").unwrap();
        let mut flags = parent
            .directory()
            .entry(VirtualAddress::new(PAGE_SIZE))
            .unwrap()
            .flags();
        flags.remove(PageFlags::WRITABLE);
        parent
            .directory_mut()
            .table_mut(VirtualAddress::new(PAGE_SIZE))
            .unwrap()
            .entry_mut(1)
            .unwrap()
            .set_flags(flags);

        let mut child = parent.duplicate().unwrap();
        assert_eq!(child.size(), parent.size());

        let mut buf = [0u8; 6];
        child.read_bytes(10, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");

        child.write_bytes(10, b"child!").unwrap();
        parent.read_bytes(10, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");

        assert_eq!(
            child.translate(VirtualAddress::new(PAGE_SIZE), Access::Write),
            Err(PageFault::WriteProtected)
        );
        assert_ne!(
            child.translate(VirtualAddress::new(0), Access::Read),
            parent.translate(VirtualAddress::new(0), Access::Read)
        );
    }

    #[test]
    fn duplicate_skips_unmapped_pages() {
        setup();
        let mut parent = AddressSpace::new().unwrap();
        parent.grow(3 * PAGE_SIZE as isize).unwrap();
        let hole = VirtualAddress::new(PAGE_SIZE);
        let frame = parent.directory_mut().unmap(hole).unwrap();
        AddressTranslator::current().deallocate_frame(frame);
        parent.write_bytes(2 * PAGE_SIZE, b"tail").unwrap();

        let child = parent.duplicate().unwrap();
        assert_eq!(child.translate(hole, Access::Read), Err(PageFault::NotPresent));
        let mut buf = [0u8; 4];
        child.read_bytes(2 * PAGE_SIZE, &mut buf).unwrap();
        assert_eq!(&buf, b"tail");
    }

    #[test]
    fn drop_frees_everything() {
        setup();
        let before = frames_in_use();
        {
            let mut space = AddressSpace::new().unwrap();
            space.grow(5 * PAGE_SIZE as isize).unwrap();
            let _copy = space.duplicate().unwrap();
        }
        assert_eq!(frames_in_use(), before);
    }

    #[test]
    fn protect_without_page_table_is_not_mapped() {
        setup();
        // The size covers two pages, but no page table was ever allocated.
        let mut space = AddressSpace {
            directory: PageDirectory::new().unwrap(),
            size: 2 * PAGE_SIZE,
        };
        unsafe { space.activate() };
        let loads = root_loads();

        assert_eq!(
            space.protect(PAGE_SIZE, 1),
            Err(ProtectionError::NotMapped {
                address: VirtualAddress::new(PAGE_SIZE)
            })
        );
        assert_eq!(
            space.unprotect(0, 2),
            Err(ProtectionError::NotMapped {
                address: VirtualAddress::new(0)
            })
        );
        assert!(!space.directory().root().entry(0).unwrap().is_present());
        assert!(space.directory().table(VirtualAddress::new(0)).is_none());
        assert_eq!(root_loads(), loads);
    }

    #[test]
    fn protect_over_large_page_is_not_mapped() {
        setup();
        let mut space = AddressSpace {
            directory: PageDirectory::new().unwrap(),
            size: 2 * TABLE_SPAN,
        };
        let large = PageEntry::new(
            PhysicalAddress::new(0x0040_0000),
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER | PageFlags::HUGE_PAGE,
        );
        *space.directory_mut().root_mut().entry_mut(1).unwrap() = large;
        unsafe { space.activate() };
        let loads = root_loads();

        let start = VirtualAddress::new(TABLE_SPAN);
        assert_eq!(
            space.protect(TABLE_SPAN, 1),
            Err(ProtectionError::NotMapped { address: start })
        );
        assert_eq!(space.directory().root().entry(1), Some(large));
        assert!(space.directory().table(start).is_none());
        assert_eq!(root_loads(), loads);

        // Not a frame this space owns.
        space.directory_mut().root_mut().entry_mut(1).unwrap().clear();
    }
}
