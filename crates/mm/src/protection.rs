//! Write protection of user pages.
//!
//! Changing the protection of a run of pages is a four-step sequence:
//!
//! 1. [`ProtectionRequest::validate`] checks the request against the process size and
//!    the user half of the address space, producing a [`PageRun`].
//! 2. The page table holding the run is located through the page directory. A missing
//!    table is reported as [`ProtectionError::NotMapped`].
//! 3. Every entry of the run is checked for presence before any of them is touched, so
//!    a request either changes all of its pages or none of them.
//! 4. The page directory is reloaded once, flushing the translation cache.
//!
//! A run never leaves the page table holding its first page. Longer runs are rejected
//! with [`RangeViolation::CrossesTableBoundary`].

use core::fmt;

use crate::{
    AddressSpace, PageEntry, PageFlags, PageNumber, VirtualAddress,
    layout::{self, ENTRIES_PER_TABLE, PAGE_SIZE, PROTECTION_ALIGNMENT},
};

/// Reasons a protection request is rejected before any entry is inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeViolation {
    /// The page count is zero or negative.
    NonPositiveCount,
    /// The run extends past the end of the process's memory.
    ExceedsProcessSize,
    /// The address is at or above `KERNBASE`.
    OutsideUserSpace,
    /// The address is not a multiple of `PROTECTION_ALIGNMENT`.
    Misaligned,
    /// The run does not fit in the page table holding its first page.
    CrossesTableBoundary,
}

impl fmt::Display for RangeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeViolation::NonPositiveCount => write!(f, "page count must be positive"),
            RangeViolation::ExceedsProcessSize => write!(f, "range exceeds process size"),
            RangeViolation::OutsideUserSpace => write!(f, "address outside user space"),
            RangeViolation::Misaligned => {
                write!(f, "address not aligned to {} bytes", PROTECTION_ALIGNMENT)
            }
            RangeViolation::CrossesTableBoundary => write!(f, "range crosses a page table"),
        }
    }
}

/// Errors returned when changing the protection of a run of pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionError {
    /// The request itself is out of bounds.
    InvalidRange(RangeViolation),
    /// A page in the run has no present entry. `address` is the first such page.
    NotMapped { address: VirtualAddress },
}

impl fmt::Display for ProtectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionError::InvalidRange(violation) => write!(f, "invalid range: {}", violation),
            ProtectionError::NotMapped { address } => write!(f, "page {} is not mapped", address),
        }
    }
}

impl core::error::Error for ProtectionError {}

impl From<RangeViolation> for ProtectionError {
    fn from(violation: RangeViolation) -> Self {
        ProtectionError::InvalidRange(violation)
    }
}

/// The protection to apply to a run of pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// Clear the writable bit.
    ReadOnly,
    /// Set the writable bit.
    Writable,
}

impl Protection {
    /// Applies this protection to one entry. No other bit of the entry changes.
    fn apply(self, entry: &mut PageEntry) {
        let mut flags = entry.flags();
        flags.set(PageFlags::WRITABLE, self == Protection::Writable);
        entry.set_flags(flags);
    }
}

/// A protection change as it arrives from user code: a start address and a page count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionRequest {
    pub address: usize,
    pub pages: isize,
}

impl ProtectionRequest {
    pub const fn new(address: usize, pages: isize) -> Self {
        Self { address, pages }
    }

    /// Checks the request against a process of `size` bytes.
    ///
    /// Checks run in a fixed order and the first failing one is reported.
    pub fn validate(&self, size: usize) -> Result<PageRun, RangeViolation> {
        if self.pages <= 0 {
            return Err(RangeViolation::NonPositiveCount);
        }
        let count = self.pages.unsigned_abs();
        let limit = size.div_ceil(PAGE_SIZE);
        if count > limit {
            return Err(RangeViolation::ExceedsProcessSize);
        }
        if !layout::is_user(self.address) {
            return Err(RangeViolation::OutsideUserSpace);
        }
        if self.address % PROTECTION_ALIGNMENT != 0 {
            return Err(RangeViolation::Misaligned);
        }

        let first = PageNumber::from(VirtualAddress::new(self.address));
        let end = first
            .as_usize()
            .checked_add(count)
            .filter(|&end| end <= limit)
            .ok_or(RangeViolation::ExceedsProcessSize)?;
        if (end - 1) / ENTRIES_PER_TABLE != first.directory_index() {
            return Err(RangeViolation::CrossesTableBoundary);
        }

        Ok(PageRun { first, count })
    }
}

/// A validated run of consecutive pages inside a single page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRun {
    first: PageNumber,
    count: usize,
}

impl PageRun {
    /// Returns the first page of the run.
    pub fn first(&self) -> PageNumber {
        self.first
    }

    /// Returns the number of pages in the run.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns the address of the first page.
    pub fn start(&self) -> VirtualAddress {
        self.first.start()
    }
}

impl AddressSpace {
    /// Makes `pages` pages starting at `address` read-only.
    pub fn protect(&mut self, address: usize, pages: isize) -> Result<PageRun, ProtectionError> {
        self.change_protection(ProtectionRequest::new(address, pages), Protection::ReadOnly)
    }

    /// Makes `pages` pages starting at `address` writable again.
    pub fn unprotect(&mut self, address: usize, pages: isize) -> Result<PageRun, ProtectionError> {
        self.change_protection(ProtectionRequest::new(address, pages), Protection::Writable)
    }

    /// Applies `protection` to every page of `request`.
    ///
    /// Either every page of the run is changed and the translation cache is flushed
    /// once, or nothing is changed and nothing is flushed.
    pub fn change_protection(
        &mut self,
        request: ProtectionRequest,
        protection: Protection,
    ) -> Result<PageRun, ProtectionError> {
        let run = request.validate(self.size()).inspect_err(|violation| {
            log::debug!(
                "rejected {:?} of {} pages at {:#x}: {}",
                protection,
                request.pages,
                request.address,
                violation
            )
        })?;

        let start = run.start();
        let table = self
            .directory_mut()
            .table_mut(start)
            .ok_or(ProtectionError::NotMapped { address: start })?;
        let entries = table
            .run_mut(run.first().table_index(), run.count())
            .ok_or(RangeViolation::CrossesTableBoundary)?;

        if let Some(offset) = entries.iter().position(|entry| !entry.is_present()) {
            let address = (run.first() + offset).start();
            log::debug!("{:?} of {:?} failed: {} not mapped", protection, run, address);
            return Err(ProtectionError::NotMapped { address });
        }

        for entry in entries.iter_mut() {
            protection.apply(entry);
        }

        // Protection is only ever changed by the running process, on its own directory.
        debug_assert!(self.directory().is_active(), "changed an inactive directory");
        // SAFETY: The directory is already loaded, so reloading it only discards stale
        // translations.
        unsafe { self.activate() };

        log::debug!("{:?} applied to {} pages at {}", protection, run.count(), start);
        Ok(run)
    }
}
