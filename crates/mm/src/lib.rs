#![cfg_attr(not(emulated), no_std)]

//! # Tern Memory Manager
//!
//! The Tern Memory Manager is the low-level memory management crate of the Tern
//! kernel. It provides:
//!
//! - Address and page number types.
//! - Two-level 32-bit x86 page tables with bounds-checked entry access.
//! - User address spaces that can grow, shrink, be copied for `fork`, and have runs
//!   of pages made read-only or writable again.
//! - Software emulation of physical memory and the page-table-base register, so all
//!   of the above runs in hosted tests.

extern crate alloc;

mod address;
mod address_space;
mod arch;
mod entry;
pub mod layout;
mod numbers;
mod page_directory;
mod protection;
mod table;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use address_space::{Access, AddressSpace, GrowError, PageFault};
pub use entry::{PageEntry, PageFlags};
pub use layout::{ENTRIES_PER_TABLE, KERNBASE, PAGE_SIZE, PROTECTION_ALIGNMENT, TABLE_SPAN};
pub use numbers::PageNumber;
pub use page_directory::{MapError, PageDirectory};
pub use protection::{PageRun, Protection, ProtectionError, ProtectionRequest, RangeViolation};
pub use table::PageTable;

#[cfg(emulated)]
pub use arch::EmulatedMemory;
