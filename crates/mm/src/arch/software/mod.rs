//! Software emulation implementation for testing and development.
//!
//! This module provides a software-emulated machine that runs on any host. Paging
//! geometry is identical to the hardware; only physical memory and the page-table-base
//! register are simulated:
//!
//! - Physical memory is a page-aligned host buffer. Physical address `n` is byte `n` of
//!   the buffer.
//! - Loading a page directory records it as the active root and counts the load, which
//!   stands in for the TLB flush a real CR3 write performs.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::vec::Vec;

use crate::{AddressTranslator, PhysicalAddress, layout::PAGE_SIZE};

/// Records `root` as the active page directory of the emulated machine.
///
/// # Safety
/// Mirrors the hardware signature; loading a root in emulation cannot fault.
#[inline]
pub unsafe fn load_root(root: PhysicalAddress) {
    if let Some(mem) = AddressTranslator::current().emulated_memory() {
        mem.load_root(root.as_usize());
    }
}

/// Returns the physical address of the active page directory.
pub fn current_root() -> PhysicalAddress {
    AddressTranslator::current()
        .emulated_memory()
        .map(|mem| PhysicalAddress::new(mem.current_root()))
        .unwrap_or(PhysicalAddress::new(0))
}

/// Emulated physical memory for software simulation.
///
/// Hands out zeroed page frames from a bump region plus a free list, and emulates the
/// page-table-base register.
pub struct EmulatedMemory {
    /// Base of the page-aligned backing buffer.
    base: NonNull<u8>,
    /// Size of the buffer in bytes.
    size: usize,
    /// Next never-used frame (simple bump allocator).
    next_frame: AtomicUsize,
    /// Frames returned by `deallocate_frame`.
    free_frames: spin::Mutex<Vec<usize>>,
    /// Physical address of the active page directory.
    root: AtomicUsize,
    /// Number of times a page directory has been loaded.
    root_loads: AtomicUsize,
}

impl EmulatedMemory {
    /// Creates a new emulated memory region of the specified size.
    ///
    /// # Panics
    /// Panics if `size` is zero, not a page multiple, or cannot be allocated.
    pub fn new(size: usize) -> Self {
        assert!(
            size > 0 && size % PAGE_SIZE == 0,
            "emulated memory must be a non-zero number of pages"
        );
        // SAFETY: The layout has a non-zero size.
        let base = NonNull::new(unsafe { alloc_zeroed(Self::layout(size)) })
            .expect("failed to allocate emulated memory");

        Self {
            base,
            size,
            // Frame 0 is never handed out so a zero physical address stays recognizable.
            next_frame: AtomicUsize::new(PAGE_SIZE),
            free_frames: spin::Mutex::new(Vec::new()),
            root: AtomicUsize::new(0),
            root_loads: AtomicUsize::new(0),
        }
    }

    fn layout(size: usize) -> Layout {
        Layout::from_size_align(size, PAGE_SIZE).expect("invalid emulated memory layout")
    }

    /// Allocates one zeroed frame, returning its physical address.
    pub fn allocate_frame(&self) -> Option<usize> {
        if let Some(frame) = self.free_frames.lock().pop() {
            // SAFETY: The frame lies inside the buffer and is no longer referenced.
            unsafe { core::ptr::write_bytes(self.translate(frame), 0, PAGE_SIZE) };
            return Some(frame);
        }

        let frame = self.next_frame.fetch_add(PAGE_SIZE, Ordering::Relaxed);
        if frame + PAGE_SIZE > self.size {
            self.next_frame.fetch_sub(PAGE_SIZE, Ordering::Relaxed);
            return None;
        }
        Some(frame)
    }

    /// Returns a frame to the free list.
    pub fn deallocate_frame(&self, frame: usize) {
        assert!(frame % PAGE_SIZE == 0, "frame must be page-aligned");
        assert!(frame < self.size, "physical address out of bounds");
        let mut free = self.free_frames.lock();
        debug_assert!(!free.contains(&frame), "frame {:#x} freed twice", frame);
        free.push(frame);
    }

    /// Returns the number of frames currently handed out.
    pub fn frames_in_use(&self) -> usize {
        let issued = self.next_frame.load(Ordering::Relaxed) / PAGE_SIZE - 1;
        issued - self.free_frames.lock().len()
    }

    /// Translates a physical address to a pointer into the buffer.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(phys < self.size, "physical address out of bounds");
        // SAFETY: phys is within the allocation.
        unsafe { self.base.as_ptr().add(phys) }
    }

    /// Translates a pointer into the buffer back to a physical address.
    pub fn ptr_to_phys(&self, ptr: *const u8) -> usize {
        let offset = (ptr as usize).wrapping_sub(self.base.as_ptr() as usize);
        assert!(offset < self.size, "pointer not within emulated memory");
        offset
    }

    /// Emulates a write to the page-table-base register.
    pub fn load_root(&self, root: usize) {
        self.root.store(root, Ordering::Release);
        self.root_loads.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the physical address of the most recently loaded page directory.
    pub fn current_root(&self) -> usize {
        self.root.load(Ordering::Acquire)
    }

    /// Returns how many times a page directory has been loaded.
    pub fn root_loads(&self) -> usize {
        self.root_loads.load(Ordering::Acquire)
    }
}

impl Drop for EmulatedMemory {
    fn drop(&mut self) {
        // SAFETY: The buffer was allocated in `new` with the same layout.
        unsafe { dealloc(self.base.as_ptr(), Self::layout(self.size)) }
    }
}
