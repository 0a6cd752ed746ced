//! Bare-metal 32-bit x86 implementation.

use core::arch::asm;

use crate::PhysicalAddress;

/// Loads `root` into CR3, making it the active page directory.
///
/// Writing CR3 also invalidates every non-global translation cached in the TLB, even
/// when the value written equals the current one.
///
/// # Safety
/// The caller must ensure `root` is a valid page directory that maps the kernel,
/// including the code executing this instruction.
#[inline]
pub unsafe fn load_root(root: PhysicalAddress) {
    // SAFETY: Caller guarantees the directory is valid.
    unsafe {
        asm!("mov cr3, {}", in(reg) root.as_usize(), options(nostack, preserves_flags));
    }
}

/// Returns the physical address of the active page directory.
#[inline]
pub fn current_root() -> PhysicalAddress {
    let value: usize;
    // SAFETY: Reading CR3 has no side effects.
    unsafe {
        asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    PhysicalAddress::new(value & !0xFFF)
}
