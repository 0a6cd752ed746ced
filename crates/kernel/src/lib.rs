#![cfg_attr(not(test), no_std)]

//! The Tern kernel: processes, the tick clock and the system call layer.
//!
//! Memory management lives in the `mm` crate. The embedding binary provides the
//! global allocator, the scheduler that loads a process's address space before it runs,
//! the trap handler that calls [`syscall::dispatch`], and the timer
//! interrupt that calls [`clock::Clock::tick`].

extern crate alloc;

pub mod clock;
mod console;
pub mod param;
pub mod proc;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod serial;
pub mod sync;
pub mod syscall;

use log::SetLoggerError;
use mm::{AddressTranslator, KERNBASE};

pub use console::Console;
pub use syscall::{Kernel, SyscallArgs, SyscallOutcome, dispatch};

/// Brings up logging and physical memory access.
///
/// Must be called once, before any process is created.
pub fn init() -> Result<&'static Console, SetLoggerError> {
    let console = Console::init()?;
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    serial::init(console);

    // Physical memory is mapped at KERNBASE in every address space.
    AddressTranslator::set_current(AddressTranslator::hardware(KERNBASE));

    // Every process directory shares the kernel half of the boot directory.
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        use mm::PageDirectory;
        // SAFETY: The boot directory maps the kernel that is running on it, and is never
        // freed.
        unsafe { PageDirectory::set_kernel_template(PageDirectory::active_root()) };
    }

    log::info!("tern kernel initialized");
    Ok(console)
}
