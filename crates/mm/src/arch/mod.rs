//! Architecture-specific implementations for memory management.
//!
//! This module selects either the bare-metal x86 implementation or the software
//! emulation used by hosted builds and tests. The `emulated` cfg is decided by the
//! build script.

#[cfg(not(emulated))]
mod x86;
#[cfg(not(emulated))]
pub use x86::*;

#[cfg(emulated)]
mod software;
#[cfg(emulated)]
pub use software::*;
