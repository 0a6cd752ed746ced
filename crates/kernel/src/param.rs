//! Kernel-wide limits.

/// Maximum number of processes, counting zombies that have not been reaped yet.
pub const NPROC: usize = 64;

/// Maximum number of argument words a system call can receive.
pub const MAX_SYSCALL_ARGS: usize = 6;

/// Process id of the init process, which adopts orphaned children.
pub const INIT_PID: u32 = 1;
