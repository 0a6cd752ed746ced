//! The system call layer.
//!
//! [`dispatch`] decodes a call number and its arguments and runs the call on behalf of
//! the current process. Every failure is reported to user code as `-1`; the reason is
//! only logged.

mod args;

use core::fmt;
use core::mem::size_of;

use mm::{GrowError, Protection, ProtectionError, ProtectionRequest};

use crate::{
    clock::Clock,
    proc::{Pid, Process, ProcessError, ProcessTable},
    sync::Interrupted,
};

pub use args::SyscallArgs;

/// System call numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Fork = 1,
    Exit = 2,
    Wait = 3,
    Kill = 6,
    GetPid = 11,
    Sbrk = 12,
    Sleep = 13,
    Uptime = 14,
    Mprotect = 22,
    Munprotect = 23,
}

impl Syscall {
    pub fn from_number(number: usize) -> Option<Self> {
        Some(match number {
            1 => Syscall::Fork,
            2 => Syscall::Exit,
            3 => Syscall::Wait,
            6 => Syscall::Kill,
            11 => Syscall::GetPid,
            12 => Syscall::Sbrk,
            13 => Syscall::Sleep,
            14 => Syscall::Uptime,
            22 => Syscall::Mprotect,
            23 => Syscall::Munprotect,
            _ => return None,
        })
    }
}

/// Errors a system call can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// An argument is missing or out of range.
    BadArgument,
    /// A pointer argument does not lie inside the caller's memory.
    BadAddress,
    Process(ProcessError),
    Memory(GrowError),
    Protection(ProtectionError),
    /// The caller was killed while sleeping.
    Interrupted,
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyscallError::BadArgument => write!(f, "bad argument"),
            SyscallError::BadAddress => write!(f, "bad address"),
            SyscallError::Process(err) => write!(f, "{}", err),
            SyscallError::Memory(err) => write!(f, "{}", err),
            SyscallError::Protection(err) => write!(f, "{}", err),
            SyscallError::Interrupted => write!(f, "{}", Interrupted),
        }
    }
}

impl core::error::Error for SyscallError {}

impl From<ProcessError> for SyscallError {
    fn from(err: ProcessError) -> Self {
        SyscallError::Process(err)
    }
}

impl From<GrowError> for SyscallError {
    fn from(err: GrowError) -> Self {
        SyscallError::Memory(err)
    }
}

impl From<ProtectionError> for SyscallError {
    fn from(err: ProtectionError) -> Self {
        SyscallError::Protection(err)
    }
}

impl From<Interrupted> for SyscallError {
    fn from(_: Interrupted) -> Self {
        SyscallError::Interrupted
    }
}

/// What the trap handler does after a system call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Resume the caller with this return value.
    Return(isize),
    /// The caller exited and must not be resumed.
    Exited,
}

/// Kernel state shared by every system call.
pub struct Kernel {
    processes: ProcessTable,
    clock: Clock,
}

impl Kernel {
    pub const fn new() -> Self {
        Self {
            processes: ProcessTable::new(),
            clock: Clock::new(),
        }
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs system call `number` for `current`.
pub fn dispatch(
    kernel: &Kernel,
    current: &Process,
    number: usize,
    args: &SyscallArgs,
) -> SyscallOutcome {
    let Some(syscall) = Syscall::from_number(number) else {
        log::warn!("pid {}: unknown syscall {}", current.pid(), number);
        return SyscallOutcome::Return(-1);
    };

    let result = match syscall {
        Syscall::Exit => {
            kernel.processes().exit(current);
            return SyscallOutcome::Exited;
        }
        Syscall::Fork => sys_fork(kernel, current),
        Syscall::Wait => sys_wait(kernel, current),
        Syscall::Kill => sys_kill(kernel, args),
        Syscall::GetPid => Ok(current.pid().as_u32() as isize),
        Syscall::Sbrk => sys_sbrk(current, args),
        Syscall::Sleep => sys_sleep(kernel, current, args),
        Syscall::Uptime => Ok(kernel.clock().now() as isize),
        Syscall::Mprotect => sys_change_protection(current, args, Protection::ReadOnly),
        Syscall::Munprotect => sys_change_protection(current, args, Protection::Writable),
    };

    match result {
        Ok(value) => SyscallOutcome::Return(value),
        Err(err) => {
            log::debug!("pid {}: {:?} failed: {}", current.pid(), syscall, err);
            SyscallOutcome::Return(-1)
        }
    }
}

fn sys_fork(kernel: &Kernel, current: &Process) -> Result<isize, SyscallError> {
    let pid = kernel.processes().fork(current)?;
    Ok(pid.as_u32() as isize)
}

fn sys_wait(kernel: &Kernel, current: &Process) -> Result<isize, SyscallError> {
    let pid = kernel.processes().wait(current)?;
    Ok(pid.as_u32() as isize)
}

fn sys_kill(kernel: &Kernel, args: &SyscallArgs) -> Result<isize, SyscallError> {
    let pid = u32::try_from(args.int(0)?).map_err(|_| ProcessError::NoSuchProcess)?;
    kernel.processes().kill(Pid::new(pid))?;
    Ok(0)
}

fn sys_sbrk(current: &Process, args: &SyscallArgs) -> Result<isize, SyscallError> {
    let delta = args.int(0)?;
    let old = current.memory().lock().grow(delta as isize)?;
    Ok(old as isize)
}

fn sys_sleep(
    kernel: &Kernel,
    current: &Process,
    args: &SyscallArgs,
) -> Result<isize, SyscallError> {
    let ticks = u64::try_from(args.int(0)?).map_err(|_| SyscallError::BadArgument)?;
    kernel.clock().sleep(ticks, current.killed())?;
    Ok(0)
}

/// Backs both `mprotect` and `munprotect`.
///
/// The memory lock is held from the pointer check to the final directory reload.
fn sys_change_protection(
    current: &Process,
    args: &SyscallArgs,
    protection: Protection,
) -> Result<isize, SyscallError> {
    let mut memory = current.memory().lock();
    let address = args.pointer(0, size_of::<u32>(), &memory)?;
    let pages = args.int(1)?;
    memory.change_protection(ProtectionRequest::new(address, pages as isize), protection)?;
    Ok(0)
}
