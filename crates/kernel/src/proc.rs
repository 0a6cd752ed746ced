//! Processes and the process table.
//!
//! The table tracks at most [`NPROC`] processes. A process that exits becomes a
//! zombie and keeps its slot (and its memory) until its parent reaps it with
//! [`ProcessTable::wait`]. Children of an exiting process are handed to init.

use alloc::{sync::Arc, vec::Vec};
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use mm::{AddressSpace, GrowError};
use spin::Mutex;

use crate::{
    param::{INIT_PID, NPROC},
    sync::WaitChannel,
};

/// A process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u32);

impl Pid {
    pub const INIT: Pid = Pid(INIT_PID);

    pub const fn new(pid: u32) -> Self {
        Self(pid)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors returned by process table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// Every process slot is in use.
    TableFull,
    /// The caller has no children to wait for.
    NoChildren,
    /// No live process has the given pid.
    NoSuchProcess,
    /// The caller was killed while waiting.
    Killed,
    /// The process's memory could not be created or copied.
    Memory(GrowError),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::TableFull => write!(f, "process table full"),
            ProcessError::NoChildren => write!(f, "no children"),
            ProcessError::NoSuchProcess => write!(f, "no such process"),
            ProcessError::Killed => write!(f, "killed"),
            ProcessError::Memory(err) => write!(f, "memory: {}", err),
        }
    }
}

impl core::error::Error for ProcessError {}

impl From<GrowError> for ProcessError {
    fn from(err: GrowError) -> Self {
        ProcessError::Memory(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Zombie,
}

/// A user process.
pub struct Process {
    pid: Pid,
    killed: AtomicBool,
    memory: Mutex<AddressSpace>,
}

impl Process {
    fn new(pid: Pid, memory: AddressSpace) -> Self {
        Self {
            pid,
            killed: AtomicBool::new(false),
            memory: Mutex::new(memory),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Returns the flag set by [`ProcessTable::kill`].
    pub fn killed(&self) -> &AtomicBool {
        &self.killed
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Returns the process's address space.
    ///
    /// Every operation that reads or changes the page tables holds this lock for its
    /// whole duration.
    pub fn memory(&self) -> &Mutex<AddressSpace> {
        &self.memory
    }
}

struct Slot {
    process: Arc<Process>,
    parent: Option<Pid>,
    state: ProcessState,
}

/// The table of all processes.
pub struct ProcessTable {
    slots: Mutex<Vec<Slot>>,
    next_pid: AtomicU32,
    /// Parents in `wait` sleep here; `exit` and `kill` wake them.
    channel: WaitChannel,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(INIT_PID),
            channel: WaitChannel::new(),
        }
    }

    /// Creates the init process with `image_size` bytes of zeroed memory.
    ///
    /// Called once at boot; init receives the first pid.
    pub fn spawn_init(&self, image_size: usize) -> Result<Arc<Process>, ProcessError> {
        let mut memory = AddressSpace::new()?;
        let delta = isize::try_from(image_size).map_err(|_| GrowError::ExceedsUserSpace)?;
        memory.grow(delta)?;

        let process = self.register(memory, None)?;
        log::info!("init is pid {}", process.pid());
        Ok(process)
    }

    /// Creates a child of `parent` with a copy of its memory. Returns the child's pid.
    pub fn fork(&self, parent: &Process) -> Result<Pid, ProcessError> {
        let memory = parent.memory().lock().duplicate()?;
        let child = self.register(memory, Some(parent.pid()))?;
        log::debug!("pid {} forked pid {}", parent.pid(), child.pid());
        Ok(child.pid())
    }

    fn register(
        &self,
        memory: AddressSpace,
        parent: Option<Pid>,
    ) -> Result<Arc<Process>, ProcessError> {
        let mut slots = self.slots.lock();
        if slots.len() >= NPROC {
            return Err(ProcessError::TableFull);
        }

        let pid = Pid(self.next_pid.fetch_add(1, Ordering::Relaxed));
        let process = Arc::new(Process::new(pid, memory));
        slots.push(Slot {
            process: process.clone(),
            parent,
            state: ProcessState::Running,
        });
        Ok(process)
    }

    /// Turns `process` into a zombie and hands its children to init.
    ///
    /// The memory stays allocated until the parent reaps the zombie.
    ///
    /// # Panics
    /// Panics if `process` is init.
    pub fn exit(&self, process: &Process) {
        if process.pid() == Pid::INIT {
            panic!("init exiting");
        }

        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.parent == Some(process.pid()) {
                slot.parent = Some(Pid::INIT);
            }
            if slot.process.pid() == process.pid() {
                slot.state = ProcessState::Zombie;
            }
        }
        log::debug!("pid {} exited", process.pid());
        self.channel.wakeup();
    }

    /// Waits for a child of `process` to exit, reaps it and returns its pid.
    pub fn wait(&self, process: &Process) -> Result<Pid, ProcessError> {
        let mut slots = self.slots.lock();
        loop {
            let mut has_children = false;
            let mut zombie = None;
            for (index, slot) in slots.iter().enumerate() {
                if slot.parent != Some(process.pid()) {
                    continue;
                }
                has_children = true;
                if slot.state == ProcessState::Zombie {
                    zombie = Some(index);
                    break;
                }
            }

            if let Some(index) = zombie {
                let child = slots.swap_remove(index);
                drop(slots);
                let pid = child.process.pid();
                log::debug!("pid {} reaped pid {}", process.pid(), pid);
                return Ok(pid);
            }
            if !has_children {
                return Err(ProcessError::NoChildren);
            }
            if process.is_killed() {
                return Err(ProcessError::Killed);
            }

            slots = self.channel.sleep(&self.slots, slots, process.killed());
        }
    }

    /// Marks the process `pid` as killed and wakes it if it is sleeping.
    ///
    /// The process notices the flag the next time it sleeps or returns to user mode.
    /// Zombies can be killed too, which changes nothing until they are reaped.
    pub fn kill(&self, pid: Pid) -> Result<(), ProcessError> {
        let slots = self.slots.lock();
        let slot = slots
            .iter()
            .find(|slot| slot.process.pid() == pid)
            .ok_or(ProcessError::NoSuchProcess)?;

        slot.process.killed.store(true, Ordering::Release);
        self.channel.wakeup();
        log::debug!("pid {} killed", pid);
        Ok(())
    }

    /// Returns the process with the given pid, including zombies.
    pub fn find(&self, pid: Pid) -> Option<Arc<Process>> {
        self.slots
            .lock()
            .iter()
            .find(|slot| slot.process.pid() == pid)
            .map(|slot| slot.process.clone())
    }

    pub fn state(&self, pid: Pid) -> Option<ProcessState> {
        self.slots
            .lock()
            .iter()
            .find(|slot| slot.process.pid() == pid)
            .map(|slot| slot.state)
    }

    pub fn parent(&self, pid: Pid) -> Option<Pid> {
        self.slots
            .lock()
            .iter()
            .find(|slot| slot.process.pid() == pid)
            .and_then(|slot| slot.parent)
    }

    /// Returns the number of slots in use.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
