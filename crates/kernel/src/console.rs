//! Defines the kernel console, the `log` backend that writes to the serial port.

use core::sync::atomic::{AtomicBool, Ordering};

use log::{LevelFilter, SetLoggerError};
use spin::{Mutex, Once};

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
use crate::serial::SerialWriter;

pub struct Console {
    has_output: AtomicBool,
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    serial: Mutex<Option<SerialWriter>>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    pub fn init() -> Result<&'static Self, SetLoggerError> {
        let console = Self::default();
        console.install()?;
        Ok(console)
    }

    pub fn default() -> &'static Self {
        DEFAULT.call_once(|| Console {
            has_output: AtomicBool::new(false),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            serial: Mutex::new(None),
        })
    }

    pub fn install(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(max_level());
        Ok(())
    }

    pub fn has_output(&self) -> bool {
        self.has_output.load(Ordering::SeqCst)
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    pub fn attach_serial(&self, serial: SerialWriter) {
        let mut guard = self.serial.lock();
        *guard = Some(serial);
        self.has_output.store(true, Ordering::SeqCst);
    }
}

fn max_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) || !self.has_output() {
            return;
        }

        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        if let Some(serial) = &mut *self.serial.lock() {
            // Nowhere to report a failing console.
            let _ = write_log_entry_to(serial, record);
        }
    }

    fn flush(&self) {}
}

fn write_log_entry_to(
    writer: &mut impl core::fmt::Write,
    record: &log::Record,
) -> core::fmt::Result {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}
