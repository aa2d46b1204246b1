//! Kernel logging.
//!
//! Routes the `log` crate's macros to the serial port. Every record carries
//! the source file and line of the call site, which is what makes paging
//! diagnostics traceable when all you have is the wire.

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

static LOGGER: SerialLogger = SerialLogger {
    line: Mutex::new(()),
};

struct SerialLogger {
    // Keeps concurrent records from interleaving on the port.
    line: Mutex<()>,
}

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _held = self.line.lock();
        crate::serial_println!(
            "[{}] {}:{}: {}",
            record.level(),
            record.file().unwrap_or("?"),
            record.line().unwrap_or(0),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Installs the serial logger. Call once, before paging init, so the whole
/// memory bring-up is visible.
pub fn init() {
    log::set_logger(&LOGGER).expect("logger installed twice");
    log::set_max_level(if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
}
