//! Console logger
//!
//! Routes the `log` facade to a [`Console`]. Warnings and errors are always
//! shown; the `debug` configuration value enables debug records.

use core::fmt::Write;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use netchain_hal::console::ConsoleWriter;
use netchain_hal::Console;
use spin::Mutex;

/// Level filter outside debug mode
pub const DEFAULT_LEVEL: LevelFilter = LevelFilter::Warn;

/// Logger writing `[LEVEL] target: message` lines
pub struct ConsoleLogger {
    sink: Mutex<Option<&'static (dyn Console + Sync)>>,
}

impl ConsoleLogger {
    /// Logger without a console; records are dropped
    pub const fn new() -> Self {
        Self { sink: Mutex::new(None) }
    }

    /// Send records to `console`
    pub fn attach(&self, console: &'static (dyn Console + Sync)) {
        *self.sink.lock() = Some(console);
    }

    /// Stop writing records
    pub fn detach(&self) {
        *self.sink.lock() = None;
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ConsoleLogger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConsoleLogger").field("attached", &self.sink.lock().is_some()).finish()
    }
}

/// Fixed-width label of a level
pub const fn level_label(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let sink = *self.sink.lock();
        if let Some(console) = sink {
            let _ = writeln!(
                ConsoleWriter(console),
                "[{}] {}: {}",
                level_label(record.level()),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger::new();

/// Install the console logger
///
/// Fails if another logger is already installed.
pub fn init(console: &'static (dyn Console + Sync)) -> Result<(), SetLoggerError> {
    LOGGER.attach(console);
    log::set_logger(&LOGGER).map(|()| log::set_max_level(DEFAULT_LEVEL))
}

/// Set the maximum log level
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Enable or disable debug records
pub fn set_debug(debug: bool) {
    set_level(if debug { LevelFilter::Debug } else { DEFAULT_LEVEL });
}
