use log::{Level, LevelFilter, Log, Metadata, Record, set_logger, set_max_level};
use std::{io::Write, sync::Once};

pub struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // Red
            Level::Warn => 93,  // BrightYellow
            Level::Info => 20,  // White
            Level::Debug => 32, // Green
            Level::Trace => 90, // BrightBlack
        };
        // A closed stderr is not worth failing a device operation over.
        let _ = writeln!(
            std::io::stderr().lock(),
            "\u{1B}[{}m[{:}] {}: {}\u{1B}[0m",
            color,
            record.level(),
            record.target(),
            record.args(),
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install [Logger] as the global logger at debug level.
///
/// Safe to call more than once. If the host application already installed a different logger,
/// that one stays in place.
pub fn init() {
    init_with_level(LevelFilter::Debug);
}

pub fn init_with_level(level: LevelFilter) {
    static LOGGER: Logger = Logger;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if set_logger(&LOGGER).is_ok() {
            set_max_level(level);
        }
    });
}

/// Improved debug macro,
/// only compiled in debug mode.
#[macro_export]
macro_rules! debug_ex {
    // debug_ex!(target: "my_target", "a {} event", "log")
    (target: $target:expr, $($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            use log::{log,Level};
            log!(target: $target, Level::Debug, $($arg)+)
        }
    };

    // debug_ex!("a {} event", "log")
    ($($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            use log::{log,Level};
            log!(Level::Debug, $($arg)+)
        }
    }
}
