use std::io::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Stderr logger with one line per record, colored when stderr is a tty.
///
/// The maximum level comes from the `-l` flag; trace output includes the
/// emitting target so parser and tray noise can be told apart.
struct StderrLogger {
    color: bool,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let (label, color) = match record.level() {
            Level::Error => ("error", "\x1b[1;31m"),
            Level::Warn => ("warn", "\x1b[33m"),
            Level::Info => ("info", "\x1b[32m"),
            Level::Debug => ("debug", "\x1b[36m"),
            Level::Trace => ("trace", "\x1b[2m"),
        };
        let mut err = std::io::stderr();
        let _ = if self.color {
            writeln!(
                err,
                "{color}{label}\x1b[0m: [{}] {}",
                record.target(),
                record.args()
            )
        } else {
            writeln!(err, "{label}: [{}] {}", record.target(), record.args())
        };
    }

    fn flush(&self) {}
}

pub(crate) fn init(level: LevelFilter) {
    let color = nix::unistd::isatty(2).unwrap_or(false);
    // Failure means a logger is already installed, which only happens when
    // init is called twice
    let _ = log::set_boxed_logger(Box::new(StderrLogger { color }));
    log::set_max_level(level);
}
