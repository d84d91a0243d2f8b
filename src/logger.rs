use std::io::{IsTerminal, Write};

use log::{Level, LevelFilter, Metadata, Record};

/// Writes level-prefixed lines to stderr, coloured when stderr is a terminal.
pub struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let prefix = if std::io::stderr().is_terminal() {
            match record.level() {
                Level::Error => "\x1b[91;1mERROR\x1b[0m",
                Level::Warn => "\x1b[93;1mWARN \x1b[0m",
                Level::Info => "\x1b[1mINFO \x1b[0m",
                Level::Debug => "\x1b[1;96mDEBUG\x1b[0m",
                Level::Trace => "\x1b[96mTRACE\x1b[0m",
            }
        } else {
            match record.level() {
                Level::Error => "ERROR",
                Level::Warn => "WARN ",
                Level::Info => "INFO ",
                Level::Debug => "DEBUG",
                Level::Trace => "TRACE",
            }
        };

        let _ = writeln!(
            std::io::stderr().lock(),
            "{} [{}] {}",
            record.module_path().unwrap_or(""),
            prefix,
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: StderrLogger = StderrLogger;

/// Installs the stderr logger. Later calls only change the level.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Raises `base` one step per `-v`.
pub fn bump(base: LevelFilter, verbose: u8) -> LevelFilter {
    let levels = [
        LevelFilter::Off,
        LevelFilter::Error,
        LevelFilter::Warn,
        LevelFilter::Info,
        LevelFilter::Debug,
        LevelFilter::Trace,
    ];
    let at = levels.iter().position(|&l| l == base).unwrap_or(2);
    levels[(at + verbose as usize).min(levels.len() - 1)]
}
