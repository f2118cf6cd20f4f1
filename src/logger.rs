use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use log::{LevelFilter, Metadata, Record};

struct SimpleLogger {
    level: LevelFilter,
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        // sqlx statement logging is noise at info
        if metadata.target().starts_with("sqlx") {
            return metadata.level() <= LevelFilter::Warn.min(self.level);
        }
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{} - {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Installs the logger behind `progress` so log lines print above any bar.
pub fn init(level: LevelFilter, progress: MultiProgress) -> Result<(), log::SetLoggerError> {
    LogWrapper::new(progress, SimpleLogger { level })
        .try_init()
        .map(|()| log::set_max_level(level))
}
