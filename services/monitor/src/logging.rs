//! Process-wide logging: console output plus one log file per local day.

use crate::config::LoggingConfig;
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing/logging subsystem.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(level, rust_log.as_deref())?;

    let log_file = DailyLogFile::new(&config.directory, &config.file_prefix)?;
    let file_layer = fmt::layer().with_writer(log_file).with_ansi(false);

    let subscriber = tracing_subscriber::registry().with(filter).with(file_layer);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// `RUST_LOG` when set replaces the configured level entirely.
fn build_filter(level: Level, rust_log: Option<&str>) -> anyhow::Result<EnvFilter> {
    match rust_log.filter(|directives| !directives.trim().is_empty()) {
        Some(directives) => Ok(EnvFilter::try_new(directives)?),
        None => Ok(EnvFilter::try_new(format!(
            "plant_monitor={},aws_config=warn,aws_smithy_runtime=warn",
            level
        ))?),
    }
}

/// Log file that rolls over to `<prefix>_<YYYYMMDD>.log` at local midnight.
pub struct DailyLogFile {
    directory: PathBuf,
    prefix: String,
    current: Mutex<OpenLog>,
}

struct OpenLog {
    date: NaiveDate,
    file: File,
}

impl DailyLogFile {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> io::Result<Self> {
        let directory = directory.into();
        let prefix = prefix.into();
        std::fs::create_dir_all(&directory)?;

        let date = Local::now().date_naive();
        let file = open_log(&log_path(&directory, &prefix, date))?;

        Ok(Self {
            directory,
            prefix,
            current: Mutex::new(OpenLog { date, file }),
        })
    }

    /// Path of the file receiving entries written on `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        log_path(&self.directory, &self.prefix, date)
    }

    fn write_on(&self, date: NaiveDate, buf: &[u8]) -> io::Result<usize> {
        let mut current = self.current.lock();
        if current.date != date {
            current.file = open_log(&self.path_for(date))?;
            current.date = date;
        }
        current.file.write(buf)
    }
}

impl Write for &DailyLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_on(Local::now().date_naive(), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.current.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for DailyLogFile {
    type Writer = &'a DailyLogFile;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

fn log_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}_{}.log", prefix, date.format("%Y%m%d")))
}

fn open_log(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
