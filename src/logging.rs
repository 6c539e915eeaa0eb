use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only log file. The file is opened and closed for every line so
/// several processes can share it and nothing holds a handle between events.
pub struct FileLog {
    path: Mutex<Option<PathBuf>>,
    echo: bool,
}

static LOGGER: OnceCell<FileLog> = OnceCell::new();

/// Installs the process-wide logger writing to `path`. Calling it again
/// only retargets the file.
pub fn init(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut installed = false;
    let logger = LOGGER.get_or_init(|| {
        installed = true;
        FileLog {
            path: Mutex::new(None),
            echo: !cfg!(test),
        }
    });
    logger.set_path(path);
    if installed {
        log::set_logger(logger).map_err(|e| anyhow::anyhow!("installing logger: {e}"))?;
        log::set_max_level(LevelFilter::Info);
    }
    Ok(())
}

pub fn format_line(at: NaiveDateTime, message: &str) -> String {
    format!("{} - {}\n", at.format("%Y-%m-%d %H:%M:%S"), message)
}

impl FileLog {
    fn set_path(&self, path: &Path) {
        if let Ok(mut p) = self.path.lock() {
            *p = Some(path.to_path_buf());
        }
    }

    fn current_path(&self) -> Option<PathBuf> {
        self.path.lock().ok()?.clone()
    }

    pub fn append(path: &Path, message: &str) -> std::io::Result<()> {
        let line = format_line(Local::now().naive_local(), message);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())
    }
}

impl Log for FileLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = record.args().to_string();
        if self.echo {
            eprintln!("[{}] {}", record.level().as_str().to_ascii_lowercase(), message);
        }
        let Some(path) = self.current_path() else { return };
        let _ = Self::append(&path, &message);
    }

    fn flush(&self) {}
}

/// Installs the logger once for the whole test binary, writing to a
/// temporary file shared by every test that checks logged lines.
#[cfg(test)]
pub fn test_log() -> &'static Path {
    static LOG: OnceCell<(tempfile::TempDir, PathBuf)> = OnceCell::new();
    let (_, path) = LOG.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("error.log");
        init(&path).unwrap();
        (dir, path)
    });
    path
}
