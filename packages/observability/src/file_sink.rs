//! Daily JSONL file sink.
//!
//! Appends to `<dir>/<service>-<YYYY-MM-DD>.jsonl` and rolls over to a new
//! file at UTC midnight. Every write is flushed, so several processes can
//! append to the same file and a `tail -f` sees whole lines.

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

struct OpenFile {
    date: NaiveDate,
    writer: BufWriter<File>,
}

/// Cloneable handle to the current day's log file.
#[derive(Clone)]
pub struct DailyLogWriter {
    dir: PathBuf,
    prefix: String,
    current: Arc<Mutex<OpenFile>>,
}

impl DailyLogWriter {
    /// Create the directory if needed and open today's file.
    pub fn new(dir: &Path, prefix: &str) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let date = Utc::now().date_naive();
        let writer = open_for(dir, prefix, date)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            current: Arc::new(Mutex::new(OpenFile { date, writer })),
        })
    }

    /// Path of the file written for `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        file_path(&self.dir, &self.prefix, date)
    }

    fn write_dated(&self, buf: &[u8], today: NaiveDate) -> io::Result<usize> {
        let mut current = self.current.lock();
        if current.date != today {
            current.writer.flush()?;
            current.writer = open_for(&self.dir, &self.prefix, today)?;
            current.date = today;
        }
        let written = current.writer.write(buf)?;
        current.writer.flush()?;
        Ok(written)
    }
}

fn file_path(dir: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    dir.join(format!("{prefix}-{}.jsonl", date.format("%Y-%m-%d")))
}

fn open_for(dir: &Path, prefix: &str, date: NaiveDate) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_path(dir, prefix, date))?;
    Ok(BufWriter::with_capacity(8192, file))
}

impl Write for DailyLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_dated(buf, Utc::now().date_naive())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.current.lock().writer.flush()
    }
}

impl<'a> MakeWriter<'a> for DailyLogWriter {
    type Writer = DailyLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
