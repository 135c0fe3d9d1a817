//! Day-rotating batched parquet recorder.
//!
//! One recorder owns one open parquet file per (instrument, data type)
//! pair. Records are buffered and handed to the arrow writer in
//! batches; the file rotates when the UTC day changes. A target path
//! that already exists is always refused so a restart never silently
//! resumes into an earlier capture.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::clock::{Clock, SystemClock};
use crate::encoding::Record;
use crate::fileutil::{build_file_name, file_exists};

/// Target size of one parquet row group.
const ROW_GROUP_SIZE: usize = 128 * 1024 * 1024;

/// Parquet data page size limit.
const DATA_PAGE_SIZE: usize = 8 * 1024;

/// Minimal sink interface the consumers and the reconciler write to.
pub trait EventSink<T> {
    fn write(&mut self, record: T) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

pub struct Recorder<R: Record> {
    instrument: String,
    batch_size: usize,
    current_date: String,
    path: PathBuf,
    out_dir: PathBuf,
    writer: Option<ArrowWriter<std::fs::File>>,
    buffer: Vec<R>,
    clock: Arc<dyn Clock>,
}

impl<R: Record> Recorder<R> {
    /// Open a recorder for `instrument` writing into `out_dir`, using
    /// the system UTC clock.
    pub fn new(out_dir: &Path, instrument: &str, batch_size: usize) -> Result<Self> {
        Self::with_clock(out_dir, instrument, batch_size, Arc::new(SystemClock))
    }

    /// Open a recorder with an injected clock. Fails if the target
    /// file for the current UTC day already exists.
    pub fn with_clock(
        out_dir: &Path,
        instrument: &str,
        batch_size: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let now = clock.now_utc();
        let path = out_dir.join(build_file_name(R::DATA_TYPE, instrument, now));
        let writer = open_writer::<R>(&path)?;
        Ok(Self {
            instrument: instrument.to_string(),
            batch_size,
            current_date: now.format("%Y-%m-%d").to_string(),
            path,
            out_dir: out_dir.to_path_buf(),
            writer: Some(writer),
            buffer: Vec::with_capacity(batch_size),
            clock,
        })
    }

    /// Path of the file currently being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records buffered but not yet handed to the writer.
    pub fn pending_records(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer one record, rotating first when the UTC day changed and
    /// flushing once the batch size is reached.
    pub fn write(&mut self, record: R) -> Result<()> {
        let now = self.clock.now_utc();
        if now.format("%Y-%m-%d").to_string() != self.current_date {
            self.rotate(now)?;
        }
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Hand every buffered record to the writer in insertion order.
    /// The buffer is kept intact when the write fails.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = R::to_batch(&self.buffer)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("{} recorder for {} is closed", R::DATA_TYPE, self.instrument))?;
        writer
            .write(&batch)
            .with_context(|| format!("write {} batch to {}", R::DATA_TYPE, self.path.display()))?;
        self.buffer.clear();
        if writer.in_progress_size() >= ROW_GROUP_SIZE {
            writer
                .flush()
                .with_context(|| format!("flush row group of {}", self.path.display()))?;
        }
        Ok(())
    }

    /// Finalize the current file and start the file for the day of
    /// `now`. Refuses an already existing target path.
    pub fn rotate(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.flush()?;
        if let Some(mut writer) = self.writer.take() {
            writer
                .finish()
                .with_context(|| format!("finalize {}", self.path.display()))?;
        }
        let path = self
            .out_dir
            .join(build_file_name(R::DATA_TYPE, &self.instrument, now));
        self.writer = Some(open_writer::<R>(&path)?);
        self.current_date = now.format("%Y-%m-%d").to_string();
        self.path = path;
        self.buffer.clear();
        Ok(())
    }

    /// Flush and finalize. The file descriptor is released even when
    /// finalization fails; the error is still surfaced.
    pub fn close(&mut self) -> Result<()> {
        let flushed = self.flush();
        let finished = match self.writer.take() {
            Some(mut writer) => writer
                .finish()
                .map(|_| ())
                .with_context(|| format!("finalize {}", self.path.display())),
            None => Ok(()),
        };
        flushed?;
        finished
    }
}

impl<R: Record> EventSink<R> for Recorder<R> {
    fn write(&mut self, record: R) -> Result<()> {
        Recorder::write(self, record)
    }

    fn close(&mut self) -> Result<()> {
        Recorder::close(self)
    }
}

fn open_writer<R: Record>(path: &Path) -> Result<ArrowWriter<std::fs::File>> {
    if file_exists(path) {
        bail!(
            "file {} already exists, not resuming recording",
            path.display()
        );
    }
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("create {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_data_page_size_limit(DATA_PAGE_SIZE)
        .set_dictionary_enabled(true)
        .build();
    ArrowWriter::try_new(file, R::schema(), Some(props))
        .with_context(|| format!("open parquet writer for {}", path.display()))
}
