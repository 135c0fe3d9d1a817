//! Append-only operational journal.
//!
//! Every non-trivial pipeline event (gaps, drops, recorder errors,
//! shutdown) is appended to `journal.txt` in the working directory,
//! one timestamped line per entry. The writer sits behind a mutex so
//! concurrent tasks never interleave within a line.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::sync::Mutex;

/// Journal file created in the working directory.
pub const JOURNAL_FILE: &str = "journal.txt";

/// Setting this env var to "1" routes the journal to stdout and skips
/// file creation. Test affordance, not a production interface.
pub const JOURNAL_STDOUT_ENV: &str = "JOURNAL_STDOUT";

/// Format one journal entry: `[YYYY-MM-DD HH:MM:SS] LEVEL: message`.
pub fn format_entry(level: &str, message: &str, ts: DateTime<Utc>) -> String {
    format!("[{}] {}: {}", ts.format("%Y-%m-%d %H:%M:%S"), level, message)
}

pub struct Journal {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl Journal {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Open the default journal: `journal.txt` in append mode, or
    /// stdout when [`JOURNAL_STDOUT_ENV`] is set.
    pub fn open_default() -> Result<Self> {
        if std::env::var(JOURNAL_STDOUT_ENV).as_deref() == Ok("1") {
            return Ok(Self::new(Box::new(io::stdout())));
        }
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(JOURNAL_FILE)
            .with_context(|| format!("open {JOURNAL_FILE}"))?;
        Ok(Self::new(Box::new(file)))
    }

    pub fn log(&self, level: &str, message: &str) -> io::Result<()> {
        let mut line = format_entry(level, message, Utc::now());
        line.push('\n');
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(line.as_bytes())?;
        writer.flush()
    }

    pub fn info(&self, message: &str) -> io::Result<()> {
        self.log("INFO", message)
    }

    pub fn error(&self, message: &str) -> io::Result<()> {
        self.log("ERROR", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    /// Shared in-memory writer so tests can inspect what was written.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn entry_format_is_stable() {
        let ts = Utc.with_ymd_and_hms(2023, 10, 15, 12, 34, 56).unwrap();
        assert_eq!(
            format_entry("INFO", "snapshot received", ts),
            "[2023-10-15 12:34:56] INFO: snapshot received"
        );
        assert_eq!(
            format_entry("ERROR", "gap detected", ts),
            "[2023-10-15 12:34:56] ERROR: gap detected"
        );
    }

    #[test]
    fn concurrent_writers_produce_whole_lines() {
        const WRITERS: usize = 8;
        const MESSAGES: usize = 50;

        let buf = SharedBuf::default();
        let journal = Arc::new(Journal::new(Box::new(buf.clone())));

        let handles: Vec<_> = (0..WRITERS)
            .map(|w| {
                let journal = journal.clone();
                std::thread::spawn(move || {
                    for m in 0..MESSAGES {
                        journal.info(&format!("writer-{w}-msg-{m}")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let written = buf.0.lock().unwrap();
        let text = std::str::from_utf8(&written).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), WRITERS * MESSAGES);

        let mut seen: Vec<String> = Vec::new();
        for line in lines {
            assert!(line.starts_with('['), "malformed line: {line}");
            let (_, rest) = line.split_once("] INFO: ").expect("well-formed line");
            seen.push(rest.to_string());
        }
        seen.sort();
        let mut expected: Vec<String> = (0..WRITERS)
            .flat_map(|w| (0..MESSAGES).map(move |m| format!("writer-{w}-msg-{m}")))
            .collect();
        expected.sort();
        assert_eq!(seen, expected);
    }
}
