//! Per-entry audit trail of a run.

use crate::error::Result;
use crate::stats::ProcessStats;
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

/// File field of the final row.
pub const SUMMARY_MARKER: &str = "__SUMMARY__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Changed,
    Unchanged,
    /// A rule or parse failure. The entry itself was still written.
    Error,
    /// The entry could not be processed and is missing from the output.
    Fatal,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditStatus::Changed => "changed",
            AuditStatus::Unchanged => "unchanged",
            AuditStatus::Error => "error",
            AuditStatus::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    pub file: String,
    pub status: AuditStatus,
    pub details: String,
}

impl AuditRow {
    pub fn new<F: Into<String>, D: Into<String>>(file: F, status: AuditStatus, details: D) -> Self {
        AuditRow {
            file: file.into(),
            status,
            details: details.into(),
        }
    }
}

/// Receives the audit rows of a run, then its summary exactly once.
pub trait AuditSink {
    fn record(&mut self, row: AuditRow) -> Result<()>;

    fn summary(&mut self, stats: &ProcessStats, elapsed: Duration) -> Result<()>;
}

/// Discards everything.
impl AuditSink for () {
    fn record(&mut self, _row: AuditRow) -> Result<()> {
        Ok(())
    }

    fn summary(&mut self, _stats: &ProcessStats, _elapsed: Duration) -> Result<()> {
        Ok(())
    }
}

impl<S: AuditSink + ?Sized> AuditSink for &mut S {
    fn record(&mut self, row: AuditRow) -> Result<()> {
        (**self).record(row)
    }

    fn summary(&mut self, stats: &ProcessStats, elapsed: Duration) -> Result<()> {
        (**self).summary(stats, elapsed)
    }
}

/// Keeps rows in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLog {
    pub rows: Vec<AuditRow>,
    pub summary: Option<(ProcessStats, Duration)>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows_with_status(&self, status: AuditStatus) -> impl Iterator<Item = &AuditRow> + '_ {
        self.rows.iter().filter(move |row| row.status == status)
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&mut self, row: AuditRow) -> Result<()> {
        self.rows.push(row);
        Ok(())
    }

    fn summary(&mut self, stats: &ProcessStats, elapsed: Duration) -> Result<()> {
        self.summary = Some((*stats, elapsed));
        Ok(())
    }
}

/// Semicolon separated audit log.
///
/// ```text
/// file;status;details
/// a.xml;changed;applied=1
/// __SUMMARY__;{"total_files":1,...};0.01s
/// ```
pub struct CsvAuditLog<W: Write> {
    writer: W,
}

impl CsvAuditLog<BufWriter<File>> {
    /// Creates (or truncates) the log file at `path` and writes the header.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        CsvAuditLog::new(BufWriter::new(file))
    }
}

impl<W: Write> CsvAuditLog<W> {
    pub fn new(writer: W) -> Result<Self> {
        let mut log = CsvAuditLog { writer };
        log.write_row(&["file", "status", "details"])?;
        Ok(log)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_row(&mut self, fields: &[&str]) -> Result<()> {
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.writer.write_all(b";")?;
            }
            self.writer.write_all(quote(field).as_bytes())?;
        }
        self.writer.write_all(b"\r\n")?;
        Ok(())
    }
}

impl<W: Write> AuditSink for CsvAuditLog<W> {
    fn record(&mut self, row: AuditRow) -> Result<()> {
        let status = row.status.to_string();
        self.write_row(&[&row.file, &status, &row.details])
    }

    fn summary(&mut self, stats: &ProcessStats, elapsed: Duration) -> Result<()> {
        let stats = serde_json::to_string(stats)?;
        let elapsed = format!("{:.2}s", elapsed.as_secs_f64());
        self.write_row(&[SUMMARY_MARKER, &stats, &elapsed])?;
        self.writer.flush()?;
        Ok(())
    }
}

fn quote(field: &str) -> Cow<'_, str> {
    if field.contains(|c| matches!(c, ';' | '"' | '\r' | '\n')) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
