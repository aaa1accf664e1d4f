//! Per-run journal files in the collection's log directory.
//!
//! Lines are staged in a scratch directory under `tmp_dir` while the run
//! is in progress and appended to `log_dir` by [`Journal::finish`], which
//! callers invoke on both success and failure. The scratch directory is
//! removed when the journal is dropped, so an aborted run never leaves
//! state behind that would block the next attempt.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::TempDir;

use ferry_types::entry::TransformedRecord;
use ferry_types::envelope::{ErrorRecord, Timestamp};
use ferry_types::state::MigrationStateEntry;

pub const STATE_LOG: &str = "state.jsonl";
pub const ERROR_LOG: &str = "errors.jsonl";
pub const PREVIEW_LOG: &str = "preview.jsonl";
pub const UNMAPPED_REPORT: &str = "unmapped.json";

#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<i64>,
    at: Timestamp,
    #[serde(flatten)]
    record: &'a T,
}

struct Staged {
    name: &'static str,
    writer: BufWriter<File>,
    lines: u64,
    /// Create the log file on finish even when no line was written.
    always: bool,
}

impl Staged {
    fn create(dir: &Path, name: &'static str, always: bool) -> Result<Self> {
        let path = dir.join(name);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create journal file {}", path.display()))?;
        Ok(Self {
            name,
            writer: BufWriter::new(file),
            lines: 0,
            always,
        })
    }

    fn write<T: Serialize>(&mut self, run_id: Option<i64>, record: &T) -> Result<()> {
        let line = Line {
            run_id,
            at: Timestamp::now(),
            record,
        };
        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }
}

/// Counts of lines flushed to the log directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalSummary {
    pub state_lines: u64,
    pub error_lines: u64,
    pub preview_lines: u64,
    pub log_dir: PathBuf,
}

pub struct Journal {
    run_id: Option<i64>,
    scratch: TempDir,
    log_dir: PathBuf,
    state: Staged,
    errors: Staged,
    preview: Staged,
}

impl Journal {
    /// Create the scratch directory inside `tmp_dir` and open staging files.
    ///
    /// # Errors
    ///
    /// Fails when either directory cannot be created.
    pub fn create(tmp_dir: &Path, log_dir: &Path, run_id: Option<i64>) -> Result<Self> {
        fs::create_dir_all(tmp_dir)
            .with_context(|| format!("Failed to create tmp_dir {}", tmp_dir.display()))?;
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log_dir {}", log_dir.display()))?;
        let scratch = tempfile::Builder::new()
            .prefix("ferry-")
            .tempdir_in(tmp_dir)
            .with_context(|| format!("Failed to create scratch dir in {}", tmp_dir.display()))?;

        Ok(Self {
            run_id,
            state: Staged::create(scratch.path(), STATE_LOG, true)?,
            errors: Staged::create(scratch.path(), ERROR_LOG, true)?,
            preview: Staged::create(scratch.path(), PREVIEW_LOG, false)?,
            scratch,
            log_dir: log_dir.to_path_buf(),
        })
    }

    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// # Errors
    ///
    /// Fails on write errors in the scratch directory.
    pub fn record_entry(&mut self, entry: &MigrationStateEntry) -> Result<()> {
        self.state.write(self.run_id, entry)
    }

    /// # Errors
    ///
    /// Fails on write errors in the scratch directory.
    pub fn record_error(&mut self, record: &ErrorRecord) -> Result<()> {
        self.errors.write(self.run_id, record)
    }

    /// Transformed output of a dry run.
    ///
    /// # Errors
    ///
    /// Fails on write errors in the scratch directory.
    pub fn record_preview(&mut self, record: &TransformedRecord) -> Result<()> {
        self.preview.write(self.run_id, record)
    }

    /// Append the staged lines to `log_dir` and write the unmapped-field
    /// report. The state and error logs always exist afterwards; an empty
    /// preview leaves the log directory untouched.
    ///
    /// # Errors
    ///
    /// Fails when the log directory cannot be written. The scratch directory
    /// is removed either way.
    pub fn finish(mut self, unmapped: &BTreeMap<String, u64>) -> Result<JournalSummary> {
        for staged in [&mut self.state, &mut self.errors, &mut self.preview] {
            staged
                .writer
                .flush()
                .with_context(|| format!("Failed to flush {}", staged.name))?;
            if staged.lines > 0 || staged.always {
                append_file(&self.scratch.path().join(staged.name), &self.log_dir.join(staged.name))?;
            }
        }

        let report = self.log_dir.join(UNMAPPED_REPORT);
        let json = serde_json::to_vec_pretty(unmapped)?;
        fs::write(&report, json)
            .with_context(|| format!("Failed to write {}", report.display()))?;

        tracing::debug!(
            log_dir = %self.log_dir.display(),
            state_lines = self.state.lines,
            error_lines = self.errors.lines,
            "Flushed run journal"
        );

        Ok(JournalSummary {
            state_lines: self.state.lines,
            error_lines: self.errors.lines,
            preview_lines: self.preview.lines,
            log_dir: self.log_dir,
        })
    }
}

fn append_file(from: &Path, to: &Path) -> Result<()> {
    let mut src = File::open(from).with_context(|| format!("Failed to open {}", from.display()))?;
    let mut dst = OpenOptions::new()
        .create(true)
        .append(true)
        .open(to)
        .with_context(|| format!("Failed to open {}", to.display()))?;
    io::copy(&mut src, &mut dst).with_context(|| format!("Failed to append to {}", to.display()))?;
    Ok(())
}
