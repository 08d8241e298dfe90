//! Line sinks. The runner writes each completed output line once to a
//! fan-out of sinks, so adding another consumer (a new log file, a channel)
//! never touches the runner itself.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Receives one completed output line at a time. Implementations must keep
/// writes line-atomic; lines from concurrent stages interleave but never
/// tear.
pub trait LineSink: Send + Sync {
    fn write_line(&self, label: &str, line: &str);
}

/// Stamp a line the way every sink renders it: `YYYY-MM-DD HH:MM:SS [label] `.
pub fn format_line(label: &str, line: &str) -> String {
    format!(
        "{} [{}] {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        label,
        line
    )
}

/// Append-only per-job log file, shared by every stage of the job.
pub struct JobLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JobLog {
    /// Open (creating parents as needed) the log file in append mode.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LineSink for JobLog {
    fn write_line(&self, label: &str, line: &str) {
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{}", format_line(label, line)) {
            tracing::debug!("job log write failed: {e}");
        }
    }
}

/// Best-effort tee to the controlling terminal.
pub struct TerminalSink;

impl LineSink for TerminalSink {
    fn write_line(&self, label: &str, line: &str) {
        eprintln!("{}", format_line(label, line));
    }
}

/// Fan-out over any number of sinks.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn LineSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: std::sync::Arc<dyn LineSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl LineSink for FanoutSink {
    fn write_line(&self, label: &str, line: &str) {
        for sink in &self.sinks {
            sink.write_line(label, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{format_line, JobLog, LineSink};
    use tempfile::TempDir;

    #[test]
    fn format_line_has_timestamp_prefix_and_label() {
        let line = format_line("planner", "thinking");
        // "YYYY-MM-DD HH:MM:SS " is 20 chars
        assert_eq!(&line[4..5], "-");
        assert_eq!(&line[10..11], " ");
        assert!(line[20..].starts_with("[planner] thinking"));
    }

    #[test]
    fn job_log_appends_newline_terminated_lines() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("jobs").join("orchestrator.log");

        let log = JobLog::open(&path).expect("open");
        log.write_line("merge", "first");
        log.write_line("merge", "second");

        let content = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(content.ends_with('\n'));
        assert!(lines[0].contains("[merge] first"));
        assert!(lines[1].contains("[merge] second"));
    }
}
