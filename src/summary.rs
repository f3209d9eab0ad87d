//! Per-run accounting and the renderings that leave the process: the JSON
//! response body, the audit line and the debug block.

use chrono::Local;
use serde::Serialize;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 单次请求的处理结果汇总。
#[derive(Debug, Clone)]
pub struct RunSummary {
    accepted_names: Vec<String>,
    rejected: u64,
    skipped: u64,
    trace: Vec<String>,
    timestamp: String,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::with_timestamp(Local::now().format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn with_timestamp(timestamp: impl Into<String>) -> Self {
        Self {
            accepted_names: Vec::new(),
            rejected: 0,
            skipped: 0,
            trace: Vec::new(),
            timestamp: timestamp.into(),
        }
    }

    pub fn trace(&mut self, line: impl Into<String>) {
        self.trace.push(line.into());
    }

    pub fn extend_trace(&mut self, lines: impl IntoIterator<Item = String>) {
        self.trace.extend(lines);
    }

    /// Whether `name` was already accepted earlier in this run.
    pub fn has_accepted(&self, name: &str) -> bool {
        self.accepted_names.iter().any(|accepted| accepted == name)
    }

    pub fn record_accepted(&mut self, name: &str) {
        if !self.has_accepted(name) {
            self.accepted_names.push(name.to_string());
        }
    }

    pub fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn accepted_names(&self) -> &[String] {
        &self.accepted_names
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted_names.len() as u64
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped
    }

    pub fn trace_lines(&self) -> &[String] {
        &self.trace
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// `[YYYY-MM-DD HH:MM:SS] Erfolgreich: N, Abgelehnt: M`
    pub fn audit_line(&self) -> String {
        format!(
            "[{}] Erfolgreich: {}, Abgelehnt: {}\n",
            self.timestamp,
            self.accepted_count(),
            self.rejected
        )
    }

    /// Trace lines followed by a blank separator line.
    pub fn debug_block(&self) -> String {
        let mut block = self.trace_lines().join("\n");
        block.push_str("\n\n");
        block
    }

    pub fn success_response(&self) -> UploadSuccess {
        let rejected = self.rejected;
        UploadSuccess {
            success: true,
            message: format!(
                "Upload erfolgreich! - {} Datei(en) hochgeladen",
                self.accepted_count()
            ),
            rejected: (rejected > 0)
                .then(|| format!("{rejected} weitere Datei(en) wurde zum Hochladen abgelehnt!")),
        }
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

/// Response body of a run that accepted at least one file.
#[derive(Debug, Serialize)]
pub struct UploadSuccess {
    pub success: bool,
    pub message: String,
    pub rejected: Option<String>,
}

/// Response body of every failed request.
#[derive(Debug, Serialize)]
pub struct UploadFailure {
    pub success: bool,
    pub error: String,
}

impl UploadFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}
