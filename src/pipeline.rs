//! Per-file decision core and the run that drives it.
//!
//! Every entry walks the same ordered rule list; the first rule that fires is
//! final for that entry. Per-file problems never abort the run: they end up as
//! counted outcomes and trace lines. Only a wrong request method and a run
//! without a single accepted file fail the request as a whole.

use axum::http::Method;
use std::fmt;
use tokio::fs;
use tracing::{debug, info};

use crate::analyzer::{file_entries, structure_trace};
use crate::config::{UploadLimits, UploadSettings};
use crate::field::{FileEntry, UploadErrorCode, UploadField};
use crate::sanitize::{file_extension, normalize_filename};
use crate::sniff::is_executable_file;
use crate::storage::UploadDir;
use crate::summary::RunSummary;

/// Why an entry was skipped. Skips are not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyName,
    AlreadyUploaded,
}

/// Why an entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NoFile,
    UploadError(UploadErrorCode),
    MissingTempFile,
    ExtensionNotAllowed(String),
    Executable,
    MoveFailed,
}

/// Final decision for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted(String),
    Rejected(RejectReason),
    Skipped(SkipReason),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EmptyName => f.write_str("empty filename"),
            SkipReason::AlreadyUploaded => f.write_str("already uploaded this run"),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NoFile => write!(
                f,
                "Upload error: {} (no file was sent)",
                UploadErrorCode::NoFile.message()
            ),
            RejectReason::UploadError(code) => {
                write!(f, "Upload error: {} (code {code})", code.message())
            }
            RejectReason::MissingTempFile => f.write_str("temporary file does not exist"),
            RejectReason::ExtensionNotAllowed(ext) => {
                write!(f, "extension not allowed: '{ext}'")
            }
            RejectReason::Executable => f.write_str("file is executable"),
            RejectReason::MoveFailed => f.write_str("move failed"),
        }
    }
}

/// Request data the run may look at. Nothing else from the HTTP layer
/// reaches the pipeline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub limits: UploadLimits,
}

/// Request-level failure, reported with status 400.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunFailure {
    InvalidMethod,
    NothingAccepted,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::InvalidMethod => f.write_str("Ungültige Anfragemethode"),
            RunFailure::NothingAccepted => f.write_str("No allowed files found in upload data"),
        }
    }
}

/// Result of one run: the accounting plus an optional request-level failure.
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub failure: Option<RunFailure>,
}

/// 逐文件校验并提交上传文件。
pub struct FileProcessor<'a> {
    settings: &'a UploadSettings,
    storage: &'a UploadDir,
    summary: RunSummary,
}

impl<'a> FileProcessor<'a> {
    pub fn new(settings: &'a UploadSettings, storage: &'a UploadDir, summary: RunSummary) -> Self {
        Self {
            settings,
            storage,
            summary,
        }
    }

    pub fn into_summary(self) -> RunSummary {
        self.summary
    }

    /// Decides and, on acceptance, commits a single entry.
    pub async fn process(&mut self, entry: &FileEntry) -> UploadOutcome {
        self.summary.trace(format!(
            "Processing field[{}][{}]: '{}'",
            entry.field_index, entry.file_index, entry.original_name
        ));
        let outcome = self.decide(entry).await;
        match &outcome {
            UploadOutcome::Accepted(name) => {
                self.summary.record_accepted(name);
            }
            UploadOutcome::Rejected(reason) => {
                self.summary.trace(format!("  Rejected - {reason}"));
                self.summary.record_rejected();
            }
            UploadOutcome::Skipped(reason) => {
                self.summary.trace(format!("  Skipped - {reason}"));
                self.summary.record_skipped();
            }
        }
        debug!(
            field = entry.field_index,
            index = entry.file_index,
            name = entry.original_name,
            outcome = ?outcome,
            "upload entry processed"
        );
        outcome
    }

    async fn decide(&mut self, entry: &FileEntry) -> UploadOutcome {
        let name = entry.original_name.as_str();
        if name.is_empty() {
            return UploadOutcome::Skipped(SkipReason::EmptyName);
        }

        self.summary.trace(format!(
            "  Temp: {}, Error: {}",
            entry.temp_path.display(),
            entry.error
        ));

        if self.summary.has_accepted(name) {
            return UploadOutcome::Skipped(SkipReason::AlreadyUploaded);
        }
        match entry.error {
            UploadErrorCode::Ok => {}
            UploadErrorCode::NoFile => return UploadOutcome::Rejected(RejectReason::NoFile),
            code => return UploadOutcome::Rejected(RejectReason::UploadError(code)),
        }
        if entry.temp_path.as_os_str().is_empty()
            || !fs::try_exists(&entry.temp_path).await.unwrap_or(false)
        {
            return UploadOutcome::Rejected(RejectReason::MissingTempFile);
        }

        let cleaned = normalize_filename(name);
        let extension = file_extension(&cleaned);
        if !self.settings.is_extension_allowed(&extension) {
            return UploadOutcome::Rejected(RejectReason::ExtensionNotAllowed(extension));
        }
        if is_executable_file(&entry.temp_path).await {
            return UploadOutcome::Rejected(RejectReason::Executable);
        }

        match self.storage.commit(&entry.temp_path, &cleaned).await {
            Ok(target) => {
                self.summary
                    .trace(format!("  Successfully uploaded to: '{}'", target.display()));
                UploadOutcome::Accepted(name.to_string())
            }
            Err(err) => {
                debug!(name, error = ?err, "commit failed");
                UploadOutcome::Rejected(RejectReason::MoveFailed)
            }
        }
    }
}

/// Runs the whole pipeline for one request.
///
/// The trace always contains the structural analysis; in debug mode it is
/// preceded by a header and the server information block. Files are only
/// touched for `POST` requests.
pub async fn run_upload(
    ctx: &RequestContext,
    settings: &UploadSettings,
    storage: &UploadDir,
    field: &UploadField,
) -> RunReport {
    let mut summary = RunSummary::new();
    if settings.debug {
        summary.extend_trace(debug_header(summary.timestamp(), field));
        summary.extend_trace(server_info(ctx, field));
    }
    summary.extend_trace(structure_trace(field));

    if ctx.method != Method::POST {
        info!(method = %ctx.method, "upload rejected: invalid method");
        return RunReport {
            summary,
            failure: Some(RunFailure::InvalidMethod),
        };
    }

    summary.trace("=== PROCESSING UPLOAD FILES ===");
    let mut processor = FileProcessor::new(settings, storage, summary);
    for entry in file_entries(field) {
        processor.process(&entry).await;
    }
    let summary = processor.into_summary();

    info!(
        files = field.file_count(),
        accepted = summary.accepted_count(),
        names = ?summary.accepted_names(),
        rejected = summary.rejected_count(),
        skipped = summary.skipped_count(),
        "upload run finished"
    );
    let failure = (summary.accepted_count() == 0).then_some(RunFailure::NothingAccepted);
    RunReport { summary, failure }
}

fn debug_header(timestamp: &str, field: &UploadField) -> Vec<String> {
    vec![
        "=== UPLOAD DEBUG LOG ===".to_string(),
        format!("Timestamp: {timestamp}"),
        "=== COMPLETE UPLOAD FIELD ===".to_string(),
        format!("{field:#?}"),
    ]
}

fn server_info(ctx: &RequestContext, field: &UploadField) -> Vec<String> {
    let mut lines = vec![
        "=== SERVER INFORMATION ===".to_string(),
        format!("REQUEST_METHOD: {}", ctx.method),
        format!("max_file_uploads: {}", ctx.limits.max_file_uploads),
        format!("post_max_size: {}", ctx.limits.post_max_size),
        format!("upload_max_filesize: {}", ctx.limits.upload_max_filesize),
    ];
    if !field.is_empty() {
        let megabytes = field.total_size() as f64 / 1024.0 / 1024.0;
        lines.push(format!("actual upload size: {megabytes:.2} MB"));
    }
    lines.push(String::new());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_extension_list;
    use crate::field::{RawFile, SlotTarget};
    use std::path::{Path, PathBuf};
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _temp: TempDir,
        spool: PathBuf,
        settings: UploadSettings,
        storage: UploadDir,
    }

    fn fixture() -> Fixture {
        let temp = tempdir().expect("tempdir");
        let spool = temp.path().join("spool");
        let upload_dir = temp.path().join("files");
        std::fs::create_dir_all(&spool).expect("create spool");
        std::fs::create_dir_all(&upload_dir).expect("create upload dir");
        let settings = UploadSettings {
            upload_dir: upload_dir.clone(),
            log_file: temp.path().join("log.txt"),
            debug_log_file: temp.path().join("debug_log.txt"),
            allowed_extensions: parse_extension_list("txt,pdf"),
            debug: false,
            field_name: "field".into(),
            spool_dir: spool.clone(),
        };
        Fixture {
            _temp: temp,
            spool,
            storage: UploadDir::new(upload_dir),
            settings,
        }
    }

    fn post() -> RequestContext {
        RequestContext {
            method: Method::POST,
            limits: UploadLimits::default(),
        }
    }

    fn spooled(spool: &Path, name: &str, content: &[u8]) -> RawFile {
        let tmp_name = spool.join(format!("upload-{}", uuid::Uuid::new_v4()));
        std::fs::write(&tmp_name, content).expect("write spool file");
        RawFile {
            name: name.to_string(),
            mime_type: "application/octet-stream".to_string(),
            tmp_name,
            error: UploadErrorCode::Ok,
            size: content.len() as u64,
        }
    }

    fn field_of(files: Vec<RawFile>) -> UploadField {
        let mut field = UploadField::new();
        for file in files {
            field.insert(SlotTarget::Nested("0".into()), file);
        }
        field
    }

    async fn outcomes(fx: &Fixture, field: &UploadField) -> (Vec<UploadOutcome>, RunSummary) {
        let mut processor = FileProcessor::new(
            &fx.settings,
            &fx.storage,
            RunSummary::with_timestamp("2024-05-01 10:00:00"),
        );
        let mut outcomes = Vec::new();
        for entry in file_entries(field) {
            outcomes.push(processor.process(&entry).await);
        }
        (outcomes, processor.into_summary())
    }

    #[tokio::test]
    async fn mixed_batch_counts_one_of_each() {
        let fx = fixture();
        let field = field_of(vec![
            RawFile::failed("", "", UploadErrorCode::NoFile),
            spooled(&fx.spool, "tool.exe", b"plain"),
            spooled(&fx.spool, "notes.txt", b"hello"),
        ]);

        let report = run_upload(&post(), &fx.settings, &fx.storage, &field).await;

        assert_eq!(report.failure, None);
        assert_eq!(report.summary.accepted_count(), 1);
        assert_eq!(report.summary.rejected_count(), 1);
        assert_eq!(report.summary.skipped_count(), 1);
        let body = report.summary.success_response();
        assert_eq!(body.message, "Upload erfolgreich! - 1 Datei(en) hochgeladen");
        assert_eq!(
            body.rejected.as_deref(),
            Some("1 weitere Datei(en) wurde zum Hochladen abgelehnt!")
        );
        assert_eq!(
            std::fs::read(fx.settings.upload_dir.join("notes.txt")).expect("read"),
            b"hello"
        );
    }

    #[tokio::test]
    async fn duplicate_name_is_skipped_once_accepted() {
        let fx = fixture();
        let field = field_of(vec![
            spooled(&fx.spool, "same.txt", b"first"),
            spooled(&fx.spool, "same.txt", b"second"),
        ]);

        let (outcomes, summary) = outcomes(&fx, &field).await;

        assert_eq!(
            outcomes,
            [
                UploadOutcome::Accepted("same.txt".into()),
                UploadOutcome::Skipped(SkipReason::AlreadyUploaded),
            ]
        );
        assert_eq!(summary.accepted_count(), 1);
        assert_eq!(summary.skipped_count(), 1);
        assert_eq!(
            std::fs::read(fx.settings.upload_dir.join("same.txt")).expect("read"),
            b"first"
        );
    }

    #[tokio::test]
    async fn duplicate_check_precedes_upload_error() {
        let fx = fixture();
        let field = field_of(vec![
            spooled(&fx.spool, "same.txt", b"first"),
            RawFile::failed("same.txt", "text/plain", UploadErrorCode::Partial),
        ]);

        let (outcomes, _) = outcomes(&fx, &field).await;

        assert_eq!(
            outcomes[1],
            UploadOutcome::Skipped(SkipReason::AlreadyUploaded)
        );
    }

    #[tokio::test]
    async fn executable_content_beats_allowed_extension() {
        let fx = fixture();
        let field = field_of(vec![spooled(&fx.spool, "harmless.txt", b"\x7FELF\x02\x01")]);

        let (outcomes, _) = outcomes(&fx, &field).await;

        assert_eq!(outcomes, [UploadOutcome::Rejected(RejectReason::Executable)]);
        assert!(!fx.settings.upload_dir.join("harmless.txt").exists());
    }

    #[tokio::test]
    async fn umlaut_exe_is_normalized_then_rejected_for_extension() {
        let fx = fixture();
        let field = field_of(vec![spooled(&fx.spool, "Bär Ä.exe", b"text")]);

        let (outcomes, summary) = outcomes(&fx, &field).await;

        assert_eq!(
            outcomes,
            [UploadOutcome::Rejected(RejectReason::ExtensionNotAllowed(
                "exe".into()
            ))]
        );
        assert!(
            summary
                .trace_lines()
                .contains(&"  Rejected - extension not allowed: 'exe'".to_string())
        );
        assert_eq!(normalize_filename("Bär Ä.exe"), "Baer_Ae.exe");
    }

    #[tokio::test]
    async fn upload_errors_are_rejected_in_order() {
        let fx = fixture();
        let missing = RawFile {
            tmp_name: fx.spool.join("vanished"),
            ..RawFile::failed("gone.txt", "text/plain", UploadErrorCode::Ok)
        };
        let field = field_of(vec![
            RawFile::failed("none.txt", "", UploadErrorCode::NoFile),
            RawFile::failed("big.txt", "text/plain", UploadErrorCode::IniSize),
            RawFile::failed("odd.txt", "text/plain", UploadErrorCode::CantWrite),
            missing,
        ]);

        let (outcomes, summary) = outcomes(&fx, &field).await;

        assert_eq!(
            outcomes,
            [
                UploadOutcome::Rejected(RejectReason::NoFile),
                UploadOutcome::Rejected(RejectReason::UploadError(UploadErrorCode::IniSize)),
                UploadOutcome::Rejected(RejectReason::UploadError(UploadErrorCode::CantWrite)),
                UploadOutcome::Rejected(RejectReason::MissingTempFile),
            ]
        );
        assert_eq!(summary.rejected_count(), 4);
        assert!(summary.trace_lines().contains(
            &"  Rejected - Upload error: Fehler beim Schreiben der Datei auf die Festplatte (code 7)"
                .to_string()
        ));
    }

    #[tokio::test]
    async fn missing_temp_file_precedes_extension_check() {
        let fx = fixture();
        let missing = RawFile {
            tmp_name: fx.spool.join("vanished"),
            ..RawFile::failed("x.exe", "application/octet-stream", UploadErrorCode::Ok)
        };
        let field = field_of(vec![missing]);

        let (outcomes, _) = outcomes(&fx, &field).await;

        assert_eq!(outcomes, [UploadOutcome::Rejected(RejectReason::MissingTempFile)]);
    }

    #[tokio::test]
    async fn extension_check_precedes_executable_sniffing() {
        let fx = fixture();
        let field = field_of(vec![spooled(&fx.spool, "tool.exe", b"MZ\x90\x00")]);

        let (outcomes, summary) = outcomes(&fx, &field).await;

        assert_eq!(
            outcomes,
            [UploadOutcome::Rejected(RejectReason::ExtensionNotAllowed(
                "exe".into()
            ))]
        );
        assert!(
            !summary
                .trace_lines()
                .contains(&"  Rejected - file is executable".to_string())
        );
        assert!(!fx.settings.upload_dir.join("tool.exe").exists());
    }

    #[tokio::test]
    async fn move_failure_is_a_rejection_and_later_files_continue() {
        let fx = fixture();
        std::fs::create_dir_all(fx.settings.upload_dir.join("blocked.txt")).expect("create dir");
        let field = field_of(vec![
            spooled(&fx.spool, "first.txt", b"1"),
            spooled(&fx.spool, "blocked.txt", b"2"),
            spooled(&fx.spool, "last.txt", b"3"),
        ]);

        let (outcomes, summary) = outcomes(&fx, &field).await;

        assert_eq!(outcomes[1], UploadOutcome::Rejected(RejectReason::MoveFailed));
        assert_eq!(summary.accepted_names(), ["first.txt", "last.txt"]);
        assert!(fx.settings.upload_dir.join("first.txt").is_file());
        assert!(fx.settings.upload_dir.join("last.txt").is_file());
    }

    #[tokio::test]
    async fn distinct_names_with_same_normalized_form_overwrite() {
        let fx = fixture();
        let field = field_of(vec![
            spooled(&fx.spool, "a b.txt", b"first"),
            spooled(&fx.spool, "a_b.txt", b"second"),
        ]);

        let (_, summary) = outcomes(&fx, &field).await;

        assert_eq!(summary.accepted_count(), 2);
        assert_eq!(
            std::fs::read(fx.settings.upload_dir.join("a_b.txt")).expect("read"),
            b"second"
        );
    }

    #[tokio::test]
    async fn empty_request_fails_with_nothing_accepted() {
        let fx = fixture();
        let field = field_of(vec![RawFile::failed("", "", UploadErrorCode::NoFile)]);

        let report = run_upload(&post(), &fx.settings, &fx.storage, &field).await;
        assert_eq!(report.failure, Some(RunFailure::NothingAccepted));
        assert_eq!(report.summary.accepted_count(), 0);
        assert_eq!(report.summary.skipped_count(), 1);

        let report = run_upload(&post(), &fx.settings, &fx.storage, &UploadField::new()).await;
        assert_eq!(report.failure, Some(RunFailure::NothingAccepted));
    }

    #[tokio::test]
    async fn non_post_request_touches_nothing() {
        let fx = fixture();
        let file = spooled(&fx.spool, "notes.txt", b"hello");
        let tmp_name = file.tmp_name.clone();
        let field = field_of(vec![file]);
        let ctx = RequestContext {
            method: Method::GET,
            limits: UploadLimits::default(),
        };

        let report = run_upload(&ctx, &fx.settings, &fx.storage, &field).await;

        assert_eq!(report.failure, Some(RunFailure::InvalidMethod));
        assert_eq!(report.summary.accepted_count(), 0);
        assert!(tmp_name.exists());
        assert!(!fx.settings.upload_dir.join("notes.txt").exists());
        assert_eq!(
            RunFailure::InvalidMethod.to_string(),
            "Ungültige Anfragemethode"
        );
    }

    #[tokio::test]
    async fn debug_trace_has_header_and_server_information() {
        let mut fx = fixture();
        fx.settings.debug = true;
        let field = field_of(vec![spooled(&fx.spool, "notes.txt", b"hello")]);

        let report = run_upload(&post(), &fx.settings, &fx.storage, &field).await;
        let trace = report.summary.trace_lines();

        assert_eq!(trace[0], "=== UPLOAD DEBUG LOG ===");
        assert!(trace.contains(&"=== SERVER INFORMATION ===".to_string()));
        assert!(trace.contains(&"REQUEST_METHOD: POST".to_string()));
        assert!(trace.contains(&"actual upload size: 0.00 MB".to_string()));
        assert!(trace.contains(&"=== ANALYZING FILES STRUCTURE ===".to_string()));
        assert!(trace.contains(&"Processing field[0][0]: 'notes.txt'".to_string()));
        assert!(trace.iter().any(|line| line.starts_with("  Successfully uploaded to: '")));
    }
}
