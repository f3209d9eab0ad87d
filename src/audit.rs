//! 审计日志与调试日志的追加写入。

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::config::{DEFAULT_LOG_LOCK_TIMEOUT_SECS, UploadSettings};
use crate::locking::LockManager;
use crate::summary::RunSummary;

/// Appends per-request records to the audit log and, in debug mode, the
/// debug log.
#[derive(Debug, Clone)]
pub struct LogSink {
    locks: Arc<LockManager>,
    lock_timeout: Duration,
}

impl LogSink {
    pub fn new(locks: Arc<LockManager>) -> Self {
        Self {
            locks,
            lock_timeout: Duration::from_secs(DEFAULT_LOG_LOCK_TIMEOUT_SECS),
        }
    }

    /// Writes the debug block (debug mode only) and then the audit line.
    /// Failures are logged, never propagated.
    pub async fn write_run(&self, settings: &UploadSettings, summary: &RunSummary) {
        if settings.debug
            && let Err(err) = self
                .append(&settings.debug_log_file, &summary.debug_block())
                .await
        {
            warn!(path = ?settings.debug_log_file, error = %err, "debug log write failed");
        }
        if let Err(err) = self.append(&settings.log_file, &summary.audit_line()).await {
            warn!(path = ?settings.log_file, error = %err, "audit log write failed");
        }
    }

    /// 以独占方式追加一段完整文本。
    pub async fn append(&self, path: &Path, content: &str) -> io::Result<()> {
        let _guard = self
            .locks
            .lock_path_with_timeout(path, self.lock_timeout)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "log file lock timed out"))?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await
    }
}
