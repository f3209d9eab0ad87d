//! 会话清理与上传暂存目录清理的后台任务。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::auth::AuthConfig;
use crate::config::{SESSION_PRUNE_INTERVAL_SECS, SPOOL_CLEAN_INTERVAL_SECS};
use crate::intake::cleanup_spool;

/// 启动后台任务（会话清理与暂存目录清理）。
pub fn spawn_background_tasks(auth: Arc<AuthConfig>, spool_root: PathBuf, spool_ttl: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SESSION_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            auth.sessions.prune().await;
            auth.throttle.prune().await;
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SPOOL_CLEAN_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(err) = cleanup_spool(&spool_root, spool_ttl).await {
                warn!(error = %err, path = ?spool_root, "spool cleanup failed");
            }
        }
    });
}
