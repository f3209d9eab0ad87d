//! 请求接收：解析 multipart 请求体，把目标字段的文件写入临时目录。

use axum::body::Body as AxumBody;
use axum::extract::multipart::Field;
use axum::extract::{FromRequest, Multipart};
use axum::http::Request;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::UploadLimits;
use crate::field::{RawFile, UploadErrorCode, UploadField, parse_field_name};
use crate::storage::create_dir_restricted;

/// Text field that lowers the per-file limit for the rest of the form.
pub const MAX_FILE_SIZE_FIELD: &str = "MAX_FILE_SIZE";

/// Per-request directory that holds spooled file parts until the run is over.
#[derive(Debug)]
pub struct RequestSpool {
    dir: Option<PathBuf>,
}

impl RequestSpool {
    /// Creates `<root>/req-<uuid>`. A failure is remembered and reported per
    /// file as a missing temporary directory.
    pub async fn create(root: &Path) -> Self {
        let dir = root.join(format!("req-{}", Uuid::new_v4().simple()));
        match create_dir_restricted(&dir).await {
            Ok(()) => Self { dir: Some(dir) },
            Err(err) => {
                warn!(path = ?dir, error = %err, "failed to create spool dir");
                Self { dir: None }
            }
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// 删除本次请求残留的临时文件。
    pub async fn remove(self) {
        if let Some(dir) = self.dir
            && let Err(err) = fs::remove_dir_all(&dir).await
            && err.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = ?dir, error = %err, "failed to remove spool dir");
        }
    }
}

/// Reads the request body as multipart form data. Anything that is not
/// multipart yields an empty field.
pub async fn read_request(
    request: Request<AxumBody>,
    field_name: &str,
    limits: &UploadLimits,
    spool: &RequestSpool,
) -> UploadField {
    match Multipart::from_request(request, &()).await {
        Ok(multipart) => read_upload_field(multipart, field_name, limits, spool).await,
        Err(rejection) => {
            debug!(reason = %rejection, "request body is not multipart");
            UploadField::new()
        }
    }
}

/// Collects every file part of `field_name` into an [`UploadField`].
pub async fn read_upload_field(
    mut multipart: Multipart,
    field_name: &str,
    limits: &UploadLimits,
    spool: &RequestSpool,
) -> UploadField {
    let mut field = UploadField::new();
    let mut form_max_size: Option<u64> = None;
    let mut spooled_parts: u64 = 0;

    loop {
        let part = match multipart.next_field().await {
            Ok(Some(part)) => part,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "multipart stream ended early");
                break;
            }
        };
        let part_name = part.name().unwrap_or_default().to_string();
        let Some(file_name) = part.file_name().map(str::to_string) else {
            if part_name == MAX_FILE_SIZE_FIELD {
                form_max_size = part
                    .text()
                    .await
                    .ok()
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .filter(|value| *value > 0);
            }
            continue;
        };
        let Some((base, target)) = parse_field_name(&part_name) else {
            debug!(name = part_name, "ignoring malformed field name");
            continue;
        };
        if base != field_name {
            continue;
        }
        let mime_type = part.content_type().unwrap_or_default().to_string();

        if file_name.is_empty() {
            field.insert(target, RawFile::failed("", mime_type, UploadErrorCode::NoFile));
            continue;
        }
        if limits.max_file_uploads > 0 && spooled_parts >= limits.max_file_uploads {
            warn!(
                name = file_name,
                max_file_uploads = limits.max_file_uploads,
                "dropping file beyond max_file_uploads"
            );
            continue;
        }
        spooled_parts += 1;

        let (file, stream_broken) =
            spool_part(part, file_name, mime_type, limits, form_max_size, spool).await;
        debug!(
            field = part_name,
            name = file.name,
            tmp_name = ?file.tmp_name,
            size = file.size,
            error = file.error.code(),
            "parsed uploaded file"
        );
        field.insert(target, file);
        if stream_broken {
            break;
        }
    }

    field
}

/// Streams one part to disk. The flag is true when the request body itself
/// broke and nothing further can be read.
async fn spool_part(
    mut part: Field<'_>,
    name: String,
    mime_type: String,
    limits: &UploadLimits,
    form_max_size: Option<u64>,
    spool: &RequestSpool,
) -> (RawFile, bool) {
    let Some(dir) = spool.dir() else {
        return (RawFile::failed(name, mime_type, UploadErrorCode::NoTmpDir), false);
    };
    let tmp_name = dir.join(format!("upload-{}", Uuid::new_v4().simple()));
    let mut file = match File::create(&tmp_name).await {
        Ok(file) => file,
        Err(err) => {
            warn!(path = ?tmp_name, error = %err, "failed to create spool file");
            return (RawFile::failed(name, mime_type, UploadErrorCode::NoTmpDir), false);
        }
    };

    let mut size: u64 = 0;
    let written: Result<(), (UploadErrorCode, bool)> = loop {
        let chunk = match part.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break Ok(()),
            Err(err) => {
                warn!(name, error = %err, "file part interrupted");
                break Err((UploadErrorCode::Partial, true));
            }
        };
        size += chunk.len() as u64;
        if limits.upload_max_filesize > 0 && size > limits.upload_max_filesize {
            break Err((UploadErrorCode::IniSize, false));
        }
        if let Some(max) = form_max_size
            && size > max
        {
            break Err((UploadErrorCode::FormSize, false));
        }
        if let Err(err) = file.write_all(&chunk).await {
            warn!(path = ?tmp_name, error = %err, "spool write failed");
            break Err((UploadErrorCode::CantWrite, false));
        }
    };
    let written = match written {
        Ok(()) => file
            .flush()
            .await
            .map_err(|_| (UploadErrorCode::CantWrite, false)),
        Err(failure) => Err(failure),
    };
    drop(file);

    match written {
        Ok(()) => (
            RawFile {
                name,
                mime_type,
                tmp_name,
                error: UploadErrorCode::Ok,
                size,
            },
            false,
        ),
        Err((code, stream_broken)) => {
            let _ = fs::remove_file(&tmp_name).await;
            (RawFile::failed(name, mime_type, code), stream_broken)
        }
    }
}

/// 清理过期的请求临时目录（异常中断的请求可能残留）。
pub async fn cleanup_spool(root: &Path, ttl: Duration) -> Result<(), std::io::Error> {
    if ttl.is_zero() || fs::metadata(root).await.is_err() {
        return Ok(());
    }

    let now = SystemTime::now();
    let mut dir = fs::read_dir(root).await?;
    while let Some(entry) = dir.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_dir() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };
        if age >= ttl {
            let path = entry.path();
            if let Err(err) = fs::remove_dir_all(&path).await {
                warn!(path = ?path, error = %err, "failed to remove stale spool dir");
            } else {
                info!(path = ?path, "removed stale spool dir");
            }
        }
    }

    Ok(())
}
