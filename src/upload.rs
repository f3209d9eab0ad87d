//! 上传接口与上传限制查询接口。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::LogSink;
use crate::config::{UploadLimits, UploadSettings};
use crate::error::ApiError;
use crate::field::UploadField;
use crate::intake::{RequestSpool, read_request};
use crate::pipeline::{RequestContext, run_upload};
use crate::storage::UploadDir;

#[derive(Serialize)]
pub struct LimitsBody {
    post_max_size: u64,
    max_file_uploads: u64,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    success: bool,
    config: LimitsBody,
}

/// 处理一次多文件上传请求。
///
/// Setup problems end the request with 500 before anything is read. Otherwise
/// the run is always logged, even when it fails at request level.
pub async fn upload_files(
    Extension(settings): Extension<Arc<UploadSettings>>,
    Extension(limits): Extension<Arc<UploadLimits>>,
    Extension(storage): Extension<Arc<UploadDir>>,
    Extension(sink): Extension<Arc<LogSink>>,
    request: Request<AxumBody>,
) -> Result<Response, ApiError> {
    if let Err(err) = storage.ensure_writable().await {
        warn!(error = %err, "upload directory unavailable");
        return Err(err.into());
    }

    let ctx = RequestContext {
        method: request.method().clone(),
        limits: *limits,
    };
    let spool = RequestSpool::create(&settings.spool_dir).await;
    let field = if ctx.method == Method::POST {
        read_request(request, &settings.field_name, &limits, &spool).await
    } else {
        UploadField::new()
    };

    let report = run_upload(&ctx, &settings, &storage, &field).await;
    sink.write_run(&settings, &report.summary).await;
    spool.remove().await;

    if let Some(failure) = report.failure {
        info!(reason = %failure, "upload request failed");
        return Err(ApiError::BadRequest(failure.to_string()));
    }
    Ok((
        StatusCode::OK,
        JsonResponse(report.summary.success_response()),
    )
        .into_response())
}

/// 返回客户端预检用的上传限制。
pub async fn upload_config(
    Extension(limits): Extension<Arc<UploadLimits>>,
) -> JsonResponse<ConfigResponse> {
    JsonResponse(ConfigResponse {
        success: true,
        config: LimitsBody {
            post_max_size: limits.post_max_size,
            max_file_uploads: limits.max_file_uploads,
        },
    })
}
