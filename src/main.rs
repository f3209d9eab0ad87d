//! AxoUpload server binary.
//!
//! Wires the multi-file upload endpoint, session authentication, and the
//! audit/debug log sink into an Axum router, then serves it over HTTP or,
//! when a certificate is configured, HTTPS.

mod analyzer;
mod atomic;
mod audit;
mod auth;
mod background;
mod config;
mod error;
mod field;
mod http;
mod intake;
mod locking;
mod logging;
mod pipeline;
mod sanitize;
mod sniff;
mod storage;
mod summary;
mod tls;
mod upload;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{any, get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::audit::LogSink;
use crate::auth::AuthConfig;
use crate::background::spawn_background_tasks;
use crate::config::Args;
use crate::http::{RequestScheme, build_cors_layer, resolve_client_ip};
use crate::locking::LockManager;
use crate::storage::{UploadDir, create_dir_restricted};

shadow!(build);

/// Starts the AxoUpload server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let args = Args::parse();
    logging::init_logging(args.debug);

    let settings = Arc::new(args.upload_settings());
    let limits = Arc::new(args.upload_limits());
    let storage = Arc::new(UploadDir::new(settings.upload_dir.clone()));
    let sink = Arc::new(LogSink::new(Arc::new(LockManager::new())));
    let auth_config = Arc::new(
        AuthConfig::new(
            args.auth_user.clone(),
            args.auth_pass.clone(),
            Duration::from_secs(args.session_ttl_secs),
        )
        .with_login_limit(
            args.login_max_attempts,
            Duration::from_secs(args.login_window_secs),
            Duration::from_secs(args.login_lockout_secs),
        ),
    );

    // 上传目录在每次请求时只检查权限，这里做一次真实写入探测。
    if let Err(err) = storage.probe_writable().await {
        tracing::warn!(error = %err, "upload directory not writable yet");
    }
    create_dir_restricted(&settings.spool_dir).await?;

    let body_limit = if limits.post_max_size == 0 {
        DefaultBodyLimit::disable()
    } else {
        DefaultBodyLimit::max(usize::try_from(limits.post_max_size).unwrap_or(usize::MAX))
    };

    let mut app = Router::new()
        .route("/api/upload", any(upload::upload_files).layer(body_limit))
        .route("/api/upload/config", get(upload::upload_config))
        .route("/api/auth/login", post(auth::auth_login))
        .route("/api/auth/logout", post(auth::auth_logout))
        .route("/api/auth/status", get(auth::auth_status))
        .layer(middleware::from_fn(auth::auth_middleware))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(settings.clone()))
        .layer(Extension(limits))
        .layer(Extension(storage))
        .layer(Extension(sink))
        .layer(Extension(auth_config.clone()));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let tls_config = tls::build_rustls_config(&args).await?;
    let handle = Handle::new();

    spawn_background_tasks(
        auth_config,
        settings.spool_dir.clone(),
        Duration::from_secs(args.spool_ttl_secs),
    );

    match tls_config {
        Some(tls_config) => {
            info!("🔒 Starting HTTPS server at {}", addr);
            let https_app = app.layer(Extension(RequestScheme::Https));
            let server = axum_server::bind_rustls(addr, tls_config)
                .handle(handle.clone())
                .serve(https_app.into_make_service_with_connect_info::<SocketAddr>());
            tokio::select! {
                result = server => result?,
                _ = shutdown_signal(handle) => {}
            }
        }
        None => {
            info!("🚀 Starting HTTP server at {}", addr);
            let http_app = app.layer(Extension(RequestScheme::Http));
            let server = axum_server::bind(addr)
                .handle(handle.clone())
                .serve(http_app.into_make_service_with_connect_info::<SocketAddr>());
            tokio::select! {
                result = server => result?,
                _ = shutdown_signal(handle) => {}
            }
        }
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
