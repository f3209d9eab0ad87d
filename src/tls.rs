//! TLS 证书加载。

use axum_server::tls_rustls::RustlsConfig;
use tokio::fs;
use tracing::info;

use crate::config::Args;

/// 证书与私钥同时配置时构建 Rustls 配置，否则以纯 HTTP 运行。
pub async fn build_rustls_config(args: &Args) -> Result<Option<RustlsConfig>, std::io::Error> {
    match (&args.tls_cert, &args.tls_key) {
        (Some(cert_path), Some(key_path)) => {
            let cert = fs::read(cert_path).await?;
            let key = fs::read(key_path).await?;
            info!(cert = %cert_path, "loaded tls certificate");
            RustlsConfig::from_pem(cert, key).await.map(Some)
        }
        (None, None) => Ok(None),
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "tls cert and key must be configured together",
        )),
    }
}
