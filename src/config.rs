//! CLI arguments, server configuration defaults and the per-instance upload
//! settings derived from them.

use clap::Parser;
use shadow_rs::formatcp;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_UPLOAD_DIR: &str = "files";
pub const DEFAULT_LOG_FILE: &str = "logs/log.txt";
pub const DEFAULT_DEBUG_LOG_FILE: &str = "logs/debug_log.txt";
pub const DEFAULT_SPOOL_DIR: &str = ".axo/spool";
pub const DEFAULT_FIELD_NAME: &str = "field";
pub const DEFAULT_ALLOWED_EXTENSIONS: &str = "txt,pdf,png,jpg,jpeg,gif,doc,docx";
pub const DEFAULT_AUTH_USER: &str = "upload";
pub const DEFAULT_AUTH_PASS: &str = "upload";
pub const AUTH_COOKIE_NAME: &str = "AXO_UPLOAD_SESSION";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_LOGIN_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOGIN_WINDOW_SECS: u64 = 5 * 60;
pub const DEFAULT_LOGIN_LOCKOUT_SECS: u64 = 10 * 60;
pub const DEFAULT_POST_MAX_SIZE: u64 = 8 * 1024 * 1024;
pub const DEFAULT_UPLOAD_MAX_FILESIZE: u64 = 2 * 1024 * 1024;
pub const DEFAULT_MAX_FILE_UPLOADS: u64 = 20;
pub const DEFAULT_SPOOL_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_LOG_LOCK_TIMEOUT_SECS: u64 = 5;
pub const SESSION_PRUNE_INTERVAL_SECS: u64 = 300;
pub const SPOOL_CLEAN_INTERVAL_SECS: u64 = 900;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "axo-upload", version = VERSION_INFO, about = "AxoUpload server")]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "AXO_UPLOAD_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "AXO_UPLOAD_PORT",
        default_value_t = 5005,
        help = "Listen port"
    )]
    pub port: u16,
    #[arg(short = 'c', long, env = "AXO_UPLOAD_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "AXO_UPLOAD_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(long, env = "AXO_UPLOAD_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        short = 'd',
        long,
        env = "AXO_UPLOAD_DIR",
        default_value = DEFAULT_UPLOAD_DIR,
        help = "Target directory for accepted files"
    )]
    pub upload_dir: PathBuf,
    #[arg(
        long,
        env = "AXO_UPLOAD_LOG_FILE",
        default_value = DEFAULT_LOG_FILE,
        help = "Audit log file (one line per request)"
    )]
    pub log_file: PathBuf,
    #[arg(
        long,
        env = "AXO_UPLOAD_DEBUG_LOG_FILE",
        default_value = DEFAULT_DEBUG_LOG_FILE,
        help = "Debug trace log file"
    )]
    pub debug_log_file: PathBuf,
    #[arg(
        long,
        env = "AXO_UPLOAD_DEBUG",
        default_value_t = false,
        help = "Write a full trace block per request to the debug log"
    )]
    pub debug: bool,
    #[arg(
        long,
        env = "AXO_UPLOAD_ALLOWED_EXTENSIONS",
        default_value = DEFAULT_ALLOWED_EXTENSIONS,
        help = "Comma separated list of allowed file extensions"
    )]
    pub allowed_extensions: String,
    #[arg(
        long,
        env = "AXO_UPLOAD_FIELD",
        default_value = DEFAULT_FIELD_NAME,
        help = "Multipart form field carrying the files"
    )]
    pub field_name: String,
    #[arg(
        long,
        env = "AXO_UPLOAD_SPOOL_DIR",
        default_value = DEFAULT_SPOOL_DIR,
        help = "Directory for temporary upload files"
    )]
    pub spool_dir: PathBuf,
    #[arg(
        long,
        env = "AXO_UPLOAD_SPOOL_TTL_SECS",
        default_value_t = DEFAULT_SPOOL_TTL_SECS,
        help = "Stale spool cleanup threshold in seconds (0 to disable)"
    )]
    pub spool_ttl_secs: u64,
    #[arg(
        long,
        env = "AXO_UPLOAD_POST_MAX_SIZE",
        default_value_t = DEFAULT_POST_MAX_SIZE,
        help = "Max request body size in bytes (0 to disable)"
    )]
    pub post_max_size: u64,
    #[arg(
        long,
        env = "AXO_UPLOAD_MAX_FILESIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_FILESIZE,
        help = "Max size of a single file in bytes (0 to disable)"
    )]
    pub upload_max_filesize: u64,
    #[arg(
        long,
        env = "AXO_UPLOAD_MAX_FILE_UPLOADS",
        default_value_t = DEFAULT_MAX_FILE_UPLOADS,
        help = "Max number of files per request (0 to disable)"
    )]
    pub max_file_uploads: u64,
    #[arg(
        long,
        env = "AXO_UPLOAD_AUTH_USER",
        default_value = DEFAULT_AUTH_USER,
        help = "Login username"
    )]
    pub auth_user: String,
    #[arg(
        long,
        env = "AXO_UPLOAD_AUTH_PASS",
        default_value = DEFAULT_AUTH_PASS,
        help = "Login password"
    )]
    pub auth_pass: String,
    #[arg(
        long,
        env = "AXO_UPLOAD_SESSION_TTL_SECS",
        default_value_t = DEFAULT_SESSION_TTL_SECS,
        help = "Session expiration in seconds"
    )]
    pub session_ttl_secs: u64,
    #[arg(
        long,
        env = "AXO_UPLOAD_LOGIN_MAX_ATTEMPTS",
        default_value_t = DEFAULT_LOGIN_MAX_ATTEMPTS,
        help = "Max login attempts before lockout"
    )]
    pub login_max_attempts: u32,
    #[arg(
        long,
        env = "AXO_UPLOAD_LOGIN_WINDOW_SECS",
        default_value_t = DEFAULT_LOGIN_WINDOW_SECS,
        help = "Login attempt window in seconds"
    )]
    pub login_window_secs: u64,
    #[arg(
        long,
        env = "AXO_UPLOAD_LOGIN_LOCKOUT_SECS",
        default_value_t = DEFAULT_LOGIN_LOCKOUT_SECS,
        help = "Login lockout time after max attempts"
    )]
    pub login_lockout_secs: u64,
}

impl Args {
    /// 从命令行参数构建上传配置。
    pub fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            upload_dir: self.upload_dir.clone(),
            log_file: self.log_file.clone(),
            debug_log_file: self.debug_log_file.clone(),
            allowed_extensions: parse_extension_list(&self.allowed_extensions),
            debug: self.debug,
            field_name: self.field_name.clone(),
            spool_dir: self.spool_dir.clone(),
        }
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            post_max_size: self.post_max_size,
            upload_max_filesize: self.upload_max_filesize,
            max_file_uploads: self.max_file_uploads,
        }
    }
}

/// Immutable upload configuration shared by every request.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub upload_dir: PathBuf,
    pub log_file: PathBuf,
    pub debug_log_file: PathBuf,
    /// Lower-cased extensions without the leading dot.
    pub allowed_extensions: HashSet<String>,
    pub debug: bool,
    pub field_name: String,
    pub spool_dir: PathBuf,
}

impl UploadSettings {
    /// Case-insensitive allow-list lookup.
    pub fn is_extension_allowed(&self, extension: &str) -> bool {
        self.allowed_extensions
            .contains(extension.to_ascii_lowercase().as_str())
    }
}

/// Server-side upload limits. `0` disables a limit.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub post_max_size: u64,
    pub upload_max_filesize: u64,
    pub max_file_uploads: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            post_max_size: DEFAULT_POST_MAX_SIZE,
            upload_max_filesize: DEFAULT_UPLOAD_MAX_FILESIZE,
            max_file_uploads: DEFAULT_MAX_FILE_UPLOADS,
        }
    }
}

/// 解析逗号分隔的扩展名列表（忽略大小写与前导点）。
pub fn parse_extension_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_list_is_trimmed_and_lowercased() {
        let set = parse_extension_list(" TXT, .Pdf,,jpg ");
        assert_eq!(set.len(), 3);
        assert!(set.contains("txt"));
        assert!(set.contains("pdf"));
        assert!(set.contains("jpg"));
    }

    #[test]
    fn defaults_parse_without_arguments() {
        let args = Args::parse_from(["axo-upload"]);
        let settings = args.upload_settings();
        assert!(settings.is_extension_allowed("DOCX"));
        assert!(!settings.is_extension_allowed("exe"));
        assert_eq!(settings.field_name, DEFAULT_FIELD_NAME);
        assert!(!settings.debug);
        assert_eq!(args.upload_limits().max_file_uploads, DEFAULT_MAX_FILE_UPLOADS);
    }
}
