//! 上传目标目录：可写性检查、扁平路径解析与文件提交。

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::atomic::copy_atomic;

#[derive(Clone, Debug)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Creates the directory when absent; an existing one must be a directory
    /// with write permission. Nothing is written.
    pub async fn ensure_writable(&self) -> Result<(), StorageError> {
        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => Ok(()),
            Ok(_) => Err(StorageError::NotWritable(self.root.clone())),
            Err(_) => create_dir_restricted(&self.root)
                .await
                .map_err(|_| StorageError::NotWritable(self.root.clone())),
        }
    }

    /// 启动时的完整检查：在 [`ensure_writable`](Self::ensure_writable) 之后
    /// 实际写入并删除一个探测文件。
    pub async fn probe_writable(&self) -> Result<(), StorageError> {
        self.ensure_writable().await?;
        let probe = self.root.join(format!(".write-probe.{}", Uuid::new_v4()));
        fs::write(&probe, b"")
            .await
            .map_err(|_| StorageError::NotWritable(self.root.clone()))?;
        let _ = fs::remove_file(&probe).await;
        Ok(())
    }

    /// Resolves a flat file name inside the directory. Anything but a single
    /// normal path component is refused.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) => Ok(self.root.join(segment)),
            _ => Err(StorageError::InvalidPath),
        }
    }

    /// 将临时文件移动到目标目录，同名文件直接覆盖。
    ///
    /// A plain rename is tried first; when it fails (for example because the
    /// spool lives on another file system) the content is copied atomically
    /// and the source removed.
    pub async fn commit(&self, source: &Path, name: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(name)?;
        if let Err(err) = fs::rename(source, &target).await {
            debug!(source = ?source, target = ?target, error = %err, "rename failed, copying");
            copy_atomic(source, &target).await?;
            let _ = fs::remove_file(source).await;
        }
        Ok(target)
    }
}

/// `create_dir_all` with mode 0755 on unix.
pub async fn create_dir_restricted(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;

        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(path)
        })
        .await
        .map_err(|err| io::Error::other(err.to_string()))?
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(path).await
    }
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    NotWritable(PathBuf),
    Io(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::InvalidPath => f.write_str("invalid path"),
            StorageError::NotWritable(path) => {
                write!(f, "directory is not writable: {}", path.display())
            }
            StorageError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
