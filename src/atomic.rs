//! 临时写入与原子替换的辅助方法。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use uuid::Uuid;

/// 可用于原子替换的临时文件封装。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在目标路径同目录创建临时文件。
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid target path"))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "file".into());
        let temp_name = format!(".{base}.tmp.{}", Uuid::new_v4());
        let temp_path = parent.join(temp_name);
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    /// 返回临时文件的可写句柄。
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 同步并原子替换目标文件。
    pub async fn finalize(self) -> io::Result<()> {
        self.file.sync_all().await?;
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok() {
                    fs::rename(&self.temp_path, &self.target).await?;
                } else {
                    let _ = fs::remove_file(&self.temp_path).await;
                    return Err(err);
                }
            }
            #[cfg(not(windows))]
            {
                let _ = fs::remove_file(&self.temp_path).await;
                return Err(err);
            }
        }

        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }

        Ok(())
    }
}

/// Copies `source` into `target` through an [`AtomicFile`], replacing any
/// existing file. Readers never observe a half-written target.
pub async fn copy_atomic(source: &Path, target: &Path) -> io::Result<u64> {
    let mut atomic = AtomicFile::new(target).await?;
    let copied = async {
        let mut source = File::open(source).await?;
        tokio::io::copy(&mut source, atomic.file_mut()).await
    }
    .await;
    match copied {
        Ok(copied) => {
            atomic.finalize().await?;
            Ok(copied)
        }
        Err(err) => {
            atomic.cleanup().await;
            Err(err)
        }
    }
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn copy_replaces_existing_target() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("source.bin");
        let target = temp.path().join("target.bin");
        std::fs::write(&source, b"new").expect("write source");
        std::fs::write(&target, b"old content").expect("write target");

        let copied = copy_atomic(&source, &target).await.expect("copy");

        assert_eq!(copied, 3);
        assert_eq!(std::fs::read(&target).expect("read target"), b"new");
        let leftovers = std::fs::read_dir(temp.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp."))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn copy_from_missing_source_leaves_no_temp_file() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("target.bin");

        let result = copy_atomic(&temp.path().join("missing"), &target).await;

        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(temp.path()).expect("read dir").count(), 0);
    }
}
