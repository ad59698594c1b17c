//! 上传落盘：先写同目录临时文件，完成后原子替换。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// 写入完成前不会出现在目标位置的文件。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
    written: u64,
}

impl AtomicFile {
    /// 在目标路径同目录创建隐藏的临时文件。
    pub async fn create(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "upload".into());
        let temp_path = parent.join(format!(".{base}.part-{}", Uuid::new_v4().simple()));
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
            written: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// 放弃并清理临时文件。
    pub async fn discard(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 刷盘后替换目标文件，返回写入的字节数。
    pub async fn commit(mut self) -> io::Result<u64> {
        let synced = async {
            self.file.flush().await?;
            self.file.sync_all().await
        }
        .await;
        let Self {
            target,
            temp_path,
            file,
            written,
        } = self;
        drop(file);
        if let Err(err) = synced {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&temp_path, &target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&target).await.is_ok() {
                    if let Err(err) = fs::rename(&temp_path, &target).await {
                        let _ = fs::remove_file(&temp_path).await;
                        return Err(err);
                    }
                    return Ok(written);
                }
            }
            let _ = fs::remove_file(&temp_path).await;
            return Err(err);
        }

        if let Some(parent) = target.parent() {
            let _ = sync_dir(parent).await;
        }
        Ok(written)
    }
}

#[cfg(unix)]
async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || std::fs::File::open(path)?.sync_all())
        .await
        .map_err(io::Error::other)?
}

#[cfg(not(unix))]
async fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
