//! 共享目录的文件系统操作：列目录、隐藏判断与删除。

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::io;
use std::path::Path;
use tokio::fs;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Clone, Debug, Serialize)]
pub struct DirectoryItem {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub hidden: bool,
    pub size: u64,
    pub modified: String,
    pub extension: Option<String>,
}

/// 列出目录：文件夹在前，其余按名称忽略大小写排序。
pub async fn list_directory(dir: &Path) -> io::Result<Vec<DirectoryItem>> {
    let mut reader = fs::read_dir(dir).await?;
    let mut items = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = metadata.is_dir();
        let modified = metadata
            .modified()
            .map(|ts| DateTime::<Utc>::from(ts).to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();

        items.push(DirectoryItem {
            hidden: is_hidden_path(dir, &name),
            kind: if is_dir {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            size: if is_dir { 0 } else { metadata.len() },
            modified,
            extension: (!is_dir).then(|| extension_of(&name)),
            name,
        });
    }

    items.sort_by(|a, b| match (a.kind, b.kind) {
        (EntryKind::Directory, EntryKind::File) => Ordering::Less,
        (EntryKind::File, EntryKind::Directory) => Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });

    Ok(items)
}

/// 最后一个点起的小写扩展名（含点），没有点时为空串。
pub fn extension_of(name: &str) -> String {
    name.rfind('.')
        .map(|index| name[index..].to_lowercase())
        .unwrap_or_default()
}

fn is_dot_name(name: &str) -> bool {
    name.starts_with('.') && name != "." && name != ".."
}

/// 点开头的名称视为隐藏；Windows 额外检查隐藏与系统属性。
#[cfg(not(windows))]
pub fn is_hidden_path(_dir: &Path, name: &str) -> bool {
    is_dot_name(name)
}

#[cfg(windows)]
pub fn is_hidden_path(dir: &Path, name: &str) -> bool {
    use std::os::windows::fs::MetadataExt;

    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
    if is_dot_name(name) {
        return true;
    }
    std::fs::symlink_metadata(dir.join(name))
        .map(|meta| meta.file_attributes() & (FILE_ATTRIBUTE_HIDDEN | FILE_ATTRIBUTE_SYSTEM) != 0)
        .unwrap_or(false)
}

#[derive(Debug)]
pub enum RemoveError {
    Trash(io::Error),
    Remove(io::Error),
}

/// 删除文件或目录；有回收站的平台优先移入回收站。
pub async fn remove_entry(path: &Path) -> Result<(), RemoveError> {
    if cfg!(windows) {
        let target = path.to_path_buf();
        return tokio::task::spawn_blocking(move || move_to_trash(&target))
            .await
            .map_err(|err| RemoveError::Trash(io::Error::other(err)))?
            .map_err(RemoveError::Trash);
    }

    let metadata = fs::symlink_metadata(path).await.map_err(RemoveError::Remove)?;
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    result.map_err(RemoveError::Remove)
}

#[cfg(windows)]
fn move_to_trash(path: &Path) -> io::Result<()> {
    trash::delete(path).map_err(io::Error::other)
}

#[cfg(not(windows))]
fn move_to_trash(_path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "move to trash not supported on this platform",
    ))
}
