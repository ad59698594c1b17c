//! 共享根目录的路径约束：所有客户端路径都经由 `safe_join` 解析。

use std::ffi::OsString;
use std::path::{Component, MAIN_SEPARATOR, MAIN_SEPARATOR_STR, Path, PathBuf};

/// 词法规整路径：去掉 `.`、折叠 `..`，不访问文件系统。
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => cleaned.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    cleaned.pop();
                    depth -= 1;
                } else if !cleaned.has_root() {
                    cleaned.push("..");
                }
            }
            Component::Normal(segment) => {
                cleaned.push(segment);
                depth += 1;
            }
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

/// 规整共享根目录；Windows 上裸盘符 `D:` 视为 `D:\`。
pub fn normalize_root(root: &Path) -> PathBuf {
    let mut cleaned = clean_path(root);
    let only_prefix = matches!(cleaned.components().next(), Some(Component::Prefix(_)))
        && !cleaned.has_root();
    if only_prefix {
        cleaned.push(MAIN_SEPARATOR_STR);
    }
    cleaned
}

/// 将客户端提供的相对路径拼接到根目录下，越界时返回 `None`。
pub fn safe_join(root: &Path, user_path: &str) -> Option<PathBuf> {
    let root = normalize_root(root);
    let relative = user_path.trim();
    let relative = if MAIN_SEPARATOR == '\\' {
        relative.replace('/', "\\")
    } else {
        relative.to_owned()
    };

    let mut joined = OsString::from(root.as_os_str());
    if !relative.is_empty() {
        joined.push(MAIN_SEPARATOR_STR);
        joined.push(&relative);
    }
    let joined = clean_path(Path::new(&joined));
    is_within(&root, &joined).then_some(joined)
}

/// 判断两个路径在词法规整后是否指向同一位置（Windows 忽略大小写）。
pub fn same_path(a: &Path, b: &Path) -> bool {
    path_key(&normalize_root(a)) == path_key(&normalize_root(b))
}

/// `full` 是否就是共享根目录本身。
pub fn is_share_root(root: &Path, full: &Path) -> bool {
    same_path(root, full)
}

/// 计算 `full` 相对根目录的路径，统一使用 `/` 分隔。
pub fn relative_slash_path(root: &Path, full: &Path) -> Option<String> {
    let relative = full.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn is_within(root: &Path, candidate: &Path) -> bool {
    let root_key = path_key(root);
    let candidate_key = path_key(candidate);
    if candidate_key == root_key {
        return true;
    }
    let prefix = if root_key.ends_with(MAIN_SEPARATOR) {
        root_key
    } else {
        format!("{root_key}{MAIN_SEPARATOR}")
    };
    candidate_key.starts_with(&prefix)
}

fn path_key(path: &Path) -> String {
    let key = path.to_string_lossy().into_owned();
    if cfg!(windows) {
        key.to_lowercase()
    } else {
        key
    }
}


#[cfg(all(test, windows))]
mod windows_tests {
    use super::*;

    #[test]
    fn bare_drive_is_treated_as_volume_root() {
        assert_eq!(normalize_root(Path::new("D:")), PathBuf::from("D:\\"));
        assert_eq!(
            safe_join(Path::new("D:"), "music/a.mp3"),
            Some(PathBuf::from("D:\\music\\a.mp3"))
        );
    }

    #[test]
    fn comparison_ignores_case() {
        let root = Path::new("C:\\Share");
        assert!(safe_join(root, "x").is_some());
        assert!(is_share_root(root, Path::new("c:\\share")));
        assert_eq!(safe_join(root, "..\\Other"), None);
    }
}
