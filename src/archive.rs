//! 打包下载：先遍历校验生成打包计划，再把 zip 以流的形式写入响应。

use axum::body::Body as AxumBody;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, Datelike, Local, Timelike};
use serde::Deserialize;
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::{ZIP_MAX_FILES, ZIP_MAX_PATHS, ZIP_MAX_TOTAL_BYTES, ZIP_STREAM_CHUNK_BYTES};
use crate::error::ApiError;
use crate::files::{dedupe_paths, serve_file};
use crate::http::attachment_disposition;
use crate::permissions::{Permission, PermissionSet};
use crate::sandbox::{is_share_root, normalize_root, relative_slash_path, safe_join};
use crate::session::ShareRoot;
use crate::settings::SharedSettings;

#[derive(Deserialize)]
pub(crate) struct ZipRequest {
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    ignore: Vec<String>,
}

/// 打包忽略规则：不含 `/` 的按名称匹配任意层级，含 `/` 的按路径前缀匹配。
#[derive(Clone, Debug, Default)]
pub struct IgnoreRules {
    names: Vec<String>,
    prefixes: Vec<String>,
}

impl IgnoreRules {
    pub fn new(patterns: &[String]) -> Self {
        let mut seen = HashSet::new();
        let mut rules = Self::default();
        for pattern in patterns {
            let normalized = pattern.trim().replace('\\', "/");
            let normalized = normalized.trim_start_matches('/');
            if normalized.is_empty() || !seen.insert(normalized.to_string()) {
                continue;
            }
            if normalized.contains('/') {
                let prefix = clean_slash(normalized);
                if !prefix.is_empty() {
                    rules.prefixes.push(prefix);
                }
            } else {
                rules.names.push(normalized.to_string());
            }
        }
        rules
    }

    pub fn ignores_name(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        self.names.iter().any(|ignored| {
            if cfg!(windows) {
                ignored.eq_ignore_ascii_case(name) || ignored.to_lowercase() == name.to_lowercase()
            } else {
                ignored == name
            }
        })
    }

    pub fn ignores_entry(&self, entry: &str) -> bool {
        let entry = clean_slash(entry);
        if entry.is_empty() {
            return false;
        }
        if entry.split('/').any(|segment| self.ignores_name(segment)) {
            return true;
        }
        self.prefixes.iter().any(|prefix| {
            entry == *prefix
                || entry
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// `/` 分隔路径的词法规整，去掉首尾分隔符。
fn clean_slash(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn client_slash_path(path: &str) -> String {
    if cfg!(windows) {
        clean_slash(&path.replace('\\', "/"))
    } else {
        clean_slash(path)
    }
}

/// 已解析路径在压缩包内的名称，由根目录下的实际位置得出，不含 `..`。
fn resolved_entry(root: &Path, full: &Path) -> Result<String, ApiError> {
    relative_slash_path(&normalize_root(root), full)
        .filter(|entry| !entry.is_empty())
        .ok_or_else(ApiError::sandbox)
}

/// 待写入压缩包的文件。
#[derive(Clone, Debug)]
pub struct ZipCandidate {
    pub source: PathBuf,
    pub entry: String,
    pub modified: SystemTime,
    pub size: u64,
}

#[derive(Default)]
struct ZipBudget {
    files: usize,
    bytes: u64,
}

impl ZipBudget {
    fn admit(&mut self, size: u64) -> Result<(), ApiError> {
        if self.files >= ZIP_MAX_FILES {
            return Err(ApiError::BadRequest("打包文件过多，请减少选择".into()));
        }
        self.bytes = self.bytes.saturating_add(size);
        if self.bytes > ZIP_MAX_TOTAL_BYTES {
            return Err(ApiError::BadRequest("打包内容过大，请减少选择".into()));
        }
        self.files += 1;
        Ok(())
    }
}

/// 遍历并校验全部选中路径，生成打包计划；任何字节写出前完成。
pub fn plan_archive(
    root: &Path,
    paths: &[String],
    ignore: &IgnoreRules,
) -> Result<Vec<ZipCandidate>, ApiError> {
    let mut budget = ZipBudget::default();
    let mut candidates = Vec::new();

    for rel in paths {
        let full =
            safe_join(root, rel).ok_or_else(|| ApiError::forbidden("包含无权限访问的路径"))?;
        if is_share_root(root, &full) {
            return Err(ApiError::BadRequest("禁止下载根目录".into()));
        }
        let metadata = std::fs::symlink_metadata(&full)
            .map_err(|_| ApiError::NotFound("包含不存在的路径".into()))?;
        if metadata.file_type().is_symlink() {
            return Err(ApiError::BadRequest("不支持打包符号链接".into()));
        }

        let entry_root = resolved_entry(root, &full)?;
        if ignore.ignores_entry(&entry_root) {
            continue;
        }

        if !metadata.is_dir() {
            if !metadata.is_file() {
                return Err(ApiError::BadRequest("只支持打包普通文件".into()));
            }
            budget.admit(metadata.len())?;
            candidates.push(ZipCandidate {
                source: full,
                entry: entry_root,
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size: metadata.len(),
            });
            continue;
        }

        let walker = WalkDir::new(&full)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || (!entry.path_is_symlink()
                        && !ignore.ignores_name(&entry.file_name().to_string_lossy()))
            });
        for entry in walker {
            let entry = entry.map_err(|err| {
                warn!(path = %full.display(), error = %err, "walk directory failed");
                ApiError::Internal("打包失败".into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(file_meta) = entry.metadata() else {
                continue;
            };
            let Ok(inside) = entry.path().strip_prefix(&full) else {
                continue;
            };
            let inside: Vec<String> = inside
                .components()
                .map(|component| component.as_os_str().to_string_lossy().into_owned())
                .collect();
            let zip_entry = format!("{entry_root}/{}", inside.join("/"));
            if ignore.ignores_entry(&zip_entry) {
                continue;
            }
            budget.admit(file_meta.len())?;
            candidates.push(ZipCandidate {
                source: entry.into_path(),
                entry: zip_entry,
                modified: file_meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size: file_meta.len(),
            });
        }
    }

    if candidates.is_empty() {
        return Err(ApiError::BadRequest("打包内容为空（已全部被忽略）".into()));
    }
    Ok(candidates)
}

/// 单个路径用其名称，否则按时间命名。
pub fn archive_name(paths: &[String], now: DateTime<Local>) -> String {
    if let [only] = paths {
        let cleaned = client_slash_path(only);
        if let Some(base) = cleaned
            .rsplit('/')
            .next()
            .filter(|base| !base.is_empty() && *base != "..")
        {
            return format!("{base}.zip");
        }
    }
    format!("shared-{}.zip", now.format("%Y%m%d-%H%M%S"))
}

/// 为压缩包条目去重：重名时在扩展名前插入 ` (n)`。
#[derive(Default)]
pub struct EntryNamer {
    used: HashSet<String>,
}

impl EntryNamer {
    pub fn unique(&mut self, entry: &str) -> String {
        let name = clean_slash(entry);
        let name = if name.is_empty() { "file".to_string() } else { name };
        if self.used.insert(name.clone()) {
            return name;
        }

        let (dir, base) = match name.rfind('/') {
            Some(index) => name.split_at(index + 1),
            None => ("", name.as_str()),
        };
        let (stem, ext) = match base.rfind('.') {
            Some(index) if index > 0 => base.split_at(index),
            _ => (base, ""),
        };
        let mut counter = 1;
        loop {
            let candidate = format!("{dir}{stem} ({counter}){ext}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

/// 把同步写入切成块送入异步通道；接收端关闭即视为客户端断开。
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buffer: Vec<u8>,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self {
            tx,
            buffer: Vec::with_capacity(ZIP_STREAM_CHUNK_BYTES),
        }
    }

    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(ZIP_STREAM_CHUNK_BYTES));
        self.tx
            .blocking_send(Ok(Bytes::from(chunk)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= ZIP_STREAM_CHUNK_BYTES {
            self.send_buffer()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer()
    }
}

fn zip_timestamp(modified: SystemTime) -> zip::DateTime {
    let local: DateTime<Local> = modified.into();
    u16::try_from(local.year())
        .ok()
        .and_then(|year| {
            zip::DateTime::from_date_and_time(
                year,
                local.month() as u8,
                local.day() as u8,
                local.hour() as u8,
                local.minute() as u8,
                local.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

fn write_archive(candidates: Vec<ZipCandidate>, writer: ChannelWriter) -> zip::result::ZipResult<()> {
    let mut zip = ZipWriter::new_stream(writer);
    let mut namer = EntryNamer::default();
    for candidate in candidates {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip_timestamp(candidate.modified));
        zip.start_file(namer.unique(&candidate.entry), options)?;
        let mut source = std::fs::File::open(&candidate.source)?;
        io::copy(&mut source, &mut zip)?;
    }
    let mut inner = zip.finish()?;
    inner.flush()?;
    Ok(())
}

/// 在阻塞线程中写 zip，返回流式响应体；中途出错时中断连接。
fn stream_archive(candidates: Vec<ZipCandidate>) -> AxumBody {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(8);
    let error_tx = tx.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(err) = write_archive(candidates, ChannelWriter::new(tx)) {
            warn!(error = %err, "zip stream aborted");
            let _ = error_tx.blocking_send(Err(io::Error::other(err.to_string())));
        }
    });
    AxumBody::from_stream(ReceiverStream::new(rx))
}

/// `POST /api/download-zip`：打包下载所选文件与文件夹。
pub async fn download_zip(
    request_headers: HeaderMap,
    Extension(ShareRoot(root)): Extension<ShareRoot>,
    Extension(settings): Extension<SharedSettings>,
    payload: Result<Json<ZipRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    PermissionSet::load(settings.as_ref()).require(Permission::Read)?;
    let Json(request) = payload.map_err(|_| ApiError::BadRequest("请求体解析失败".into()))?;

    let ignore = IgnoreRules::new(&request.ignore);
    let paths = dedupe_paths(request.paths);
    if paths.is_empty() {
        return Err(ApiError::BadRequest("未选择任何内容".into()));
    }
    if paths.len() > ZIP_MAX_PATHS {
        return Err(ApiError::BadRequest(format!(
            "一次最多选择 {ZIP_MAX_PATHS} 个路径"
        )));
    }

    if let [only] = paths.as_slice() {
        let full = safe_join(&root, only).ok_or_else(ApiError::sandbox)?;
        let metadata = fs::symlink_metadata(&full)
            .await
            .map_err(|_| ApiError::NotFound("路径不存在".into()))?;
        if is_share_root(&root, &full) {
            return Err(ApiError::BadRequest("禁止下载根目录".into()));
        }
        if metadata.is_file() && !ignore.ignores_entry(&resolved_entry(&root, &full)?) {
            let name = full
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mime = mime_guess::from_path(&full).first_or_octet_stream();
            let content_type = HeaderValue::from_str(mime.essence_str())
                .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?;
            return serve_file(
                &full,
                &metadata,
                content_type,
                Some(attachment_disposition(&name)),
                &request_headers,
            )
            .await;
        }
    }

    let zip_name = archive_name(&paths, Local::now());
    let requested = paths.len();
    let candidates = tokio::task::spawn_blocking(move || plan_archive(&root, &paths, &ignore))
        .await
        .map_err(|err| {
            warn!(error = %err, "zip planning task failed");
            ApiError::Internal("打包失败".into())
        })??;

    let total: u64 = candidates.iter().map(|candidate| candidate.size).sum();
    info!(
        name = zip_name.as_str(),
        requested,
        files = candidates.len(),
        bytes = total,
        "streaming zip"
    );

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(header::CONTENT_DISPOSITION, attachment_disposition(&zip_name));
    Ok((StatusCode::OK, headers, stream_archive(candidates)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;
    use axum::body::to_bytes;
    use chrono::TimeZone;
    use std::io::{Cursor, Read};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn make_root() -> (tempfile::TempDir, PathBuf) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("share");
        std::fs::create_dir_all(&root).expect("create share root");
        (temp, root)
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    async fn zip_request(root: &Path, paths: &[&str], ignore: &[&str]) -> Result<Response, ApiError> {
        download_zip(
            HeaderMap::new(),
            Extension(ShareRoot(root.to_path_buf())),
            Extension(Arc::new(MemorySettings::new()) as SharedSettings),
            Ok(Json(ZipRequest {
                paths: strings(paths),
                ignore: strings(ignore),
            })),
        )
        .await
    }

    fn read_entries(bytes: &[u8]) -> Vec<(String, String)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).expect("zip archive");
        let mut entries = Vec::new();
        for index in 0..archive.len() {
            let mut file = archive.by_index(index).expect("entry");
            let mut content = String::new();
            file.read_to_string(&mut content).expect("read entry");
            entries.push((file.name().to_string(), content));
        }
        entries
    }

    #[test]
    fn ignore_rules_match_names_and_prefixes() {
        let rules = IgnoreRules::new(&strings(&[
            " node_modules ",
            "/frontend/dist",
            "\\build\\out",
            "",
            "node_modules",
        ]));
        assert!(rules.ignores_entry("node_modules"));
        assert!(rules.ignores_entry("app/node_modules/pkg/index.js"));
        assert!(rules.ignores_entry("frontend/dist"));
        assert!(rules.ignores_entry("frontend/dist/app.js"));
        assert!(!rules.ignores_entry("frontend/distribution/app.js"));
        assert!(rules.ignores_entry("build/out/a.o"));
        assert!(!rules.ignores_entry("src/main.rs"));
        assert!(!rules.ignores_entry(""));
    }

    #[test]
    fn entry_namer_inserts_counter_before_extension() {
        let mut namer = EntryNamer::default();
        assert_eq!(namer.unique("docs/a.txt"), "docs/a.txt");
        assert_eq!(namer.unique("docs/a.txt"), "docs/a (1).txt");
        assert_eq!(namer.unique("/docs/./a.txt"), "docs/a (2).txt");
        assert_eq!(namer.unique("Makefile"), "Makefile");
        assert_eq!(namer.unique("Makefile"), "Makefile (1)");
        assert_eq!(namer.unique(""), "file");
    }

    #[test]
    fn archive_name_uses_single_base_or_timestamp() {
        let now = Local
            .with_ymd_and_hms(2024, 3, 5, 7, 8, 9)
            .single()
            .expect("local time");
        assert_eq!(archive_name(&strings(&["photos/2024"]), now), "2024.zip");
        assert_eq!(
            archive_name(&strings(&["a.txt", "b.txt"]), now),
            "shared-20240305-070809.zip"
        );
    }

    #[test]
    fn plan_rejects_root_and_missing_paths() {
        let (_temp, root) = make_root();
        let rules = IgnoreRules::default();
        assert!(matches!(
            plan_archive(&root, &strings(&["."]), &rules),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            plan_archive(&root, &strings(&["missing"]), &rules),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            plan_archive(&root, &strings(&["../x"]), &rules),
            Err(ApiError::Forbidden { .. })
        ));
    }

    #[test]
    fn plan_reports_everything_ignored() {
        let (_temp, root) = make_root();
        std::fs::create_dir_all(root.join("node_modules")).expect("mkdir");
        std::fs::write(root.join("node_modules").join("x.js"), b"x").expect("write");
        let rules = IgnoreRules::new(&strings(&["node_modules"]));
        assert!(matches!(
            plan_archive(&root, &strings(&["node_modules"]), &rules),
            Err(ApiError::BadRequest(message)) if message.contains("已全部被忽略")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn plan_skips_symlinks_inside_directories() {
        use std::os::unix::fs::symlink;

        let (temp, root) = make_root();
        let outside = temp.path().join("secret.txt");
        std::fs::write(&outside, b"secret").expect("write outside");
        std::fs::create_dir_all(root.join("dir")).expect("mkdir");
        std::fs::write(root.join("dir").join("real.txt"), b"ok").expect("write");
        symlink(&outside, root.join("dir").join("link.txt")).expect("symlink");
        symlink(&outside, root.join("top-link")).expect("symlink");

        let rules = IgnoreRules::default();
        let plan = plan_archive(&root, &strings(&["dir"]), &rules).expect("plan");
        let entries: Vec<&str> = plan.iter().map(|candidate| candidate.entry.as_str()).collect();
        assert_eq!(entries, vec!["dir/real.txt"]);

        assert!(matches!(
            plan_archive(&root, &strings(&["top-link", "dir"]), &rules),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn entries_come_from_resolved_paths() {
        let (_temp, root) = make_root();
        std::fs::write(root.join("a.txt"), b"a").expect("write");
        std::fs::create_dir_all(root.join("x")).expect("mkdir");

        let rules = IgnoreRules::default();
        let plan = plan_archive(&root, &strings(&["x/../../share/a.txt", "./x/../a.txt"]), &rules)
            .expect("plan");
        let entries: Vec<&str> = plan.iter().map(|candidate| candidate.entry.as_str()).collect();
        assert_eq!(entries, vec!["a.txt", "a.txt"]);
        assert!(entries.iter().all(|entry| !entry.contains("..")));
    }

    #[test]
    fn plan_caps_file_count() {
        let (_temp, root) = make_root();
        let dir = root.join("d");
        std::fs::create_dir_all(&dir).expect("mkdir");
        for index in 0..ZIP_MAX_FILES {
            std::fs::write(dir.join(format!("{index:04}.txt")), b"").expect("write");
        }
        let rules = IgnoreRules::default();
        let plan = plan_archive(&root, &strings(&["d"]), &rules).expect("plan at limit");
        assert_eq!(plan.len(), ZIP_MAX_FILES);

        std::fs::write(dir.join("extra.txt"), b"").expect("write");
        assert!(matches!(
            plan_archive(&root, &strings(&["d"]), &rules),
            Err(ApiError::BadRequest(message)) if message.contains("文件过多")
        ));
    }

    #[test]
    fn budget_caps_total_bytes() {
        let mut budget = ZipBudget::default();
        budget.admit(ZIP_MAX_TOTAL_BYTES - 1).expect("under limit");
        budget.admit(1).expect("exactly at limit");
        assert!(matches!(
            budget.admit(1),
            Err(ApiError::BadRequest(message)) if message.contains("内容过大")
        ));

        let mut single = ZipBudget::default();
        assert!(single.admit(ZIP_MAX_TOTAL_BYTES + 1).is_err());
    }

    #[tokio::test]
    async fn zips_selected_files() {
        let (_temp, root) = make_root();
        std::fs::write(root.join("a.txt"), b"alpha").expect("write a");
        std::fs::write(root.join("b.txt"), b"beta").expect("write b");

        let response = zip_request(&root, &["a.txt", "b.txt"], &[]).await.expect("zip");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert_eq!(
            read_entries(&bytes),
            vec![
                ("a.txt".to_string(), "alpha".to_string()),
                ("b.txt".to_string(), "beta".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn ignored_subtrees_are_left_out() {
        let (_temp, root) = make_root();
        let project = root.join("project");
        std::fs::create_dir_all(project.join("node_modules").join("pkg")).expect("mkdir");
        std::fs::create_dir_all(project.join("src")).expect("mkdir");
        std::fs::write(project.join("node_modules").join("pkg").join("index.js"), b"x")
            .expect("write");
        std::fs::write(project.join("src").join("main.rs"), b"fn main() {}").expect("write");

        let response = zip_request(&root, &["project"], &["node_modules"])
            .await
            .expect("zip");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename*=UTF-8''project.zip"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let names: Vec<String> = read_entries(&bytes).into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["project/src/main.rs".to_string()]);
    }

    #[tokio::test]
    async fn single_file_is_served_without_zipping() {
        let (_temp, root) = make_root();
        std::fs::write(root.join("notes.md"), b"# notes").expect("write");

        let response = zip_request(&root, &["notes.md"], &[]).await.expect("download");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename*=UTF-8''notes.md"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert_eq!(&bytes[..], b"# notes");
    }

    #[tokio::test]
    async fn root_and_oversized_selections_are_rejected() {
        let (_temp, root) = make_root();
        assert!(matches!(
            zip_request(&root, &[""], &[]).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            zip_request(&root, &["."], &[]).await,
            Err(ApiError::BadRequest(_))
        ));

        let many: Vec<String> = (0..=ZIP_MAX_PATHS).map(|index| format!("f{index}")).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        assert!(matches!(
            zip_request(&root, &refs, &[]).await,
            Err(ApiError::BadRequest(_))
        ));
    }
}
