//! 文件列表、下载、预览与批量删除处理器。

use axum::body::Body as AxumBody;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use httpdate::fmt_http_date;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::Metadata;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::config::DELETE_MAX_PATHS;
use crate::error::ApiError;
use crate::etag::{etag_from_metadata, if_range_matches, is_not_modified};
use crate::http::attachment_disposition;
use crate::permissions::{Permission, PermissionSet};
use crate::sandbox::{is_share_root, safe_join};
use crate::session::ShareRoot;
use crate::settings::SharedSettings;
use crate::storage::{DirectoryItem, RemoveError, extension_of, list_directory, remove_entry};

/// 仅按纯文本预览的源码与配置扩展名。
const PLAIN_TEXT_EXTENSIONS: &[&str] = &[
    ".txt", ".log", ".ts", ".go", ".py", ".java", ".c", ".h", ".cpp", ".hpp", ".rs", ".php",
    ".rb", ".cs", ".kt", ".swift", ".sh", ".bat", ".ps1", ".sql", ".toml", ".ini", ".env",
];

#[derive(Deserialize)]
pub(crate) struct PathQuery {
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
pub(crate) struct PathsRequest {
    #[serde(default)]
    paths: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FilesResponse {
    items: Vec<DirectoryItem>,
    root_name: String,
    current_path: String,
    parent_path: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct DeleteResponse {
    success: bool,
    deleted: usize,
    requested: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<BTreeMap<String, String>>,
}

/// 去除空白与重复的路径，保持原有顺序。
pub(crate) fn dedupe_paths(paths: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

fn parent_hint(current: &str) -> Option<String> {
    if current.trim().is_empty() {
        return None;
    }
    let normalized = current.replace('\\', "/");
    let parent = match normalized.rfind('/') {
        Some(index) => normalized[..index].trim_end_matches('/'),
        None => "",
    };
    Some(if parent == "." { String::new() } else { parent.to_string() })
}

fn root_name(root: &Path) -> String {
    root.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.to_string_lossy().into_owned())
}

/// 列出目录内容。
pub async fn list_files(
    Query(query): Query<PathQuery>,
    Extension(ShareRoot(root)): Extension<ShareRoot>,
    Extension(settings): Extension<SharedSettings>,
) -> Result<JsonResponse<FilesResponse>, ApiError> {
    PermissionSet::load(settings.as_ref()).require(Permission::Read)?;
    let full = safe_join(&root, &query.path).ok_or_else(ApiError::sandbox)?;
    match fs::metadata(&full).await {
        Ok(metadata) if metadata.is_dir() => {}
        _ => return Err(ApiError::NotFound("路径不存在".into())),
    }

    let items = list_directory(&full).await.map_err(|err| {
        warn!(path = %full.display(), error = %err, "read directory failed");
        ApiError::Internal("读取文件夹失败".into())
    })?;
    info!(path = query.path.as_str(), count = items.len(), "list files");
    Ok(JsonResponse(FilesResponse {
        items,
        root_name: root_name(&root),
        parent_path: parent_hint(&query.path),
        current_path: query.path,
    }))
}

/// 解析单个文件路径并确认其为文件。
async fn resolve_file(root: &Path, path: &str, dir_error: &str) -> Result<(PathBuf, Metadata), ApiError> {
    if path.trim().is_empty() {
        return Err(ApiError::BadRequest("缺少文件路径参数".into()));
    }
    let full = safe_join(root, path).ok_or_else(|| ApiError::forbidden("无权限访问此文件"))?;
    let metadata = fs::metadata(&full)
        .await
        .map_err(|_| ApiError::NotFound("文件不存在".into()))?;
    if metadata.is_dir() {
        return Err(ApiError::BadRequest(dir_error.into()));
    }
    Ok((full, metadata))
}

/// 以附件形式下载单个文件。
pub async fn download_file(
    Query(query): Query<PathQuery>,
    request_headers: HeaderMap,
    Extension(ShareRoot(root)): Extension<ShareRoot>,
    Extension(settings): Extension<SharedSettings>,
) -> Result<Response, ApiError> {
    PermissionSet::load(settings.as_ref()).require(Permission::Read)?;
    let (full, metadata) = resolve_file(&root, &query.path, "无法下载文件夹").await?;
    let name = full
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mime = mime_guess::from_path(&full).first_or_octet_stream();
    let content_type = HeaderValue::from_str(mime.essence_str())
        .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?;
    serve_file(
        &full,
        &metadata,
        content_type,
        Some(attachment_disposition(&name)),
        &request_headers,
    )
    .await
}

/// 按扩展名推断类型并内联返回文件内容。
pub async fn preview_file(
    Query(query): Query<PathQuery>,
    request_headers: HeaderMap,
    Extension(ShareRoot(root)): Extension<ShareRoot>,
    Extension(settings): Extension<SharedSettings>,
) -> Result<Response, ApiError> {
    PermissionSet::load(settings.as_ref()).require(Permission::Read)?;
    let (full, metadata) = resolve_file(&root, &query.path, "无法预览文件夹").await?;
    let content_type = preview_content_type(&full);
    serve_file(&full, &metadata, content_type, None, &request_headers).await
}

/// 预览用的 Content-Type，无法识别时为 `application/octet-stream`。
pub fn preview_content_type(path: &Path) -> HeaderValue {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = extension_of(&name);
    if PLAIN_TEXT_EXTENSIONS.contains(&ext.as_str()) {
        return HeaderValue::from_static("text/plain; charset=utf-8");
    }

    let guessed = mime_guess::from_ext(ext.trim_start_matches('.')).first();
    let value = match guessed {
        Some(mime) if mime.type_() == mime_guess::mime::IMAGE => mime.essence_str().to_string(),
        Some(mime)
            if mime.type_() == mime_guess::mime::TEXT
                || matches!(mime.subtype().as_str(), "json" | "xml" | "javascript") =>
        {
            format!("{}; charset=utf-8", mime.essence_str())
        }
        _ => return HeaderValue::from_static("application/octet-stream"),
    };
    HeaderValue::from_str(&value).unwrap_or(HeaderValue::from_static("application/octet-stream"))
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|_| ApiError::Internal("响应头构建失败".into()))
}

/// 输出文件内容，支持单段 Range、ETag 与 Last-Modified。
pub async fn serve_file(
    full: &Path,
    metadata: &Metadata,
    content_type: HeaderValue,
    disposition: Option<HeaderValue>,
    request_headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let file_size = metadata.len();
    let modified = metadata.modified().ok();
    let etag = etag_from_metadata(metadata);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, content_type);
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(header::ETAG, header_value(&etag)?);
    if let Some(modified) = modified {
        response_headers.insert(header::LAST_MODIFIED, header_value(&fmt_http_date(modified))?);
    }
    if let Some(disposition) = disposition {
        response_headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    if is_not_modified(request_headers, &etag, modified) {
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    let range = if if_range_matches(request_headers, &etag, modified) {
        parse_range(request_headers.get(header::RANGE), file_size)?
    } else {
        None
    };

    let mut file = File::open(full).await.map_err(|err| {
        warn!(path = %full.display(), error = %err, "open file failed");
        ApiError::Internal("读取文件失败".into())
    })?;

    if let Some((start, end)) = range {
        let length = end - start + 1;
        debug!(path = %full.display(), start, end, length, "range request accepted");
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|_| ApiError::Internal("读取文件失败".into()))?;
        response_headers.insert(
            header::CONTENT_RANGE,
            header_value(&format!("bytes {start}-{end}/{file_size}"))?,
        );
        response_headers.insert(header::CONTENT_LENGTH, header_value(&length.to_string())?);
        let stream = ReaderStream::new(file.take(length));
        return Ok((
            StatusCode::PARTIAL_CONTENT,
            response_headers,
            AxumBody::from_stream(stream),
        )
            .into_response());
    }

    response_headers.insert(header::CONTENT_LENGTH, header_value(&file_size.to_string())?);
    info!(path = %full.display(), size = file_size, "serve file");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// 解析 Range 头，返回可读取的闭区间。
fn parse_range(
    value: Option<&HeaderValue>,
    file_size: u64,
) -> Result<Option<(u64, u64)>, ApiError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let Some(range) = value.to_str().ok().and_then(|v| v.strip_prefix("bytes=")) else {
        return Ok(None);
    };
    if range.contains(',') {
        return Ok(None);
    }
    if file_size == 0 {
        return Err(ApiError::RangeNotSatisfiable(file_size));
    }

    let invalid = || ApiError::RangeNotSatisfiable(file_size);
    let (start_part, end_part) = range.split_once('-').ok_or_else(invalid)?;
    let (start, end) = if start_part.trim().is_empty() {
        let suffix: u64 = end_part.trim().parse().map_err(|_| invalid())?;
        if suffix == 0 {
            return Err(invalid());
        }
        (file_size.saturating_sub(suffix), file_size - 1)
    } else {
        let start: u64 = start_part.trim().parse().map_err(|_| invalid())?;
        let end = if end_part.trim().is_empty() {
            file_size - 1
        } else {
            end_part
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid())?
                .min(file_size - 1)
        };
        (start, end)
    };

    if start > end || start >= file_size {
        return Err(invalid());
    }
    Ok(Some((start, end)))
}

/// 批量删除，单项失败收集到 `errors` 中，不回滚已成功的项。
pub async fn delete_paths(
    Extension(ShareRoot(root)): Extension<ShareRoot>,
    Extension(settings): Extension<SharedSettings>,
    payload: Result<Json<PathsRequest>, JsonRejection>,
) -> Result<JsonResponse<DeleteResponse>, ApiError> {
    PermissionSet::load(settings.as_ref()).require(Permission::Delete)?;
    let Json(request) = payload.map_err(|_| ApiError::BadRequest("请求体解析失败".into()))?;

    let paths = dedupe_paths(request.paths);
    if paths.is_empty() {
        return Err(ApiError::BadRequest("未选择任何内容".into()));
    }
    if paths.len() > DELETE_MAX_PATHS {
        return Err(ApiError::BadRequest(format!(
            "一次最多删除 {DELETE_MAX_PATHS} 个路径"
        )));
    }

    let mut deleted = 0;
    let mut errors = BTreeMap::new();
    for rel in &paths {
        let Some(full) = safe_join(&root, rel) else {
            errors.insert(rel.clone(), "无权限".to_string());
            continue;
        };
        if is_share_root(&root, &full) {
            errors.insert(rel.clone(), "禁止删除根目录".to_string());
            continue;
        }
        if fs::symlink_metadata(&full).await.is_err() {
            errors.insert(rel.clone(), "不存在".to_string());
            continue;
        }
        match remove_entry(&full).await {
            Ok(()) => deleted += 1,
            Err(RemoveError::Trash(err)) => {
                warn!(path = rel.as_str(), error = %err, "move to trash failed");
                errors.insert(rel.clone(), "移入回收站失败".to_string());
            }
            Err(RemoveError::Remove(err)) => {
                warn!(path = rel.as_str(), error = %err, "delete failed");
                errors.insert(rel.clone(), "删除失败".to_string());
            }
        }
    }

    info!(deleted, requested = paths.len(), failed = errors.len(), "delete paths");
    Ok(JsonResponse(DeleteResponse {
        success: true,
        deleted,
        requested: paths.len(),
        errors: (!errors.is_empty()).then_some(errors),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SETTING_PERMISSIONS;
    use crate::settings::{MemorySettings, SettingsStore};
    use axum::body::to_bytes;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn make_root() -> (tempfile::TempDir, ShareRoot) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("share");
        std::fs::create_dir_all(&root).expect("create share root");
        (temp, ShareRoot(root))
    }

    fn settings_with(perms: serde_json::Value) -> SharedSettings {
        let store = MemorySettings::new();
        store.set(SETTING_PERMISSIONS, perms).expect("set permissions");
        Arc::new(store)
    }

    fn default_settings() -> SharedSettings {
        Arc::new(MemorySettings::new())
    }

    fn query(path: &str) -> Query<PathQuery> {
        Query(PathQuery {
            path: path.to_string(),
        })
    }

    #[tokio::test]
    async fn list_rejects_traversal() {
        let (_temp, root) = make_root();
        let result = list_files(query("../"), Extension(root), Extension(default_settings())).await;
        assert!(matches!(result, Err(ApiError::Forbidden { code: None, .. })));
    }

    #[tokio::test]
    async fn list_reports_parent_path() {
        let (_temp, root) = make_root();
        std::fs::create_dir_all(root.0.join("a").join("b")).expect("mkdir");

        let JsonResponse(top) = list_files(query(""), Extension(root.clone()), Extension(default_settings()))
            .await
            .expect("list root");
        assert_eq!(top.parent_path, None);
        assert_eq!(top.root_name, "share");

        let JsonResponse(nested) = list_files(query("a/b"), Extension(root.clone()), Extension(default_settings()))
            .await
            .expect("list nested");
        assert_eq!(nested.parent_path.as_deref(), Some("a"));

        let JsonResponse(first) = list_files(query("a"), Extension(root.clone()), Extension(default_settings()))
            .await
            .expect("list first level");
        assert_eq!(first.parent_path.as_deref(), Some(""));

        let missing = list_files(query("nope"), Extension(root), Extension(default_settings())).await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_requires_read_permission() {
        let (_temp, root) = make_root();
        let result = list_files(query(""), Extension(root), Extension(settings_with(json!({ "read": false })))).await;
        assert!(matches!(
            result,
            Err(ApiError::Forbidden {
                code: Some("PERMISSION_DENIED_READ"),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn download_rejects_directories_and_missing_path() {
        let (_temp, root) = make_root();
        std::fs::create_dir(root.0.join("dir")).expect("mkdir");

        let dir = download_file(query("dir"), HeaderMap::new(), Extension(root.clone()), Extension(default_settings())).await;
        assert!(matches!(dir, Err(ApiError::BadRequest(_))));

        let empty = download_file(query(" "), HeaderMap::new(), Extension(root), Extension(default_settings())).await;
        assert!(matches!(empty, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn download_sets_attachment_and_supports_ranges() {
        let (_temp, root) = make_root();
        std::fs::write(root.0.join("报告.txt"), b"0123456789").expect("write");

        let full = download_file(query("报告.txt"), HeaderMap::new(), Extension(root.clone()), Extension(default_settings()))
            .await
            .expect("download");
        assert_eq!(full.status(), StatusCode::OK);
        assert_eq!(
            full.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename*=UTF-8''%E6%8A%A5%E5%91%8A.txt"
        );
        let body = to_bytes(full.into_body(), usize::MAX).await.expect("body");
        assert_eq!(&body[..], b"0123456789");

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=2-5"));
        let partial = download_file(query("报告.txt"), headers, Extension(root), Extension(default_settings()))
            .await
            .expect("range");
        assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(partial.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
        let body = to_bytes(partial.into_body(), usize::MAX).await.expect("body");
        assert_eq!(&body[..], b"2345");
    }

    #[test]
    fn preview_types_follow_extension() {
        assert_eq!(preview_content_type(Path::new("main.rs")), "text/plain; charset=utf-8");
        assert_eq!(preview_content_type(Path::new("photo.PNG")), "image/png");
        assert_eq!(
            preview_content_type(Path::new("data.json")),
            "application/json; charset=utf-8"
        );
        assert_eq!(
            preview_content_type(Path::new("archive.7z")),
            "application/octet-stream"
        );
        assert_eq!(preview_content_type(Path::new("README")), "application/octet-stream");
    }

    #[tokio::test]
    async fn delete_collects_partial_failures() {
        let (_temp, root) = make_root();
        std::fs::write(root.0.join("existing.txt"), b"x").expect("write");
        let settings = settings_with(json!({ "delete": true }));

        let JsonResponse(response) = delete_paths(
            Extension(root.clone()),
            Extension(settings),
            Ok(Json(PathsRequest {
                paths: vec![
                    "existing.txt".into(),
                    "missing.txt".into(),
                    " existing.txt ".into(),
                    "".into(),
                    ".".into(),
                    "../outside".into(),
                ],
            })),
        )
        .await
        .expect("delete");

        assert!(response.success);
        assert_eq!(response.requested, 4);
        let errors = response.errors.expect("errors");
        assert_eq!(errors.get("missing.txt").map(String::as_str), Some("不存在"));
        assert_eq!(errors.get(".").map(String::as_str), Some("禁止删除根目录"));
        assert_eq!(errors.get("../outside").map(String::as_str), Some("无权限"));
        if cfg!(not(windows)) {
            assert_eq!(response.deleted, 1);
            assert!(!root.0.join("existing.txt").exists());
        }
        assert!(root.0.exists());
    }

    #[tokio::test]
    async fn delete_requires_permission_and_paths() {
        let (_temp, root) = make_root();
        let denied = delete_paths(
            Extension(root.clone()),
            Extension(default_settings()),
            Ok(Json(PathsRequest {
                paths: vec!["a".into()],
            })),
        )
        .await;
        assert!(matches!(
            denied,
            Err(ApiError::Forbidden {
                code: Some("PERMISSION_DENIED_DELETE"),
                ..
            })
        ));

        let empty = delete_paths(
            Extension(root),
            Extension(settings_with(json!({ "delete": true }))),
            Ok(Json(PathsRequest {
                paths: vec!["  ".into()],
            })),
        )
        .await;
        assert!(matches!(empty, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn delete_rejects_oversized_batch_before_touching_files() {
        let (_temp, root) = make_root();
        let paths: Vec<String> = (0..=DELETE_MAX_PATHS).map(|index| format!("f{index}.txt")).collect();
        for path in &paths {
            std::fs::write(root.0.join(path), b"x").expect("write");
        }

        let result = delete_paths(
            Extension(root.clone()),
            Extension(settings_with(json!({ "delete": true }))),
            Ok(Json(PathsRequest {
                paths: paths.clone(),
            })),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(message)) if message.contains("500")));
        assert!(paths.iter().all(|path| root.0.join(path).exists()));
    }

    #[test]
    fn dedupe_trims_and_keeps_order() {
        assert_eq!(
            dedupe_paths(vec!["b".into(), " a ".into(), "b".into(), "".into()]),
            vec!["b".to_string(), "a".to_string()]
        );
    }
}
