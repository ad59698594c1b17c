//! multipart 上传：`path` 字段指定目标目录，`files` 字段为文件内容。

use axum::extract::Extension;
use axum::extract::multipart::{Field, Multipart, MultipartRejection};
use axum::response::Json as JsonResponse;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::atomic::AtomicFile;
use crate::error::ApiError;
use crate::permissions::{Permission, PermissionSet};
use crate::sandbox::{relative_slash_path, safe_join};
use crate::session::ShareRoot;
use crate::settings::SharedSettings;

#[derive(Serialize)]
pub(crate) struct UploadedFile {
    name: String,
    size: u64,
    path: String,
}

#[derive(Serialize)]
pub(crate) struct UploadResponse {
    success: bool,
    message: String,
    files: Vec<UploadedFile>,
}

/// 取客户端文件名的最后一段，拒绝空名与 `.`、`..`。
fn upload_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

async fn prepare_upload_dir(root: &Path, target: &str) -> Result<PathBuf, ApiError> {
    let dir = safe_join(root, target).ok_or_else(|| ApiError::forbidden("无权限上传到此路径"))?;
    fs::create_dir_all(&dir).await.map_err(|err| {
        warn!(path = %dir.display(), error = %err, "create upload dir failed");
        ApiError::Internal("创建目录失败".into())
    })?;
    Ok(dir)
}

/// 没有删除权限时不允许覆盖已有的同名条目。
async fn check_overwrite(out_path: &Path, perms: PermissionSet) -> Result<(), ApiError> {
    if perms.allows(Permission::Delete) {
        return Ok(());
    }
    match fs::metadata(out_path).await {
        Ok(metadata) if metadata.is_dir() => {
            Err(Permission::Delete.denied("无删除权限，不能覆盖同名目录"))
        }
        Ok(_) => Err(Permission::Delete.denied("无删除权限，不能覆盖同名文件")),
        Err(_) => Ok(()),
    }
}

async fn save_field(field: &mut Field<'_>, out_path: &Path) -> Result<u64, ApiError> {
    let write_failed = || ApiError::Internal("写入文件失败".into());
    let mut file = AtomicFile::create(out_path).await.map_err(|err| {
        warn!(path = %out_path.display(), error = %err, "create upload file failed");
        write_failed()
    })?;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                warn!(path = %out_path.display(), error = %err, "read upload stream failed");
                file.discard().await;
                return Err(write_failed());
            }
        };
        if let Err(err) = file.write_chunk(&chunk).await {
            warn!(path = %out_path.display(), error = %err, "write upload chunk failed");
            file.discard().await;
            return Err(write_failed());
        }
    }
    debug!(path = %out_path.display(), bytes = file.written(), "upload stream finished");
    file.commit().await.map_err(|err| {
        warn!(path = %out_path.display(), error = %err, "commit upload failed");
        write_failed()
    })
}

/// `POST /api/upload`：上传一个或多个文件到指定目录。
pub async fn upload_files(
    Extension(ShareRoot(root)): Extension<ShareRoot>,
    Extension(settings): Extension<SharedSettings>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let perms = PermissionSet::load(settings.as_ref());
    perms.require(Permission::Write)?;
    let mut multipart = multipart.map_err(|_| ApiError::BadRequest("解析上传数据失败".into()))?;
    let parse_failed = || ApiError::BadRequest("解析上传数据失败".into());

    let mut target = String::new();
    let mut upload_dir: Option<PathBuf> = None;
    let mut uploaded = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(|_| parse_failed())? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("path") => {
                if upload_dir.is_some() {
                    return Err(ApiError::BadRequest("path 字段必须位于文件之前".into()));
                }
                target = field.text().await.map_err(|_| parse_failed())?;
            }
            Some("files") => {
                let name = field
                    .file_name()
                    .and_then(upload_file_name)
                    .ok_or_else(|| ApiError::BadRequest("文件名无效".into()))?;
                let dir = match &upload_dir {
                    Some(dir) => dir.clone(),
                    None => {
                        let dir = prepare_upload_dir(&root, &target).await?;
                        upload_dir = Some(dir.clone());
                        dir
                    }
                };
                let out_path = dir.join(&name);
                check_overwrite(&out_path, perms).await?;
                let size = save_field(&mut field, &out_path).await?;
                let path = relative_slash_path(&root, &out_path).unwrap_or_else(|| name.clone());
                debug!(path = path.as_str(), size, "file uploaded");
                uploaded.push(UploadedFile { name, size, path });
            }
            _ => {}
        }
    }

    if uploaded.is_empty() {
        return Err(ApiError::BadRequest("没有上传文件".into()));
    }
    info!(dir = target.as_str(), count = uploaded.len(), "upload complete");
    Ok(JsonResponse(UploadResponse {
        success: true,
        message: format!("成功上传 {} 个文件", uploaded.len()),
        files: uploaded,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SETTING_PERMISSIONS;
    use crate::settings::{MemorySettings, SettingsStore};
    use axum::body::Body as AxumBody;
    use axum::extract::FromRequest;
    use axum::http::{Request, header};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    const BOUNDARY: &str = "X-SHARE-BOUNDARY";

    fn make_root() -> (tempfile::TempDir, PathBuf) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("share");
        std::fs::create_dir_all(&root).expect("create share root");
        (temp, root)
    }

    fn multipart_body(path: Option<&str>, files: &[(&str, &str)]) -> String {
        let mut body = String::new();
        if let Some(path) = path {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"path\"\r\n\r\n{path}\r\n"
            ));
        }
        for (name, content) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    async fn upload(
        root: &Path,
        settings: SharedSettings,
        body: String,
    ) -> Result<JsonResponse<UploadResponse>, ApiError> {
        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from(body))
            .expect("request");
        let multipart = Multipart::from_request(request, &()).await;
        upload_files(
            Extension(ShareRoot(root.to_path_buf())),
            Extension(settings),
            multipart,
        )
        .await
    }

    #[test]
    fn file_names_keep_only_the_last_segment() {
        assert_eq!(upload_file_name("a/b/c.txt").as_deref(), Some("c.txt"));
        assert_eq!(upload_file_name("C:\\tmp\\x.png").as_deref(), Some("x.png"));
        assert_eq!(upload_file_name(".."), None);
        assert_eq!(upload_file_name("dir/"), None);
    }

    #[tokio::test]
    async fn uploads_into_nested_directory() {
        let (_temp, root) = make_root();
        let settings: SharedSettings = Arc::new(MemorySettings::new());
        let JsonResponse(response) = upload(
            &root,
            settings,
            multipart_body(Some("docs/new"), &[("a.txt", "hello"), ("../b.txt", "world!")]),
        )
        .await
        .expect("upload");

        assert!(response.success);
        assert_eq!(response.message, "成功上传 2 个文件");
        assert_eq!(response.files[0].path, "docs/new/a.txt");
        assert_eq!(response.files[1].name, "b.txt");
        assert_eq!(response.files[1].size, 6);
        assert_eq!(
            std::fs::read(root.join("docs").join("new").join("b.txt")).expect("read"),
            b"world!"
        );
    }

    #[tokio::test]
    async fn refuses_overwrite_without_delete_permission() {
        let (_temp, root) = make_root();
        std::fs::write(root.join("a.txt"), b"old").expect("seed");
        let settings: SharedSettings = Arc::new(MemorySettings::new());

        let result = upload(&root, settings.clone(), multipart_body(None, &[("a.txt", "new")])).await;
        assert!(matches!(
            result,
            Err(ApiError::Forbidden { code: Some("PERMISSION_DENIED_DELETE"), .. })
        ));
        assert_eq!(std::fs::read(root.join("a.txt")).expect("read"), b"old");

        settings
            .set(SETTING_PERMISSIONS, json!({ "delete": true }))
            .expect("set permissions");
        upload(&root, settings, multipart_body(None, &[("a.txt", "new")]))
            .await
            .expect("overwrite");
        assert_eq!(std::fs::read(root.join("a.txt")).expect("read"), b"new");
    }

    #[tokio::test]
    async fn refuses_to_replace_directory_without_delete_permission() {
        let (_temp, root) = make_root();
        std::fs::create_dir_all(root.join("target")).expect("mkdir");
        std::fs::write(root.join("target").join("keep.txt"), b"keep").expect("seed");
        let settings: SharedSettings = Arc::new(MemorySettings::new());
        settings
            .set(SETTING_PERMISSIONS, json!({ "delete": false }))
            .expect("set permissions");

        let result = upload(&root, settings, multipart_body(None, &[("target", "file")])).await;
        assert!(matches!(
            result,
            Err(ApiError::Forbidden { code: Some("PERMISSION_DENIED_DELETE"), ref message })
                if message.contains("同名目录")
        ));
        assert!(root.join("target").is_dir());
        assert_eq!(
            std::fs::read(root.join("target").join("keep.txt")).expect("read"),
            b"keep"
        );
    }

    #[tokio::test]
    async fn rejects_escape_missing_files_and_read_only_mode() {
        let (_temp, root) = make_root();
        let settings: SharedSettings = Arc::new(MemorySettings::new());

        let escaped = upload(&root, settings.clone(), multipart_body(Some("../out"), &[("a.txt", "x")])).await;
        assert!(matches!(escaped, Err(ApiError::Forbidden { code: None, .. })));

        let empty = upload(&root, settings.clone(), multipart_body(Some("docs"), &[])).await;
        assert!(matches!(empty, Err(ApiError::BadRequest(_))));

        settings
            .set(SETTING_PERMISSIONS, json!({ "write": false }))
            .expect("set permissions");
        let denied = upload(&root, settings, multipart_body(None, &[("a.txt", "x")])).await;
        assert!(matches!(
            denied,
            Err(ApiError::Forbidden { code: Some("PERMISSION_DENIED_WRITE"), .. })
        ));
    }
}
