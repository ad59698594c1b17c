//! 键值设置存储、类型化读取以及 `/api/settings/{key}` 处理器。

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path as AxumPath};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::is_valid_access_pass;
use crate::config::{
    MAX_SETTING_KEY_LEN, SETTING_ACCESS_PASS, SETTING_CUSTOM_PORT, SETTINGS_DIR_NAME,
    SETTINGS_FILE_NAME,
};
use crate::error::ApiError;
use crate::events::{EventHub, SettingsChanged};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("读取设置失败: {0}")]
    Io(#[from] io::Error),
    #[error("设置格式错误: {0}")]
    Json(#[from] serde_json::Error),
    #[error("访问口令配置异常")]
    InvalidAccessPass,
}

/// 注入的键值设置存储。
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError>;
    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError>;
    fn delete(&self, key: &str) -> Result<(), SettingsError>;
}

pub type SharedSettings = Arc<dyn SettingsStore>;

/// 以 JSON 对象文件持久化的设置存储。
pub struct JsonFileSettings {
    path: PathBuf,
    values: Mutex<Option<Map<String, Value>>>,
}

impl JsonFileSettings {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            values: Mutex::new(None),
        }
    }

    /// 用户配置目录下的默认设置文件位置。
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>, SettingsError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(err.into()),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        match serde_json::from_slice::<Map<String, Value>>(&raw) {
            Ok(values) => Ok(values),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "settings file corrupted, starting fresh");
                Ok(Map::new())
            }
        }
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(values)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }

    fn with_values<T>(
        &self,
        f: impl FnOnce(&mut Map<String, Value>) -> Result<T, SettingsError>,
    ) -> Result<T, SettingsError> {
        let mut guard = self.values.lock();
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        match guard.as_mut() {
            Some(values) => f(values),
            None => Err(io::Error::other("settings not loaded").into()),
        }
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        self.with_values(|values| Ok(values.get(key).cloned()))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        self.with_values(|values| {
            values.insert(key.to_string(), value);
            self.persist(values)
        })
    }

    fn delete(&self, key: &str) -> Result<(), SettingsError> {
        self.with_values(|values| {
            if values.remove(key).is_some() {
                self.persist(values)?;
            }
            Ok(())
        })
    }
}

/// 进程内设置存储，供嵌入方与测试使用。
#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), SettingsError> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// 读取访问口令；未设置或为空时返回 `None`。
pub fn access_pass(store: &dyn SettingsStore) -> Result<Option<String>, SettingsError> {
    let Some(value) = store.get(SETTING_ACCESS_PASS)? else {
        return Ok(None);
    };
    let pass = match value {
        Value::Null => return Ok(None),
        Value::String(pass) => pass,
        _ => return Err(SettingsError::InvalidAccessPass),
    };
    let pass = pass.trim();
    if pass.is_empty() {
        return Ok(None);
    }
    if !is_valid_access_pass(pass) {
        return Err(SettingsError::InvalidAccessPass);
    }
    Ok(Some(pass.to_string()))
}

/// 读取自定义端口；缺失或无法解析时返回 `None`。
pub fn custom_port(store: &dyn SettingsStore) -> Result<Option<u16>, SettingsError> {
    let port = match store.get(SETTING_CUSTOM_PORT)? {
        Some(Value::String(raw)) => parse_port(&raw),
        Some(Value::Number(number)) => number.as_u64().and_then(|n| u16::try_from(n).ok()),
        _ => None,
    };
    Ok(port.filter(|port| *port > 0))
}

/// 解析 1-65535 之间的端口号。
pub fn parse_port(raw: &str) -> Option<u16> {
    raw.trim().parse::<u16>().ok().filter(|port| *port > 0)
}

/// 设置键：非空、不超过 256 字符、不含路径分隔符。
pub fn is_valid_setting_key(key: &str) -> bool {
    !key.is_empty()
        && key.chars().count() <= MAX_SETTING_KEY_LEN
        && !key.contains(['/', '\\'])
}

/// 写入（或在值为空时删除）设置并广播变更。
pub fn write_setting(
    store: &dyn SettingsStore,
    events: &EventHub,
    key: &str,
    value: Option<Value>,
) -> Result<(), SettingsError> {
    let value = value.filter(|value| !value.is_null());
    match &value {
        Some(value) => store.set(key, value.clone())?,
        None => store.delete(key)?,
    }
    events.broadcast(
        "settingsChanged",
        &SettingsChanged {
            key,
            value: value.as_ref(),
        },
    );
    Ok(())
}

/// 文件存储的读写在阻塞线程池中执行，不占用运行时工作线程。
async fn run_blocking<T, F>(f: F) -> Result<T, SettingsError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SettingsError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| SettingsError::Io(io::Error::other(err)))?
}

/// 异步上下文中的 [`write_setting`]。
pub async fn write_setting_blocking(
    store: SharedSettings,
    events: EventHub,
    key: String,
    value: Option<Value>,
) -> Result<(), SettingsError> {
    run_blocking(move || write_setting(store.as_ref(), &events, &key, value)).await
}

#[derive(Serialize)]
pub(crate) struct SettingValue {
    value: Value,
}

#[derive(Deserialize)]
pub(crate) struct SettingUpdate {
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Serialize)]
pub(crate) struct SettingUpdated {
    ok: bool,
}

fn checked_key(key: &str) -> Result<(), ApiError> {
    if key == SETTING_ACCESS_PASS {
        return Err(ApiError::NotFound("设置不存在".into()));
    }
    if !is_valid_setting_key(key) {
        return Err(ApiError::BadRequest("无效的设置键".into()));
    }
    Ok(())
}

fn settings_failure(err: SettingsError) -> ApiError {
    warn!(error = %err, "settings store failure");
    ApiError::Internal("读取设置失败".into())
}

/// 读取单个设置项。
pub async fn get_setting(
    AxumPath(key): AxumPath<String>,
    Extension(settings): Extension<SharedSettings>,
) -> Result<Json<SettingValue>, ApiError> {
    checked_key(&key)?;
    let value = run_blocking(move || settings.get(&key))
        .await
        .map_err(settings_failure)?
        .ok_or_else(|| ApiError::NotFound("设置不存在".into()))?;
    Ok(Json(SettingValue { value }))
}

/// 写入单个设置项，`null` 或缺省值表示删除。
pub async fn put_setting(
    AxumPath(key): AxumPath<String>,
    Extension(settings): Extension<SharedSettings>,
    Extension(events): Extension<EventHub>,
    payload: Result<Json<SettingUpdate>, JsonRejection>,
) -> Result<Json<SettingUpdated>, ApiError> {
    checked_key(&key)?;
    let Json(update) = payload.map_err(|_| ApiError::BadRequest("请求体解析失败".into()))?;
    write_setting_blocking(settings, events, key.clone(), update.value)
        .await
        .map_err(|err| {
            warn!(key = key.as_str(), error = %err, "settings write failed");
            ApiError::Internal("保存设置失败".into())
        })?;
    info!(key = key.as_str(), "setting updated");
    Ok(Json(SettingUpdated { ok: true }))
}

/// 缺少设置键的请求。
pub async fn missing_setting_key() -> ApiError {
    ApiError::BadRequest("缺少设置键".into())
}
