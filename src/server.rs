//! 共享服务生命周期：启动、切换根目录、切换端口与停止。

use axum::Router;
use hyper_util::rt::TokioTimer;
use serde_json::Value;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::app::{AppContext, build_router};
use crate::auth::{AuthManager, is_valid_access_pass};
use crate::config::{SETTING_ACCESS_PASS, SETTING_CUSTOM_PORT, ServerConfig};
use crate::error::ShareError;
use crate::events::{EventHub, EventStreamConfig};
use crate::network::local_ipv4;
use crate::sandbox::clean_path;
use crate::session::{RunningListener, ServerInfo, SessionSlot, ShareSession};
use crate::settings::{self, SettingsError, SharedSettings, is_valid_setting_key, parse_port};
use crate::watcher::WatchController;

/// 共享服务。生命周期操作互斥执行，请求处理只读取会话快照。
pub struct ShareServer {
    config: ServerConfig,
    settings: SharedSettings,
    session: Arc<SessionSlot>,
    auth: Arc<AuthManager>,
    events: EventHub,
    watcher: WatchController,
    transitions: Mutex<()>,
}

impl ShareServer {
    pub fn new(settings: SharedSettings, config: ServerConfig) -> Self {
        let events = EventHub::new();
        Self {
            auth: Arc::new(AuthManager::new(config.auth)),
            session: Arc::new(SessionSlot::new()),
            watcher: WatchController::new(events.clone(), config.watch_debounce),
            events,
            settings,
            config,
            transitions: Mutex::new(()),
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// 与运行中的监听器使用同一份状态的路由。
    pub fn router(&self) -> Router {
        build_router(&AppContext {
            session: self.session.clone(),
            auth: self.auth.clone(),
            settings: self.settings.clone(),
            events: self.events.clone(),
            stream: EventStreamConfig {
                keep_alive: self.config.sse_keep_alive,
            },
        })
    }

    pub async fn is_running(&self) -> bool {
        self.session.is_active().await
    }

    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.session.info().await
    }

    /// 共享指定文件夹。已在运行时只切换根目录与地址，端口保持不变。
    pub async fn start(&self, folder: &str) -> Result<ServerInfo, ShareError> {
        let _transition = self.transitions.lock().await;
        let root = resolve_folder(folder).await?;

        if self.session.is_active().await {
            let ip = self.detect_ip().ok();
            if let Some(info) = self.session.update_root(root.clone(), ip).await {
                self.watcher.reset(&root).await;
                info!(root = %root.display(), port = info.port, "share root updated");
                return Ok(info);
            }
        }

        let ip = self.detect_ip()?;
        let custom = settings::custom_port(self.settings.as_ref()).unwrap_or_else(|err| {
            warn!(error = %err, "custom port setting unreadable");
            None
        });
        let listener = match custom {
            Some(port) => match self.bind(port) {
                Ok(listener) => listener,
                Err(err) => {
                    warn!(port, error = %err, "custom port unavailable, using a random port");
                    self.bind(0).map_err(ShareError::Listen)?
                }
            },
            None => self.bind(0).map_err(ShareError::Listen)?,
        };
        self.launch(root, ip, listener).await
    }

    /// 停止共享；未运行时什么也不做。
    pub async fn stop(&self) {
        let _transition = self.transitions.lock().await;
        self.shutdown_session().await;
    }

    /// 保存自定义端口，并在运行中把服务迁移到该端口。新端口无法绑定时保持原服务不变。
    pub async fn apply_custom_port(&self, input: &str) -> Result<ServerInfo, ShareError> {
        let _transition = self.transitions.lock().await;
        let raw = input.trim();
        if raw.is_empty() {
            return Err(ShareError::EmptyPort);
        }
        let port = parse_port(raw).ok_or(ShareError::InvalidPort)?;
        if let Err(err) = settings::write_setting_blocking(
            self.settings.clone(),
            self.events.clone(),
            SETTING_CUSTOM_PORT.to_string(),
            Some(Value::String(raw.to_string())),
        )
        .await
        {
            warn!(error = %err, "persist custom port failed");
        }

        let (Some(current), Some(root)) = (self.session.info().await, self.session.root().await)
        else {
            return Err(ShareError::NotRunning);
        };
        if current.port == port {
            return Ok(current);
        }

        let listener = self.bind(port).map_err(ShareError::PortUnavailable)?;
        let ip = self.detect_ip()?;
        self.shutdown_session().await;
        self.launch(root, ip, listener).await
    }

    /// 桌面端读取设置。
    pub fn get_setting(&self, key: &str) -> Result<Option<Value>, ShareError> {
        if !is_valid_setting_key(key) {
            return Err(ShareError::InvalidSettingKey);
        }
        Ok(self.settings.get(key)?)
    }

    /// 桌面端写入设置，`None` 或 `null` 表示删除；变更会推送给浏览器。
    pub fn set_setting(&self, key: &str, value: Option<Value>) -> Result<(), ShareError> {
        if !is_valid_setting_key(key) {
            return Err(ShareError::InvalidSettingKey);
        }
        if key == SETTING_ACCESS_PASS
            && let Some(Value::String(pass)) = &value
        {
            let pass = pass.trim();
            if !pass.is_empty() && !is_valid_access_pass(pass) {
                return Err(SettingsError::InvalidAccessPass.into());
            }
        }
        settings::write_setting(self.settings.as_ref(), &self.events, key, value)?;
        debug!(key, "setting written");
        Ok(())
    }

    fn detect_ip(&self) -> Result<IpAddr, ShareError> {
        if let Some(ip) = self.config.advertise_ip {
            return Ok(ip);
        }
        match local_ipv4() {
            Ok(Some(ip)) => Ok(ip),
            Ok(None) => Err(ShareError::NoLocalAddress),
            Err(err) => {
                warn!(error = %err, "enumerate interfaces failed");
                Err(ShareError::NoLocalAddress)
            }
        }
    }

    fn bind(&self, port: u16) -> io::Result<TcpListener> {
        let listener = TcpListener::bind(SocketAddr::new(self.config.bind_host, port))?;
        listener.set_nonblocking(true)?;
        Ok(listener)
    }

    async fn launch(
        &self,
        root: PathBuf,
        local_ip: IpAddr,
        listener: TcpListener,
    ) -> Result<ServerInfo, ShareError> {
        let port = listener.local_addr().map_err(ShareError::Listen)?.port();
        let handle = axum_server::Handle::new();
        let mut server = axum_server::from_tcp(listener).handle(handle.clone());
        server
            .http_builder()
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.config.header_read_timeout);

        let app = self.router();
        let task = tokio::spawn(async move {
            server
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
        });

        let session = ShareSession {
            root: root.clone(),
            local_ip,
            port,
            listener: Some(RunningListener { handle, task }),
        };
        let info = session.info();
        self.session.install(session).await;
        self.watcher.reset(&root).await;
        info!(url = info.url.as_str(), root = %root.display(), "share server started");
        Ok(info)
    }

    /// 先停止接收新连接，再断开事件流与目录监听，超时后强制结束。
    async fn shutdown_session(&self) {
        let Some(session) = self.session.take().await else {
            return;
        };
        if let Some(listener) = &session.listener {
            listener
                .handle
                .graceful_shutdown(Some(self.config.shutdown_timeout));
        }
        self.events.close_all();
        self.watcher.stop().await;

        if let Some(RunningListener { mut task, .. }) = session.listener {
            let deadline = self.config.shutdown_timeout + Duration::from_secs(1);
            match tokio::time::timeout(deadline, &mut task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => warn!(error = %err, "server exited with error"),
                Ok(Err(err)) => warn!(error = %err, "server task failed"),
                Err(_) => {
                    warn!(port = session.port, "graceful shutdown timed out, aborting");
                    task.abort();
                }
            }
        }
        info!(port = session.port, "share server stopped");
    }
}

/// 去掉首尾空白与引号，转为绝对路径并确认是文件夹。
async fn resolve_folder(folder: &str) -> Result<PathBuf, ShareError> {
    let folder = folder.trim().trim_matches('"').trim();
    if folder.is_empty() {
        return Err(ShareError::EmptyFolder);
    }
    let absolute = std::path::absolute(folder).map_err(ShareError::FolderUnavailable)?;
    let root = clean_path(&absolute);
    let metadata = tokio::fs::metadata(&root)
        .await
        .map_err(ShareError::FolderUnavailable)?;
    if !metadata.is_dir() {
        return Err(ShareError::NotADirectory);
    }
    Ok(root)
}
