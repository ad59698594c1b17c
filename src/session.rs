//! 当前共享会话：根目录、地址与监听器，统一由读写锁保护。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::Request;
use axum::{middleware, response::Response};
use serde::Serialize;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::ApiError;

/// 正在运行的 HTTP 监听器。
pub struct RunningListener {
    pub handle: axum_server::Handle,
    pub task: JoinHandle<io::Result<()>>,
}

/// 一个活动的共享会话。
pub struct ShareSession {
    pub root: PathBuf,
    pub local_ip: IpAddr,
    pub port: u16,
    pub listener: Option<RunningListener>,
}

impl ShareSession {
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            url: format!("http://{}:{}", self.local_ip, self.port),
            port: self.port,
            local_ip: self.local_ip.to_string(),
            shared_folder: self.root.to_string_lossy().into_owned(),
        }
    }
}

/// 提供给桌面端的服务信息。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub url: String,
    pub port: u16,
    #[serde(rename = "localIP")]
    pub local_ip: String,
    pub shared_folder: String,
}

/// 请求进入处理器前解析出的共享根目录。
#[derive(Clone, Debug)]
pub struct ShareRoot(pub PathBuf);

#[derive(Default)]
pub struct SessionSlot {
    current: RwLock<Option<ShareSession>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn root(&self) -> Option<PathBuf> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|session| session.root.clone())
    }

    pub async fn info(&self) -> Option<ServerInfo> {
        self.current.read().await.as_ref().map(ShareSession::info)
    }

    pub async fn is_active(&self) -> bool {
        self.current.read().await.is_some()
    }

    pub async fn install(&self, session: ShareSession) {
        *self.current.write().await = Some(session);
    }

    /// 原地切换根目录与地址，返回更新后的信息；未运行时返回 `None`。
    pub async fn update_root(&self, root: PathBuf, local_ip: Option<IpAddr>) -> Option<ServerInfo> {
        let mut guard = self.current.write().await;
        let session = guard.as_mut()?;
        session.root = root;
        if let Some(ip) = local_ip {
            session.local_ip = ip;
        }
        Some(session.info())
    }

    pub async fn take(&self) -> Option<ShareSession> {
        self.current.write().await.take()
    }
}

/// 会话未运行时拒绝请求，否则为后续处理器注入 `ShareRoot`。
pub async fn require_running(
    Extension(slot): Extension<Arc<SessionSlot>>,
    mut req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    let Some(root) = slot.root().await else {
        return Err(ApiError::BadRequest("服务未启动".into()));
    };
    req.extensions_mut().insert(ShareRoot(root));
    Ok(next.run(req).await)
}
