//! 局域网文件共享服务：把本机的一个文件夹通过 HTTP 提供给同一网络内的设备浏览、
//! 预览、上传、下载与删除。
//!
//! 入口是 [`ShareServer`]：`start` 共享文件夹，`apply_custom_port` 迁移端口，
//! `stop` 停止服务。网页界面与 JSON 接口由同一个 axum 路由提供。

pub mod app;
pub mod archive;
pub mod atomic;
pub mod auth;
pub mod config;
pub mod error;
pub mod etag;
pub mod events;
pub mod files;
pub mod frontend;
pub mod http;
pub mod logging;
pub mod network;
pub mod permissions;
pub mod sandbox;
pub mod server;
pub mod session;
pub mod settings;
pub mod storage;
pub mod upload;
pub mod watcher;

pub use config::{Args, ServerConfig};
pub use error::ShareError;
pub use server::ShareServer;
pub use session::ServerInfo;
pub use settings::{JsonFileSettings, MemorySettings, SettingsStore, SharedSettings};
