//! local-share 守护进程。
//!
//! 解析命令行参数、打开设置文件，共享指定文件夹直到收到终止信号。

use clap::Parser;
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use local_share::config::{Args, SETTING_CUSTOM_PORT};
use local_share::logging::{DEFAULT_LOG_FILTER, init_logging};
use local_share::settings::parse_port;
use local_share::{JsonFileSettings, MemorySettings, ShareError, ShareServer, SharedSettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging(DEFAULT_LOG_FILTER);

    let args = Args::parse();
    let config = args.server_config()?;

    let settings: SharedSettings = match args
        .settings_file
        .clone()
        .or_else(JsonFileSettings::default_path)
    {
        Some(path) => {
            let store = JsonFileSettings::new(path);
            info!(path = %store.path().display(), "using settings file");
            Arc::new(store)
        }
        None => {
            warn!("no config directory, settings will not persist");
            Arc::new(MemorySettings::new())
        }
    };

    let server = ShareServer::new(settings, config);
    if let Some(port) = args.port.as_deref() {
        let port = port.trim();
        if parse_port(port).is_none() {
            return Err(ShareError::InvalidPort.into());
        }
        server.set_setting(SETTING_CUSTOM_PORT, Some(Value::String(port.to_string())))?;
    }

    let folder = match args.folder.clone() {
        Some(folder) => folder,
        None => dirs::download_dir()
            .map(|dir| dir.to_string_lossy().into_owned())
            .ok_or(ShareError::EmptyFolder)?,
    };
    let info = server.start(&folder).await?;
    info!(
        url = info.url.as_str(),
        folder = info.shared_folder.as_str(),
        "sharing folder"
    );

    shutdown_signal().await;
    server.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("received termination signal, shutting down");
}
