//! CLI arguments, runtime configuration and share server defaults.

use clap::Parser;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

pub const SETTING_CUSTOM_PORT: &str = "local-share:custom-port";
pub const SETTING_ACCESS_PASS: &str = "local-share:access-pass";
pub const SETTING_PERMISSIONS: &str = "local-share:permissions";
pub const SETTINGS_DIR_NAME: &str = "local-share";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const MAX_SETTING_KEY_LEN: usize = 256;

pub const TOKEN_HEADER: &str = "x-share-token";
pub const ACCESS_PASS_MAX_LEN: usize = 16;

pub const DEFAULT_TOKEN_TTL_SECS: u64 = 10 * 60;
pub const DEFAULT_TOKEN_RENEW_BEFORE_SECS: u64 = 2 * 60;
pub const DEFAULT_AUTH_RATE_WINDOW_SECS: u64 = 10;
pub const DEFAULT_AUTH_RATE_MAX: u32 = 5;
pub const AUTH_SWEEP_INTERVAL_SECS: u64 = 60;
pub const AUTH_RATE_GC_WINDOWS: u32 = 5;

pub const AUTH_REQUEST_MAX_BYTES: usize = 64 * 1024;
pub const DELETE_REQUEST_MAX_BYTES: usize = 2 * 1024 * 1024;
pub const ZIP_REQUEST_MAX_BYTES: usize = 4 * 1024 * 1024;

pub const ZIP_MAX_PATHS: usize = 200;
pub const ZIP_MAX_FILES: usize = 2000;
pub const ZIP_MAX_TOTAL_BYTES: u64 = 2 * 1024 * 1024 * 1024;
pub const ZIP_STREAM_CHUNK_BYTES: usize = 64 * 1024;
pub const DELETE_MAX_PATHS: usize = 500;

pub const SSE_CLIENT_QUEUE: usize = 16;
pub const DEFAULT_SSE_KEEP_ALIVE_SECS: u64 = 20;
pub const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 250;
pub const WATCH_IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "__pycache__",
    ".cache",
    ".gradle",
    ".m2",
];

pub const DEFAULT_HEADER_READ_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 8;

/// CLI arguments and environment configuration for the share daemon.
#[derive(Parser, Debug)]
#[command(
    name = "local-share",
    version,
    about = "Share a local folder with devices on the same network"
)]
pub struct Args {
    #[arg(
        env = "LOCAL_SHARE_FOLDER",
        help = "Folder to share (defaults to the download directory)"
    )]
    pub folder: Option<String>,
    #[arg(
        long,
        env = "LOCAL_SHARE_SETTINGS",
        help = "Settings file path (defaults to <config dir>/local-share/settings.json)"
    )]
    pub settings_file: Option<PathBuf>,
    #[arg(
        short = 'b',
        long,
        env = "LOCAL_SHARE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "LOCAL_SHARE_PORT",
        help = "Custom port, persisted to settings before start"
    )]
    pub port: Option<String>,
    #[arg(
        long,
        env = "LOCAL_SHARE_ADVERTISE_IP",
        help = "LAN address to advertise instead of auto detection"
    )]
    pub advertise_ip: Option<IpAddr>,
    #[arg(
        long,
        env = "LOCAL_SHARE_TOKEN_TTL_SECS",
        default_value_t = DEFAULT_TOKEN_TTL_SECS,
        help = "Access token lifetime in seconds"
    )]
    pub token_ttl_secs: u64,
    #[arg(
        long,
        env = "LOCAL_SHARE_TOKEN_RENEW_SECS",
        default_value_t = DEFAULT_TOKEN_RENEW_BEFORE_SECS,
        help = "Renew tokens presented within this many seconds of expiry"
    )]
    pub token_renew_secs: u64,
    #[arg(
        long,
        env = "LOCAL_SHARE_AUTH_WINDOW_SECS",
        default_value_t = DEFAULT_AUTH_RATE_WINDOW_SECS,
        help = "Auth rate limit window in seconds"
    )]
    pub auth_window_secs: u64,
    #[arg(
        long,
        env = "LOCAL_SHARE_AUTH_MAX",
        default_value_t = DEFAULT_AUTH_RATE_MAX,
        help = "Max auth requests per client within one window"
    )]
    pub auth_max: u32,
    #[arg(
        long,
        env = "LOCAL_SHARE_SHUTDOWN_TIMEOUT_SECS",
        default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        help = "Graceful shutdown deadline in seconds"
    )]
    pub shutdown_timeout_secs: u64,
    #[arg(
        long,
        env = "LOCAL_SHARE_WATCH_DEBOUNCE_MS",
        default_value_t = DEFAULT_WATCH_DEBOUNCE_MS,
        help = "Directory change debounce in milliseconds"
    )]
    pub watch_debounce_ms: u64,
    #[arg(
        long,
        env = "LOCAL_SHARE_SSE_KEEP_ALIVE_SECS",
        default_value_t = DEFAULT_SSE_KEEP_ALIVE_SECS,
        help = "Event stream keep-alive interval in seconds"
    )]
    pub sse_keep_alive_secs: u64,
}

/// 令牌签发与鉴权限流策略。
#[derive(Clone, Copy, Debug)]
pub struct AuthPolicy {
    pub token_ttl: Duration,
    pub renew_before: Duration,
    pub rate_window: Duration,
    pub rate_max: u32,
    pub sweep_interval: Duration,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
            renew_before: Duration::from_secs(DEFAULT_TOKEN_RENEW_BEFORE_SECS),
            rate_window: Duration::from_secs(DEFAULT_AUTH_RATE_WINDOW_SECS),
            rate_max: DEFAULT_AUTH_RATE_MAX,
            sweep_interval: Duration::from_secs(AUTH_SWEEP_INTERVAL_SECS),
        }
    }
}

/// 共享服务运行时配置。
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_host: IpAddr,
    pub advertise_ip: Option<IpAddr>,
    pub auth: AuthPolicy,
    pub header_read_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub watch_debounce: Duration,
    pub sse_keep_alive: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_ip: None,
            auth: AuthPolicy::default(),
            header_read_timeout: Duration::from_secs(DEFAULT_HEADER_READ_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            watch_debounce: Duration::from_millis(DEFAULT_WATCH_DEBOUNCE_MS),
            sse_keep_alive: Duration::from_secs(DEFAULT_SSE_KEEP_ALIVE_SECS),
        }
    }
}

impl Args {
    /// 将命令行参数转换为运行时配置。
    pub fn server_config(&self) -> Result<ServerConfig, std::net::AddrParseError> {
        Ok(ServerConfig {
            bind_host: self.host.parse()?,
            advertise_ip: self.advertise_ip,
            auth: AuthPolicy {
                token_ttl: Duration::from_secs(self.token_ttl_secs),
                renew_before: Duration::from_secs(self.token_renew_secs),
                rate_window: Duration::from_secs(self.auth_window_secs),
                rate_max: self.auth_max,
                sweep_interval: Duration::from_secs(AUTH_SWEEP_INTERVAL_SECS),
            },
            header_read_timeout: Duration::from_secs(DEFAULT_HEADER_READ_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            watch_debounce: Duration::from_millis(self.watch_debounce_ms),
            sse_keep_alive: Duration::from_secs(self.sse_keep_alive_secs),
        })
    }
}
