//! 访问口令换取令牌、令牌校验续期与鉴权接口限流。

use axum::body::Body as AxumBody;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json, Query, connect_info::ConnectInfo};
use axum::http::Request;
use axum::{middleware, response::Response};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ACCESS_PASS_MAX_LEN, AUTH_RATE_GC_WINDOWS, AuthPolicy, TOKEN_HEADER};
use crate::error::{ApiError, CODE_AUTH_INVALID};
use crate::settings::{self, SharedSettings};

pub type PassHash = [u8; 32];

#[derive(Debug)]
struct TokenEntry {
    expires_at: Instant,
    client_ip: Option<IpAddr>,
    pass_hash: PassHash,
}

#[derive(Debug)]
struct RateWindow {
    window_start: Instant,
    count: u32,
}

#[derive(Debug)]
struct AuthState {
    tokens: HashMap<String, TokenEntry>,
    rate: HashMap<IpAddr, RateWindow>,
    last_sweep: Instant,
    last_rate_gc: Instant,
}

/// 已签发的令牌。
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: u64,
}

/// 令牌表与限流表，由同一把锁保护，清理按间隔摊销。
#[derive(Debug)]
pub struct AuthManager {
    policy: AuthPolicy,
    state: Mutex<AuthState>,
}

impl AuthManager {
    pub fn new(policy: AuthPolicy) -> Self {
        let now = Instant::now();
        Self {
            policy,
            state: Mutex::new(AuthState {
                tokens: HashMap::new(),
                rate: HashMap::new(),
                last_sweep: now,
                last_rate_gc: now,
            }),
        }
    }

    /// 计入一次鉴权请求；超出配额时返回建议的重试秒数。
    pub async fn check_rate(&self, ip: Option<IpAddr>, now: Instant) -> Result<(), u64> {
        let mut state = self.state.lock().await;
        self.gc_rate_locked(&mut state, now);
        let Some(ip) = ip else {
            return Ok(());
        };
        let window = self.policy.rate_window;
        let entry = state.rate.entry(ip).or_insert(RateWindow {
            window_start: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.window_start) >= window {
            entry.window_start = now;
            entry.count = 0;
        }
        if entry.count >= self.policy.rate_max {
            warn!(client_ip = %ip, "auth rate limited");
            return Err(window.as_secs().max(1));
        }
        entry.count += 1;
        Ok(())
    }

    /// 为客户端签发绑定 IP 与口令哈希的令牌。
    pub async fn issue(&self, ip: Option<IpAddr>, pass_hash: PassHash, now: Instant) -> IssuedToken {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let mut state = self.state.lock().await;
        self.sweep_locked(&mut state, now);
        state.tokens.insert(
            token.clone(),
            TokenEntry {
                expires_at: now + self.policy.token_ttl,
                client_ip: ip,
                pass_hash,
            },
        );
        IssuedToken {
            token,
            expires_in: self.policy.token_ttl.as_secs(),
        }
    }

    /// 校验令牌，临近过期时自动续期。
    pub async fn validate(
        &self,
        token: &str,
        ip: Option<IpAddr>,
        pass_hash: &PassHash,
        now: Instant,
    ) -> bool {
        if token.is_empty() {
            return false;
        }
        let mut state = self.state.lock().await;
        self.sweep_locked(&mut state, now);

        let Some(entry) = state.tokens.get_mut(token) else {
            return false;
        };
        if now > entry.expires_at {
            state.tokens.remove(token);
            return false;
        }
        if !bool::from(entry.pass_hash[..].ct_eq(&pass_hash[..])) {
            state.tokens.remove(token);
            debug!("token issued for a previous access pass");
            return false;
        }
        if let (Some(bound), Some(ip)) = (entry.client_ip, ip)
            && bound != ip
        {
            return false;
        }
        if entry.expires_at.saturating_duration_since(now) <= self.policy.renew_before {
            entry.expires_at = now + self.policy.token_ttl;
        }
        true
    }

    #[cfg(test)]
    async fn token_count(&self) -> usize {
        self.state.lock().await.tokens.len()
    }

    fn sweep_locked(&self, state: &mut AuthState, now: Instant) {
        if now.saturating_duration_since(state.last_sweep) < self.policy.sweep_interval {
            return;
        }
        state.last_sweep = now;
        state.tokens.retain(|_, entry| entry.expires_at >= now);
    }

    fn gc_rate_locked(&self, state: &mut AuthState, now: Instant) {
        if now.saturating_duration_since(state.last_rate_gc) < self.policy.sweep_interval {
            return;
        }
        state.last_rate_gc = now;
        let idle = self.policy.rate_window * AUTH_RATE_GC_WINDOWS;
        state
            .rate
            .retain(|_, entry| now.saturating_duration_since(entry.window_start) <= idle);
    }
}

/// 口令哈希；口令变更后旧令牌随之失效。
pub fn pass_hash(pass: &str) -> PassHash {
    Sha256::digest(pass.as_bytes()).into()
}

/// 访问口令：1-16 位 ASCII 字母或数字。
pub fn is_valid_access_pass(pass: &str) -> bool {
    !pass.is_empty()
        && pass.len() <= ACCESS_PASS_MAX_LEN
        && pass.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct AuthLoginRequest {
    #[serde(default)]
    pass: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthLoginResponse {
    token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn pass_config_error(err: settings::SettingsError) -> ApiError {
    warn!(error = %err, "access pass setting unreadable");
    ApiError::Internal("访问口令配置异常".into())
}

/// `POST /api/auth`：用访问口令换取令牌。
pub async fn auth_login(
    Extension(auth): Extension<Arc<AuthManager>>,
    Extension(settings): Extension<SharedSettings>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    payload: Result<Json<AuthLoginRequest>, JsonRejection>,
) -> Result<Json<AuthLoginResponse>, ApiError> {
    let Some(pass) = settings::access_pass(settings.as_ref()).map_err(pass_config_error)? else {
        return Ok(Json(AuthLoginResponse {
            token: String::new(),
            expires_in: None,
        }));
    };

    let ip = Some(addr.ip().to_canonical());
    let now = Instant::now();
    if let Err(retry_after) = auth.check_rate(ip, now).await {
        return Err(ApiError::TooManyRequests {
            message: "请求过于频繁，请稍后重试".into(),
            retry_after,
        });
    }

    let Json(request) = payload.map_err(|_| ApiError::BadRequest("请求体解析失败".into()))?;
    let input = request.pass.trim();
    if input.is_empty() {
        return Err(ApiError::auth_required("需要访问口令"));
    }
    if !is_valid_access_pass(input) {
        return Err(ApiError::BadRequest("访问口令格式错误".into()));
    }
    if !bool::from(input.as_bytes().ct_eq(pass.as_bytes())) {
        info!(client_ip = ?ip, "wrong access pass");
        return Err(ApiError::Unauthorized {
            message: "访问口令错误".into(),
            code: CODE_AUTH_INVALID,
        });
    }

    let issued = auth.issue(ip, pass_hash(&pass), now).await;
    info!(client_ip = ?ip, "access token issued");
    Ok(Json(AuthLoginResponse {
        token: issued.token,
        expires_in: Some(issued.expires_in),
    }))
}

/// 鉴权中间件：设置了访问口令时要求有效令牌（请求头优先，其次查询参数）。
pub async fn auth_middleware(
    Extension(auth): Extension<Arc<AuthManager>>,
    Extension(settings): Extension<SharedSettings>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    let Some(pass) = settings::access_pass(settings.as_ref()).map_err(pass_config_error)? else {
        return Ok(next.run(req).await);
    };

    let token = request_token(&req).unwrap_or_default();
    let ip = Some(addr.ip().to_canonical());
    if auth
        .validate(&token, ip, &pass_hash(&pass), Instant::now())
        .await
    {
        return Ok(next.run(req).await);
    }
    Err(ApiError::auth_required("鉴权失败"))
}

fn request_token(req: &Request<AxumBody>) -> Option<String> {
    let from_header = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(token) = from_header {
        return Some(token.to_string());
    }
    Query::<TokenQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(query)| query.token)
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 21));

    #[tokio::test]
    async fn token_is_bound_to_pass_and_ip() {
        let auth = AuthManager::new(AuthPolicy::default());
        let now = Instant::now();
        let hash = pass_hash("abc123");
        let issued = auth.issue(Some(CLIENT), hash, now).await;
        assert_eq!(issued.expires_in, 600);

        assert!(auth.validate(&issued.token, Some(CLIENT), &hash, now).await);
        assert!(!auth.validate(&issued.token, Some(OTHER), &hash, now).await);
        assert!(!auth.validate("unknown", Some(CLIENT), &hash, now).await);
        assert!(!auth.validate("", Some(CLIENT), &hash, now).await);
    }

    #[tokio::test]
    async fn rotating_pass_invalidates_tokens() {
        let auth = AuthManager::new(AuthPolicy::default());
        let now = Instant::now();
        let issued = auth.issue(Some(CLIENT), pass_hash("old1"), now).await;

        assert!(
            !auth
                .validate(&issued.token, Some(CLIENT), &pass_hash("new2"), now)
                .await
        );
        assert_eq!(auth.token_count().await, 0);
        assert!(
            !auth
                .validate(&issued.token, Some(CLIENT), &pass_hash("old1"), now)
                .await
        );
    }

    #[tokio::test]
    async fn tokens_expire_and_renew_near_expiry() {
        let policy = AuthPolicy::default();
        let auth = AuthManager::new(policy);
        let start = Instant::now();
        let hash = pass_hash("abc123");
        let issued = auth.issue(Some(CLIENT), hash, start).await;

        let near_expiry = start + policy.token_ttl - Duration::from_secs(30);
        assert!(auth.validate(&issued.token, Some(CLIENT), &hash, near_expiry).await);

        let after_original_expiry = start + policy.token_ttl + Duration::from_secs(60);
        assert!(
            auth.validate(&issued.token, Some(CLIENT), &hash, after_original_expiry)
                .await
        );

        let long_after = after_original_expiry + policy.token_ttl * 2;
        assert!(!auth.validate(&issued.token, Some(CLIENT), &hash, long_after).await);
    }

    #[tokio::test]
    async fn rate_limit_rejects_excess_within_window() {
        let policy = AuthPolicy::default();
        let auth = AuthManager::new(policy);
        let now = Instant::now();
        for _ in 0..policy.rate_max {
            assert!(auth.check_rate(Some(CLIENT), now).await.is_ok());
        }
        assert_eq!(
            auth.check_rate(Some(CLIENT), now).await,
            Err(policy.rate_window.as_secs())
        );
        assert!(auth.check_rate(Some(OTHER), now).await.is_ok());
        assert!(
            auth.check_rate(Some(CLIENT), now + policy.rate_window)
                .await
                .is_ok()
        );
    }

    #[test]
    fn access_pass_format() {
        assert!(is_valid_access_pass("abc123"));
        assert!(is_valid_access_pass("A"));
        assert!(is_valid_access_pass(&"x".repeat(ACCESS_PASS_MAX_LEN)));
        assert!(!is_valid_access_pass(""));
        assert!(!is_valid_access_pass("with space"));
        assert!(!is_valid_access_pass("密码"));
        assert!(!is_valid_access_pass(&"x".repeat(ACCESS_PASS_MAX_LEN + 1)));
    }
}
