//! 登录会话、上传接口访问控制与登录限流。

use axum::extract::{Extension, Json, connect_info::ConnectInfo};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{body::Body as AxumBody, middleware};
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::{CookieJar, TypedHeader};
use axum_extra::headers::{Authorization, authorization::Basic};
use cookie::time::Duration as CookieDuration;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AUTH_COOKIE_NAME;
use crate::error::ApiError;
use crate::http::{RequestScheme, is_https_request, resolve_client_ip};

/// Paths that require a logged-in session.
const PROTECTED_PATHS: &[&str] = &["/api/upload"];

/// Single-user credentials plus the session store and login throttle.
#[derive(Debug)]
pub struct AuthConfig {
    username: String,
    password: String,
    pub sessions: SessionStore,
    pub throttle: LoginThrottle,
}

impl AuthConfig {
    pub fn new(username: String, password: String, session_ttl: Duration) -> Self {
        Self {
            username,
            password,
            sessions: SessionStore::new(session_ttl),
            throttle: LoginThrottle::disabled(),
        }
    }

    /// Enables per-IP login throttling.
    pub fn with_login_limit(
        mut self,
        max_attempts: u32,
        window: Duration,
        lockout: Duration,
    ) -> Self {
        self.throttle = LoginThrottle::new(max_attempts, window, lockout);
        self
    }

    /// The username is matched case-insensitively, the password exactly.
    pub fn credentials_match(&self, username: &str, password: &str) -> bool {
        username.to_lowercase() == self.username.to_lowercase() && password == self.password
    }
}

/// 会话令牌到登录用户的映射。
#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl SessionStore {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Opens a session and returns its token.
    pub async fn open(&self, username: String) -> String {
        let token = Uuid::new_v4().to_string();
        let expires_at = Instant::now() + self.ttl;
        self.entries
            .lock()
            .await
            .insert(token.clone(), (username, expires_at));
        token
    }

    /// The user behind a live token. Expired tokens are dropped on sight.
    pub async fn user(&self, token: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(token) {
            Some((username, expires_at)) if *expires_at > Instant::now() => Some(username.clone()),
            Some(_) => {
                entries.remove(token);
                None
            }
            None => None,
        }
    }

    pub async fn close(&self, token: &str) -> Option<String> {
        self.entries
            .lock()
            .await
            .remove(token)
            .map(|(username, _)| username)
    }

    pub async fn prune(&self) {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .retain(|_, (_, expires_at)| *expires_at > now);
    }
}

#[derive(Debug, Clone, Copy)]
struct Attempts {
    window_start: Instant,
    failures: u32,
    locked_until: Option<Instant>,
}

/// 按客户端 IP 统计登录失败次数，超过阈值后锁定一段时间。
#[derive(Debug)]
pub struct LoginThrottle {
    max_failures: u32,
    window: Duration,
    lockout: Duration,
    clients: Mutex<HashMap<IpAddr, Attempts>>,
}

impl LoginThrottle {
    fn new(max_failures: u32, window: Duration, lockout: Duration) -> Self {
        Self {
            max_failures,
            window,
            lockout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn disabled() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Seconds the client still has to wait, if it is locked out.
    pub async fn retry_after(&self, ip: IpAddr) -> Option<u64> {
        if self.max_failures == 0 {
            return None;
        }
        let now = Instant::now();
        let clients = self.clients.lock().await;
        let locked_until = clients.get(&ip)?.locked_until?;
        (now < locked_until).then(|| (locked_until - now).as_secs().max(1))
    }

    pub async fn record_failure(&self, ip: IpAddr) {
        if self.max_failures == 0 {
            return;
        }
        let now = Instant::now();
        let mut clients = self.clients.lock().await;
        let attempts = clients.entry(ip).or_insert(Attempts {
            window_start: now,
            failures: 0,
            locked_until: None,
        });
        let lock_expired = attempts.locked_until.is_some_and(|until| until <= now);
        if lock_expired || now.duration_since(attempts.window_start) > self.window {
            *attempts = Attempts {
                window_start: now,
                failures: 0,
                locked_until: None,
            };
        }
        attempts.failures = attempts.failures.saturating_add(1);
        if attempts.failures >= self.max_failures {
            attempts.locked_until = Some(now + self.lockout);
            warn!(client_ip = %ip, "login locked out");
        }
    }

    pub async fn forget(&self, ip: IpAddr) {
        self.clients.lock().await.remove(&ip);
    }

    /// Drops records whose window and lockout have both run out.
    pub async fn prune(&self) {
        let now = Instant::now();
        self.clients.lock().await.retain(|_, attempts| match attempts.locked_until {
            Some(until) => until > now,
            None => now.duration_since(attempts.window_start) <= self.window,
        });
    }
}

/// 访问控制中间件：上传接口需要会话 Cookie 或 Basic 认证。
///
/// Unauthenticated callers see a plain 404 so the upload endpoint is not
/// advertised.
pub async fn auth_middleware(
    Extension(auth): Extension<Arc<AuthConfig>>,
    jar: CookieJar,
    basic: Option<TypedHeader<Authorization<Basic>>>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    if !is_protected_path(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    if let Some(cookie) = jar.get(AUTH_COOKIE_NAME)
        && let Some(username) = auth.sessions.user(cookie.value()).await
    {
        debug!(username, "session accepted");
        return Ok(next.run(req).await);
    }

    if let Some(TypedHeader(basic)) = basic
        && auth.credentials_match(basic.username(), basic.password())
    {
        return Ok(next.run(req).await);
    }

    Err(ApiError::NotFound("Seite nicht gefunden".into()))
}

#[derive(Deserialize)]
pub(crate) struct LoginForm {
    username: String,
    password: String,
}

/// 登录接口：创建会话并写入 Cookie。
pub async fn auth_login(
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(scheme): Extension<RequestScheme>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(form): Json<LoginForm>,
) -> Result<(CookieJar, Response), ApiError> {
    let client_ip = resolve_client_ip(&headers, Some(peer.ip())).unwrap_or(peer.ip());

    if let Some(retry_after) = auth.throttle.retry_after(client_ip).await {
        return Err(ApiError::TooManyRequests(retry_after));
    }
    if !auth.credentials_match(&form.username, &form.password) {
        auth.throttle.record_failure(client_ip).await;
        return Err(ApiError::Unauthorized(HeaderMap::new()));
    }
    auth.throttle.forget(client_ip).await;

    let username = form.username.to_lowercase();
    info!(client_ip = %client_ip, username, "login");
    let token = auth.sessions.open(username).await;

    let cookie = Cookie::build((AUTH_COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .secure(is_https_request(&headers, scheme))
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(
            i64::try_from(auth.sessions.ttl().as_secs()).unwrap_or(i64::MAX),
        ))
        .build();
    Ok((jar.add(cookie), StatusCode::NO_CONTENT.into_response()))
}

/// 登出接口：清理会话并删除 Cookie。
pub async fn auth_logout(
    Extension(auth): Extension<Arc<AuthConfig>>,
    jar: CookieJar,
) -> (CookieJar, StatusCode) {
    if let Some(cookie) = jar.get(AUTH_COOKIE_NAME)
        && let Some(username) = auth.sessions.close(cookie.value()).await
    {
        info!(username, "logout");
    }
    let removal = Cookie::build(AUTH_COOKIE_NAME).path("/").build();
    (jar.remove(removal), StatusCode::NO_CONTENT)
}

/// 查询当前登录状态。
pub async fn auth_status(
    Extension(auth): Extension<Arc<AuthConfig>>,
    jar: CookieJar,
) -> StatusCode {
    match jar.get(AUTH_COOKIE_NAME) {
        Some(cookie) if auth.sessions.user(cookie.value()).await.is_some() => {
            StatusCode::NO_CONTENT
        }
        _ => StatusCode::UNAUTHORIZED,
    }
}

fn is_protected_path(path: &str) -> bool {
    PROTECTED_PATHS.contains(&path.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn auth() -> AuthConfig {
        AuthConfig::new("upload".into(), "3242".into(), Duration::from_secs(60))
            .with_login_limit(2, Duration::from_secs(60), Duration::from_secs(600))
    }

    async fn attempt(
        auth: &Arc<AuthConfig>,
        username: &str,
        password: &str,
    ) -> Result<(CookieJar, Response), ApiError> {
        auth_login(
            Extension(auth.clone()),
            Extension(RequestScheme::Http),
            ConnectInfo(SocketAddr::from((Ipv4Addr::LOCALHOST, 40000))),
            HeaderMap::new(),
            CookieJar::new(),
            Json(LoginForm {
                username: username.into(),
                password: password.into(),
            }),
        )
        .await
    }

    #[test]
    fn only_the_upload_endpoint_is_protected() {
        assert!(is_protected_path("/api/upload"));
        assert!(is_protected_path("/api/upload/"));
        assert!(!is_protected_path("/api/upload/config"));
        assert!(!is_protected_path("/api/auth/login"));
        assert!(!is_protected_path("/"));
    }

    #[test]
    fn username_is_case_insensitive() {
        let auth = auth();
        assert!(auth.credentials_match("Upload", "3242"));
        assert!(!auth.credentials_match("upload", "3243"));
    }

    #[tokio::test]
    async fn successful_login_creates_session_cookie() {
        let auth = Arc::new(auth());

        let (jar, response) = attempt(&auth, "UPLOAD", "3242")
            .await
            .unwrap_or_else(|_| panic!("login failed"));

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let token = jar.get(AUTH_COOKIE_NAME).expect("cookie").value().to_string();
        assert_eq!(auth.sessions.user(&token).await.as_deref(), Some("upload"));
    }

    #[tokio::test]
    async fn logout_closes_the_session() {
        let auth = Arc::new(auth());
        let token = auth.sessions.open("upload".into()).await;
        let jar = CookieJar::new().add(Cookie::new(AUTH_COOKIE_NAME, token.clone()));

        let (_, status) = auth_logout(Extension(auth.clone()), jar.clone()).await;

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(auth.sessions.user(&token).await, None);
        assert_eq!(
            auth_status(Extension(auth.clone()), jar).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn repeated_failures_lock_the_client_out() {
        let auth = Arc::new(auth());

        assert!(matches!(
            attempt(&auth, "upload", "wrong").await,
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            attempt(&auth, "upload", "wrong").await,
            Err(ApiError::Unauthorized(_))
        ));
        assert!(matches!(
            attempt(&auth, "upload", "3242").await,
            Err(ApiError::TooManyRequests(_))
        ));
    }

    #[tokio::test]
    async fn expired_sessions_are_pruned() {
        let store = SessionStore::new(Duration::ZERO);
        let token = store.open("upload".into()).await;

        store.prune().await;

        assert_eq!(store.user(&token).await, None);
        assert!(store.entries.lock().await.is_empty());
    }
}
