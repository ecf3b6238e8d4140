//! OAuth2 client-credentials token lifecycle for the AppDynamics controller.
//!
//! One cached token guarded by one async mutex. A caller that finds the token
//! missing or inside the buffer window refreshes while holding the lock, so
//! concurrent callers wait for that single refresh instead of issuing their
//! own.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use healwatch_core::config::AppDynamicsConfig;
use healwatch_core::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const TOKEN_PATH: &str = "/controller/api/oauth/access_token";
const REVOKE_PATH: &str = "/controller/api/oauth/revoke_token";
const VALIDATE_PATH: &str = "/controller/rest/applications";
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
const DEFAULT_TOKEN_TYPE: &str = "Bearer";
const DEFAULT_BUFFER_MINUTES: i64 = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("OAuth2 credentials are not configured")]
    MissingCredentials,

    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed token response: {0}")]
    Malformed(String),

    #[error("token request failed: {0}")]
    Transport(String),

    #[error("token request timed out after {0}s")]
    Timeout(u64),
}

impl From<AuthError> for MonitorError {
    fn from(err: AuthError) -> Self {
        MonitorError::Auth(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP calls made by the gateway.
#[async_trait]
pub trait TokenTransport: Send + Sync {
    /// Form-encoded POST authenticated with HTTP basic auth.
    async fn post_form(
        &self,
        url: &str,
        client_id: &str,
        client_secret: &str,
        form: &[(&str, &str)],
    ) -> Result<HttpReply, AuthError>;

    /// GET with a ready-made `Authorization` header value.
    async fn get(&self, url: &str, authorization: &str) -> Result<HttpReply, AuthError>;
}

pub struct ReqwestTokenTransport {
    client: reqwest::Client,
}

impl ReqwestTokenTransport {
    pub fn new(timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    async fn reply(response: reqwest::Response) -> Result<HttpReply, AuthError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(HttpReply { status, body })
    }
}

#[async_trait]
impl TokenTransport for ReqwestTokenTransport {
    async fn post_form(
        &self,
        url: &str,
        client_id: &str,
        client_secret: &str,
        form: &[(&str, &str)],
    ) -> Result<HttpReply, AuthError> {
        let response = self
            .client
            .post(url)
            .basic_auth(client_id, Some(client_secret))
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Self::reply(response).await
    }

    async fn get(&self, url: &str, authorization: &str) -> Result<HttpReply, AuthError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Self::reply(response).await
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    expires_in: Option<i64>,
    token_type: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    token_type: String,
    expires_at: DateTime<Utc>,
}

/// Snapshot of the cached token for health output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub has_token: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub token_type: Option<String>,
    pub seconds_until_expiry: i64,
}

pub struct TokenGateway {
    base_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    buffer: ChronoDuration,
    timeout: Duration,
    configured: bool,
    transport: Arc<dyn TokenTransport>,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenGateway {
    pub fn new(config: &AppDynamicsConfig, transport: Arc<dyn TokenTransport>) -> Self {
        Self {
            base_url: config.base_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
            buffer: ChronoDuration::try_minutes(config.token_buffer_minutes)
                .unwrap_or_else(|| ChronoDuration::minutes(DEFAULT_BUFFER_MINUTES)),
            timeout: Duration::from_secs(config.request_timeout_secs),
            configured: config.has_credentials(),
            transport,
            cached: Mutex::new(None),
        }
    }

    /// Gateway backed by reqwest.
    pub fn from_config(config: &AppDynamicsConfig) -> Result<Self, AuthError> {
        let transport = ReqwestTokenTransport::new(Duration::from_secs(config.request_timeout_secs))?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// A valid access token, refreshing first when none is cached or the
    /// cached one expires within the buffer window.
    pub async fn get_token(&self) -> Result<String, AuthError> {
        self.current().await.map(|t| t.access_token)
    }

    /// `"<type> <token>"`.
    pub async fn authorization_header(&self) -> Result<String, AuthError> {
        self.current()
            .await
            .map(|t| format!("{} {}", t.token_type, t.access_token))
    }

    async fn current(&self) -> Result<CachedToken, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            let refresh_from = Utc::now().checked_add_signed(self.buffer);
            if refresh_from.is_some_and(|t| t < token.expires_at) {
                return Ok(token.clone());
            }
            debug!("Access token inside refresh window");
        }
        self.refresh_locked(&mut cached).await
    }

    /// Force a refresh regardless of the cached expiry.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        self.refresh_locked(&mut cached).await.map(|t| t.access_token)
    }

    async fn refresh_locked(&self, cached: &mut Option<CachedToken>) -> Result<CachedToken, AuthError> {
        match self.request_token().await {
            Ok(token) => {
                metrics::counter!("auth.refresh").increment(1);
                info!(expires_at = %token.expires_at, "Obtained new access token");
                *cached = Some(token.clone());
                Ok(token)
            }
            Err(e) => {
                metrics::counter!("auth.refresh_failed").increment(1);
                warn!(error = %e, "Access token refresh failed");
                *cached = None;
                Err(e)
            }
        }
    }

    async fn request_token(&self) -> Result<CachedToken, AuthError> {
        if !self.configured {
            return Err(AuthError::MissingCredentials);
        }
        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        let mut form = vec![("grant_type", "client_credentials")];
        if !self.scope.is_empty() {
            form.push(("scope", self.scope.as_str()));
        }
        let reply = tokio::time::timeout(
            self.timeout,
            self.transport
                .post_form(&url, &self.client_id, &self.client_secret, &form),
        )
        .await
        .map_err(|_| AuthError::Timeout(self.timeout.as_secs()))??;

        if !reply.is_success() {
            return Err(AuthError::Rejected {
                status: reply.status,
                body: reply.body,
            });
        }
        let parsed: TokenResponse =
            serde_json::from_str(&reply.body).map_err(|e| AuthError::Malformed(e.to_string()))?;
        if parsed.access_token.trim().is_empty() {
            return Err(AuthError::Malformed("empty access_token".into()));
        }
        let expires_in = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_at = ChronoDuration::try_seconds(expires_in)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| AuthError::Malformed(format!("expires_in out of range: {expires_in}")))?;
        Ok(CachedToken {
            access_token: parsed.access_token,
            token_type: parsed
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            expires_at,
        })
    }

    /// Best-effort remote revoke. The local token is always cleared.
    pub async fn revoke(&self) {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.take() {
            let url = format!("{}{}", self.base_url, REVOKE_PATH);
            let form = [("token", token.access_token.as_str())];
            let result = tokio::time::timeout(
                self.timeout,
                self.transport
                    .post_form(&url, &self.client_id, &self.client_secret, &form),
            )
            .await;
            match result {
                Ok(Ok(reply)) if reply.is_success() => info!("Access token revoked"),
                Ok(Ok(reply)) => warn!(status = reply.status, "Token revoke rejected"),
                Ok(Err(e)) => warn!(error = %e, "Token revoke failed"),
                Err(_) => warn!("Token revoke timed out"),
            }
        }
    }

    /// Lightweight authenticated call confirming the controller accepts the
    /// token. Health checks only.
    pub async fn validate(&self) -> bool {
        let header = match self.authorization_header().await {
            Ok(header) => header,
            Err(e) => {
                warn!(error = %e, "Token validation could not obtain a token");
                return false;
            }
        };
        let url = format!("{}{}?output=JSON", self.base_url, VALIDATE_PATH);
        match tokio::time::timeout(self.timeout, self.transport.get(&url, &header)).await {
            Ok(Ok(reply)) => reply.is_success(),
            Ok(Err(e)) => {
                warn!(error = %e, "Token validation failed");
                false
            }
            Err(_) => {
                warn!("Token validation timed out");
                false
            }
        }
    }

    pub async fn token_info(&self) -> TokenInfo {
        let cached = self.cached.lock().await;
        let now = Utc::now();
        match cached.as_ref() {
            Some(token) => TokenInfo {
                has_token: true,
                expires_at: Some(token.expires_at),
                expired: now >= token.expires_at,
                token_type: Some(token.token_type.clone()),
                seconds_until_expiry: (token.expires_at - now).num_seconds().max(0),
            },
            None => TokenInfo {
                has_token: false,
                expires_at: None,
                expired: true,
                token_type: None,
                seconds_until_expiry: 0,
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted transport counting token requests.
    pub(crate) struct CountingTransport {
        pub token_calls: AtomicUsize,
        pub revoke_calls: AtomicUsize,
        pub replies: SyncMutex<Vec<HttpReply>>,
        pub default_reply: HttpReply,
        pub delay: Duration,
        pub validate_status: u16,
    }

    impl CountingTransport {
        pub(crate) fn issuing(expires_in: i64) -> Self {
            Self {
                token_calls: AtomicUsize::new(0),
                revoke_calls: AtomicUsize::new(0),
                replies: SyncMutex::new(Vec::new()),
                default_reply: HttpReply {
                    status: 200,
                    body: format!(
                        r#"{{"access_token":"tok-abc","expires_in":{expires_in},"token_type":"Bearer"}}"#
                    ),
                },
                delay: Duration::ZERO,
                validate_status: 200,
            }
        }
    }

    #[async_trait]
    impl TokenTransport for CountingTransport {
        async fn post_form(
            &self,
            url: &str,
            _client_id: &str,
            _client_secret: &str,
            _form: &[(&str, &str)],
        ) -> Result<HttpReply, AuthError> {
            if url.ends_with(REVOKE_PATH) {
                self.revoke_calls.fetch_add(1, Ordering::SeqCst);
                return Ok(HttpReply { status: 200, body: String::new() });
            }
            self.token_calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let scripted = self.replies.lock().pop();
            Ok(scripted.unwrap_or_else(|| self.default_reply.clone()))
        }

        async fn get(&self, _url: &str, authorization: &str) -> Result<HttpReply, AuthError> {
            assert!(authorization.starts_with("Bearer "));
            Ok(HttpReply {
                status: self.validate_status,
                body: "[]".into(),
            })
        }
    }

    pub(crate) fn config() -> AppDynamicsConfig {
        AppDynamicsConfig {
            enabled: true,
            controller_host: "acme.saas.appdynamics.com".into(),
            client_id: "monitor@acme".into(),
            client_secret: "s3cret".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_token_is_cached_until_buffer_window() {
        let transport = Arc::new(CountingTransport::issuing(3600));
        let gateway = TokenGateway::new(&config(), transport.clone());

        assert_eq!(gateway.get_token().await.unwrap(), "tok-abc");
        assert_eq!(gateway.get_token().await.unwrap(), "tok-abc");
        assert_eq!(transport.token_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.authorization_header().await.unwrap(), "Bearer tok-abc");
    }

    #[tokio::test]
    async fn test_token_inside_buffer_is_refreshed() {
        // expires in 2 minutes, buffer is 5
        let transport = Arc::new(CountingTransport::issuing(120));
        let gateway = TokenGateway::new(&config(), transport.clone());
        gateway.get_token().await.unwrap();
        gateway.get_token().await.unwrap();
        assert_eq!(transport.token_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let mut transport = CountingTransport::issuing(3600);
        transport.delay = Duration::from_millis(30);
        let transport = Arc::new(transport);
        let gateway = Arc::new(TokenGateway::new(&config(), transport.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gateway = gateway.clone();
                tokio::spawn(async move { gateway.get_token().await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "tok-abc");
        }
        assert_eq!(transport.token_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_clears_token() {
        let transport = Arc::new(CountingTransport::issuing(120));
        let gateway = TokenGateway::new(&config(), transport.clone());
        gateway.get_token().await.unwrap();

        transport.replies.lock().push(HttpReply {
            status: 401,
            body: "invalid_client".into(),
        });
        let err = gateway.get_token().await.unwrap_err();
        assert_eq!(
            err,
            AuthError::Rejected {
                status: 401,
                body: "invalid_client".into()
            }
        );
        assert!(!gateway.token_info().await.has_token);
        assert!(matches!(MonitorError::from(err), MonitorError::Auth(_)));
    }

    #[tokio::test]
    async fn test_malformed_bodies() {
        let transport = Arc::new(CountingTransport::issuing(3600));
        let gateway = TokenGateway::new(&config(), transport.clone());
        transport.replies.lock().push(HttpReply {
            status: 200,
            body: r#"{"access_token":""}"#.into(),
        });
        assert!(matches!(gateway.get_token().await, Err(AuthError::Malformed(_))));

        transport.replies.lock().push(HttpReply {
            status: 200,
            body: "<html>".into(),
        });
        assert!(matches!(gateway.get_token().await, Err(AuthError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_out_of_range_expiry_is_malformed() {
        let transport = Arc::new(CountingTransport::issuing(3600));
        let gateway = TokenGateway::new(&config(), transport.clone());
        gateway.get_token().await.unwrap();

        transport.replies.lock().push(HttpReply {
            status: 200,
            body: format!(r#"{{"access_token":"tok","expires_in":{}}}"#, i64::MAX),
        });
        let err = gateway.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::Malformed(_)));
        assert!(!gateway.token_info().await.has_token);
    }

    #[tokio::test]
    async fn test_out_of_range_buffer_falls_back_to_default() {
        let transport = Arc::new(CountingTransport::issuing(3600));
        let mut settings = config();
        settings.token_buffer_minutes = i64::MAX;
        let gateway = TokenGateway::new(&settings, transport.clone());
        assert_eq!(gateway.get_token().await.unwrap(), "tok-abc");
        assert_eq!(gateway.get_token().await.unwrap(), "tok-abc");
        assert_eq!(transport.token_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_token_endpoint_times_out() {
        let mut transport = CountingTransport::issuing(3600);
        transport.delay = Duration::from_millis(1500);
        let mut settings = config();
        settings.request_timeout_secs = 1;
        let gateway = TokenGateway::new(&settings, Arc::new(transport));

        let err = gateway.get_token().await.unwrap_err();
        assert_eq!(err, AuthError::Timeout(1));
        assert!(!gateway.token_info().await.has_token);
        assert!(matches!(MonitorError::from(err), MonitorError::Auth(_)));
    }

    #[tokio::test]
    async fn test_defaults_for_missing_fields() {
        let transport = Arc::new(CountingTransport::issuing(3600));
        transport.replies.lock().push(HttpReply {
            status: 200,
            body: r#"{"access_token":"tok-min"}"#.into(),
        });
        let gateway = TokenGateway::new(&config(), transport);
        assert_eq!(gateway.authorization_header().await.unwrap(), "Bearer tok-min");
        let info = gateway.token_info().await;
        assert!(info.has_token);
        assert!(!info.expired);
        assert!(info.seconds_until_expiry > 3500);
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let transport = Arc::new(CountingTransport::issuing(3600));
        let gateway = TokenGateway::new(&AppDynamicsConfig::default(), transport.clone());
        assert!(!gateway.is_configured());
        assert_eq!(gateway.get_token().await.unwrap_err(), AuthError::MissingCredentials);
        assert!(!gateway.validate().await);
        assert_eq!(transport.token_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_revoke_always_clears() {
        let transport = Arc::new(CountingTransport::issuing(3600));
        let gateway = TokenGateway::new(&config(), transport.clone());
        gateway.revoke().await;
        assert_eq!(transport.revoke_calls.load(Ordering::SeqCst), 0);

        gateway.get_token().await.unwrap();
        gateway.revoke().await;
        assert_eq!(transport.revoke_calls.load(Ordering::SeqCst), 1);
        assert!(!gateway.token_info().await.has_token);
    }

    #[tokio::test]
    async fn test_validate_reflects_controller_status() {
        let mut transport = CountingTransport::issuing(3600);
        transport.validate_status = 403;
        let gateway = TokenGateway::new(&config(), Arc::new(transport));
        assert!(!gateway.validate().await);

        let gateway = TokenGateway::new(&config(), Arc::new(CountingTransport::issuing(3600)));
        assert!(gateway.validate().await);
    }
}
