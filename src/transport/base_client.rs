use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::credentials::{CredentialStore, Credentials};
use crate::error::ApiError;
use crate::transport::{ApiRequest, ApiResponse, HttpSend};

pub const CSRF_HEADER: &str = "X-CSRF-Token";
pub const REFRESH_COOKIE: &str = "refresh_token";
pub const REFRESH_PATH: &str = "/refresh";

#[derive(Debug, Deserialize)]
struct RefreshGrant {
    #[serde(alias = "accessToken")]
    access_token: String,
    #[serde(default, alias = "csrfToken")]
    csrf_token: Option<String>,
}

/// Shared HTTP client: attaches credentials and refreshes an expired
/// access token at most once per logical request.
pub struct BaseClient {
    http: Arc<dyn HttpSend>,
    credentials: Arc<dyn CredentialStore>,
    refresh_lock: Mutex<()>,
}

impl BaseClient {
    pub fn new(http: Arc<dyn HttpSend>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            http,
            credentials,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    #[instrument(skip(self, request), fields(verb = ?request.verb, path = %request.path))]
    pub async fn execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let credentials = self.credentials.load()?;
        let response = self
            .http
            .send(authorize(request.clone(), &credentials))
            .await?;
        if response.status != 401 {
            return finish(response);
        }

        debug!("Access token rejected, refreshing once");
        self.refresh(credentials.access_token.as_deref()).await?;

        let credentials = self.credentials.load()?;
        let replay = self.http.send(authorize(request, &credentials)).await?;
        if replay.status == 401 {
            warn!("Replayed request rejected again, giving up");
        }
        finish(replay)
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// Serialized so concurrent 401s share one refresh: a caller whose
    /// rejected token has already been rotated simply replays.
    async fn refresh(&self, rejected: Option<&str>) -> Result<(), ApiError> {
        let _guard = self.refresh_lock.lock().await;

        let mut current = self.credentials.load()?;
        if current.access_token.is_some() && current.access_token.as_deref() != rejected {
            debug!("Access token already rotated by a concurrent refresh");
            return Ok(());
        }
        let Some(refresh_token) = current.refresh_token.clone() else {
            warn!("No refresh token stored, login required");
            return Err(ApiError::AuthExpired);
        };

        let request = ApiRequest::post(REFRESH_PATH, Value::Object(Default::default()))
            .with_header("Cookie", format!("{REFRESH_COOKIE}={refresh_token}"));
        let response = self.http.send(request).await?;

        match response.status {
            200..=299 => {
                let grant: RefreshGrant = serde_json::from_value(response.body.clone())
                    .map_err(|e| ApiError::Decode(format!("refresh response: {e}")))?;
                current.access_token = Some(grant.access_token);
                if grant.csrf_token.is_some() {
                    current.csrf_token = grant.csrf_token;
                }
                if let Some(rotated) = refresh_cookie(&response.set_cookies) {
                    current.refresh_token = Some(rotated);
                }
                self.credentials.save(&current)?;
                info!("Access token refreshed");
                Ok(())
            }
            403 => {
                error!("Refresh token rejected, clearing credentials");
                self.credentials.clear()?;
                Err(ApiError::AuthExpired)
            }
            status => {
                error!(status, "Token refresh failed");
                Err(ApiError::Http {
                    status,
                    message: response.error_message(),
                })
            }
        }
    }
}

fn authorize(mut request: ApiRequest, credentials: &Credentials) -> ApiRequest {
    if let Some(token) = &credentials.access_token {
        request = request.with_header("Authorization", format!("Bearer {token}"));
    }
    if request.verb.is_mutating() {
        if let Some(csrf) = &credentials.csrf_token {
            request = request.with_header(CSRF_HEADER, csrf.clone());
        }
    }
    request
}

fn finish(response: ApiResponse) -> Result<Value, ApiError> {
    if response.is_success() {
        return Ok(response.body);
    }
    if response.status == 403 {
        warn!(status = 403, "Request forbidden, possible CSRF token mismatch");
    }
    Err(ApiError::Http {
        status: response.status,
        message: response.error_message(),
    })
}

/// Picks a rotated refresh token out of `Set-Cookie` headers.
fn refresh_cookie(set_cookies: &[String]) -> Option<String> {
    set_cookies.iter().find_map(|cookie| {
        let pair = cookie.split(';').next()?;
        let (name, value) = pair.split_once('=')?;
        let value = value.trim();
        (name.trim() == REFRESH_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}
