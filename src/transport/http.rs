use async_trait::async_trait;
use reqwest::header::SET_COOKIE;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::config::ConsoleConfig;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    /// Mutating verbs carry the anti-CSRF header.
    pub fn is_mutating(self) -> bool {
        !matches!(self, Verb::Get)
    }

    fn method(self) -> Method {
        match self {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
            Verb::Put => Method::PUT,
            Verb::Delete => Method::DELETE,
        }
    }
}

/// A request relative to the versioned API base.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub verb: Verb,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    fn new(verb: Verb, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            verb,
            path: path.into(),
            query: Vec::new(),
            body,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Verb::Get, path, None)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Verb::Post, path, Some(body))
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Verb::Put, path, Some(body))
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Verb::Delete, path, None)
    }

    pub fn with_query(mut self, pairs: Vec<(String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` when empty, a JSON string when not JSON.
    pub body: Value,
    pub set_cookies: Vec<String>,
}

impl ApiResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            set_cookies: Vec::new(),
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.set_cookies.push(cookie.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The server-provided error message, if the body carries one.
    pub fn error_message(&self) -> String {
        let field = |name: &str| self.body.get(name).and_then(Value::as_str).map(str::to_owned);
        field("message")
            .or_else(|| field("error"))
            .or_else(|| self.body.as_str().map(str::to_owned))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("request failed with status {}", self.status))
    }
}

/// Sends one HTTP exchange. Status handling happens above this seam.
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// [`HttpSend`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestSend {
    http: Client,
    base: Url,
}

impl ReqwestSend {
    pub fn new(config: &ConsoleConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("admin-console/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base: config.api_base()?,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Network(format!("{} cannot be a base url", self.base)))?
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Network("request timed out".into())
    } else {
        ApiError::Network(e.to_string())
    }
}

#[async_trait]
impl HttpSend for ReqwestSend {
    #[instrument(skip(self, request), fields(verb = ?request.verb, path = %request.path))]
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.endpoint(&request.path)?;
        let mut builder = self.http.request(request.verb.method(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let res = builder.send().await.map_err(map_reqwest_error)?;
        let status = res.status().as_u16();
        let set_cookies = res
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_owned))
            .collect();
        let text = res.text().await.map_err(map_reqwest_error)?;
        debug!(status, bytes = text.len(), "Received response");

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(ApiResponse {
            status,
            body,
            set_cookies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_joins_versioned_base() {
        let sender = ReqwestSend::new(&ConsoleConfig::default()).unwrap();
        assert_eq!(
            sender.endpoint("/products/7").unwrap().as_str(),
            "http://localhost:3000/v1/products/7"
        );
        assert_eq!(
            sender.endpoint("/refresh").unwrap().as_str(),
            "http://localhost:3000/v1/refresh"
        );
    }

    #[test]
    fn error_message_prefers_server_text() {
        let res = ApiResponse::json(422, json!({ "message": "sku already taken" }));
        assert_eq!(res.error_message(), "sku already taken");
        let res = ApiResponse::json(500, json!({ "error": "boom" }));
        assert_eq!(res.error_message(), "boom");
        let res = ApiResponse::json(502, Value::Null);
        assert_eq!(res.error_message(), "request failed with status 502");
    }

    #[test]
    fn headers_are_case_insensitive_and_replaced() {
        let req = ApiRequest::get("/x")
            .with_header("X-CSRF-Token", "a")
            .with_header("x-csrf-token", "b");
        assert_eq!(req.header("X-Csrf-Token"), Some("b"));
        assert_eq!(req.headers.len(), 1);
        assert!(!req.verb.is_mutating());
        assert!(ApiRequest::delete("/x").verb.is_mutating());
    }
}
