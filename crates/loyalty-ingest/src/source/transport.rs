//! Raw HTTP exchange for page requests
//!
//! The fetcher never touches `reqwest` directly; it sees a [`RawResponse`] or
//! a [`TransportError`], which keeps response classification a pure function.

use super::endpoints::TOKEN_HEADER;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use thiserror::Error;

/// Status, the headers classification needs, and the full body text
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub retry_after: Option<String>,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: None,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn json(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status, body).with_content_type("application/json")
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: impl Into<String>) -> Self {
        self.retry_after = Some(retry_after.into());
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    /// The request could not be built; retrying will not help
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// One GET against the source
#[async_trait]
pub trait PageTransport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError>;
}

#[async_trait]
impl<T: PageTransport + ?Sized> PageTransport for std::sync::Arc<T> {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError> {
        (**self).get(url).await
    }
}

/// `reqwest`-backed transport carrying the access token
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    token: String,
}

impl HttpTransport {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("loyalty-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, token))
    }

    pub fn with_client(client: Client, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
        }
    }
}

#[async_trait]
impl PageTransport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;

        let status = response.status();
        let content_type = header_str(response.headers(), CONTENT_TYPE);
        let retry_after = header_str(response.headers(), RETRY_AFTER);
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            content_type,
            retry_after,
            body,
        })
    }
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}
