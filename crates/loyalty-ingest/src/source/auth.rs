//! Access token exchange
//!
//! One POST per run; the token is not refreshed and a failure is not retried.

use super::endpoints::access_token_url;
use crate::config::SourceConfig;
use crate::error::{IngestError, Result};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

#[derive(Serialize)]
struct TokenRequest<'a> {
    secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Exchange the client secret for an access token
#[instrument(skip_all, fields(store_id = %config.store_id))]
pub async fn acquire_token(client: &Client, config: &SourceConfig) -> Result<String> {
    let url = access_token_url(&config.base_url, &config.store_id)
        .map_err(|e| IngestError::auth(format!("invalid token URL: {}", e)))?;

    let response = client
        .post(url)
        .header(ACCEPT, "application/json")
        .json(&TokenRequest {
            secret: &config.client_secret,
        })
        .send()
        .await
        .map_err(|e| IngestError::auth(format!("token request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(IngestError::auth(format!(
            "token endpoint returned HTTP {}: {}",
            status.as_u16(),
            body.chars().take(200).collect::<String>()
        )));
    }

    let token = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| IngestError::auth(format!("unreadable token response: {}", e)))?
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| IngestError::auth("token response has no access_token"))?;

    info!("Access token acquired");
    Ok(token)
}
