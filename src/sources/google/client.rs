//! Thin Google API client with token refresh on unauthorized responses

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::oauth::TokenManager;
use crate::registry::OAuthProviderConfig;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

pub struct GoogleClient {
    http: reqwest::Client,
    tokens: Arc<TokenManager>,
    provider: OAuthProviderConfig,
    source_name: String,
    base_url: String,
}

impl GoogleClient {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<TokenManager>,
        provider: OAuthProviderConfig,
        source_name: &str,
    ) -> Self {
        Self {
            http,
            tokens,
            provider,
            source_name: source_name.to_string(),
            base_url: std::env::var("GOOGLE_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        }
    }

    /// GET a calendar endpoint, refreshing the token once on 401.
    pub async fn get_with_params<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let token = self
            .tokens
            .get_valid_token(&self.source_name, &self.provider)
            .await?;

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .query(params)
            .send()
            .await
            .map_err(|e| Error::UpstreamTransient(format!("google: {e}")))?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            // One refresh attempt, then the retried request stands or falls
            let refreshed = self.tokens.refresh(&self.source_name, &self.provider).await?;
            self.http
                .get(&url)
                .bearer_auth(&refreshed.access_token)
                .query(params)
                .send()
                .await
                .map_err(|e| Error::UpstreamTransient(format!("google: {e}")))?
        } else {
            response
        };

        let status = response.status();
        match status {
            s if s.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| Error::UpstreamSchema(format!("google response: {e}"))),
            StatusCode::UNAUTHORIZED => Err(Error::AuthRefreshFailed(
                "google rejected refreshed token".to_string(),
            )),
            StatusCode::GONE => Err(Error::CursorInvalidated(
                "google sync token expired".to_string(),
            )),
            StatusCode::NOT_FOUND => Err(Error::Validation(format!("google: {path} not found"))),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(Error::UpstreamTransient("google rate limited".to_string()))
            }
            s if s.is_server_error() => {
                Err(Error::UpstreamTransient(format!("google returned {s}")))
            }
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::UpstreamSchema(format!("google returned {s}: {body}")))
            }
        }
    }
}
