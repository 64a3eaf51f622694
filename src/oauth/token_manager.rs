//! Centralized token management for all OAuth sources

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::registry::OAuthProviderConfig;
use crate::store::sources;

/// Proactive-refresh horizon: tokens expiring within this window are
/// refreshed before use.
const REFRESH_HORIZON: Duration = Duration::hours(1);

/// Token refresh response from a provider token endpoint
#[derive(Debug, Deserialize)]
struct TokenRefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// OAuth token information
#[derive(Debug, Clone)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub source_name: String,
}

/// Refresh lifecycle of a stored token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Valid,
    NearExpiry,
    Refreshing,
    RefreshFailed,
}

/// Centralized token manager for all OAuth sources
pub struct TokenManager {
    db: PgPool,
    client: Client,
    /// Single-flight guards, one per source name
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            client: Client::new(),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Classify a token against the refresh horizon.
    pub fn state(token: &OAuthToken) -> TokenState {
        match token.expires_at {
            Some(exp) if exp <= Utc::now() + REFRESH_HORIZON => TokenState::NearExpiry,
            _ => TokenState::Valid,
        }
    }

    /// Load the stored token for a source.
    pub async fn load_token(&self, source_name: &str) -> Result<OAuthToken> {
        let row = sources::fetch_active(&self.db, source_name)
            .await?
            .ok_or_else(|| Error::AuthMissing(format!("no active source '{source_name}'")))?;

        let access_token = row
            .oauth_access_token
            .ok_or_else(|| Error::AuthMissing(format!("no access token for '{source_name}'")))?;

        Ok(OAuthToken {
            access_token,
            refresh_token: row.oauth_refresh_token,
            expires_at: row.oauth_expires_at,
            source_name: source_name.to_string(),
        })
    }

    /// Get an access token that is valid for at least the refresh horizon,
    /// refreshing through the provider if necessary.
    pub async fn get_valid_token(
        &self,
        source_name: &str,
        provider: &OAuthProviderConfig,
    ) -> Result<String> {
        let token = self.load_token(source_name).await?;
        match Self::state(&token) {
            TokenState::Valid => Ok(token.access_token),
            _ => {
                let refreshed = self.refresh(source_name, provider).await?;
                Ok(refreshed.access_token)
            }
        }
    }

    /// Refresh a source's token through the provider token endpoint and
    /// persist the result before returning.
    ///
    /// Concurrent callers for the same source coalesce: the second caller
    /// waits on the single-flight lock, re-reads the row, and returns the
    /// token the first caller stored.
    #[tracing::instrument(skip(self, provider), fields(source = %source_name))]
    pub async fn refresh(
        &self,
        source_name: &str,
        provider: &OAuthProviderConfig,
    ) -> Result<OAuthToken> {
        let lock = {
            let mut locks = self.refresh_locks.lock().await;
            locks
                .entry(source_name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        // Another flight may have refreshed while we waited
        let current = self.load_token(source_name).await?;
        if Self::state(&current) == TokenState::Valid {
            return Ok(current);
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or_else(|| Error::AuthMissing(format!("no refresh token for '{source_name}'")))?;

        tracing::info!("Refreshing OAuth token");

        let response = self
            .client
            .post(&provider.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::UpstreamTransient(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "Token refresh rejected");
            return Err(Error::AuthRefreshFailed(format!(
                "{source_name}: {status}: {body}"
            )));
        }

        let parsed: TokenRefreshResponse = response
            .json()
            .await
            .map_err(|e| Error::UpstreamSchema(format!("token response: {e}")))?;

        let expires_at = parsed.expires_in.map(|secs| Utc::now() + Duration::seconds(secs));

        let row = sources::fetch_active(&self.db, source_name)
            .await?
            .ok_or_else(|| Error::AuthMissing(format!("source vanished: '{source_name}'")))?;

        sources::update_tokens(
            &self.db,
            row.id,
            &parsed.access_token,
            parsed.refresh_token.as_deref(),
            expires_at,
        )
        .await?;

        tracing::info!(expires_at = ?expires_at, "Token refreshed");

        Ok(OAuthToken {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token.or(Some(refresh_token)),
            expires_at,
            source_name: source_name.to_string(),
        })
    }
}
