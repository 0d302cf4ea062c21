use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{keep_secret, require, require_secret, ConnectionContext, Secrets, StorageBackend};
use crate::errors::StorageError;
use crate::vault::is_encrypted;

/// Refresh a little before the real expiry so the check request does not race it.
const EXPIRY_SKEW_SECS: i64 = 30;

/// Google Drive reached through an OAuth client and a stored token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleDriveStorage {
    pub client_id: String,
    pub client_secret: String,
    /// Serialized [`GoogleToken`].
    pub token_json: String,
}

/// OAuth token as stored in `tokenJson`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl GoogleToken {
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let token: GoogleToken = serde_json::from_str(raw)
            .map_err(|e| StorageError::invalid(format!("token JSON is invalid: {}", e)))?;
        require(&token.access_token, "access_token in token JSON")?;
        Ok(token)
    }

    /// A zero expiry (year 1) means the token never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) if expiry.year() > 1 => {
                expiry <= now + Duration::seconds(EXPIRY_SKEW_SECS)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self, previous_refresh: &str) -> GoogleToken {
        GoogleToken {
            access_token: self.access_token,
            token_type: if self.token_type.is_empty() {
                "Bearer".to_string()
            } else {
                self.token_type
            },
            refresh_token: self
                .refresh_token
                .unwrap_or_else(|| previous_refresh.to_string()),
            expiry: self
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        }
    }
}

async fn request_token(
    ctx: &ConnectionContext,
    form: &[(&str, &str)],
    previous_refresh: &str,
) -> Result<GoogleToken, StorageError> {
    let resp = ctx
        .http
        .post(&ctx.google_token_url)
        .form(form)
        .send()
        .await
        .map_err(|e| StorageError::connection(format!("Google token endpoint unreachable: {}", e)))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(StorageError::connection(format!(
            "Google token request failed ({}): {}",
            status,
            body.trim()
        )));
    }

    let parsed: TokenResponse = resp
        .json()
        .await
        .map_err(|e| StorageError::connection(format!("invalid Google token response: {}", e)))?;
    Ok(parsed.into_token(previous_refresh))
}

/// Exchange an OAuth authorization code for a token.
///
/// Returns the serialized token, ready to be submitted as `tokenJson`.
pub async fn exchange_authorization_code(
    ctx: &ConnectionContext,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
) -> Result<String, StorageError> {
    require(client_id, "client id")?;
    require(client_secret, "client secret")?;
    require(code, "authorization code")?;

    let token = request_token(
        ctx,
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
        ],
        "",
    )
    .await?;

    serde_json::to_string(&token).map_err(|e| StorageError::Internal(e.into()))
}

#[async_trait]
impl StorageBackend for GoogleDriveStorage {
    fn sensitive_fields_mut(&mut self) -> Vec<&mut String> {
        vec![&mut self.client_secret, &mut self.token_json]
    }

    fn validate(&self, require_secrets: bool) -> Result<(), StorageError> {
        require(&self.client_id, "Google client id")?;
        require_secret(&self.client_secret, "Google client secret", require_secrets)?;
        require_secret(&self.token_json, "Google token", require_secrets)?;
        if !self.token_json.is_empty() && !is_encrypted(&self.token_json) {
            GoogleToken::parse(&self.token_json)?;
        }
        Ok(())
    }

    fn apply_update(&mut self, incoming: Self) {
        self.client_id = incoming.client_id;
        keep_secret(&mut self.client_secret, incoming.client_secret);
        keep_secret(&mut self.token_json, incoming.token_json);
    }

    async fn test_connection(
        &self,
        secrets: &Secrets<'_>,
        ctx: &ConnectionContext,
    ) -> Result<(), StorageError> {
        let client_secret = secrets.reveal(&self.client_secret)?;
        let mut token = GoogleToken::parse(&secrets.reveal(&self.token_json)?)
            .map_err(|e| StorageError::connection(e.to_string()))?;

        if token.is_expired(Utc::now()) {
            if token.refresh_token.is_empty() {
                return Err(StorageError::connection(
                    "Google token expired and has no refresh token, reauthorize the storage",
                ));
            }
            tracing::debug!("Google token expired, refreshing");
            let refresh = token.refresh_token.clone();
            token = request_token(
                ctx,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh.as_str()),
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                ],
                &refresh,
            )
            .await?;
        }

        let url = format!(
            "{}/drive/v3/about",
            ctx.google_api_base.trim_end_matches('/')
        );
        let resp = ctx
            .http
            .get(&url)
            .query(&[("fields", "user")])
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| StorageError::connection(format!("Google Drive unreachable: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StorageError::connection(format!(
                "Google Drive rejected the token ({})",
                status
            )));
        }

        tracing::debug!("Google Drive connection check succeeded");
        Ok(())
    }
}
