//! OpenID token client
//!
//! Performs the authorization-code exchange against an identity provider's
//! token endpoint. It owns only the request and response shape; whether the
//! provider is trusted, and whether the token it returns is valid, is
//! decided elsewhere.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::error::{LoginError, Result};

/// How this relying party identifies itself at the token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// OAuth client ID (the relying party's entity identifier)
    pub client_id: String,
    /// Redirect URI used in the authorization request
    pub redirect_uri: String,
}

/// Successful token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub id_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// OAuth error body (RFC 6749 §5.2)
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Token endpoint capability
#[async_trait]
pub trait OpenIdClient: Send + Sync {
    /// Exchange an authorization code for the raw (encrypted) identity token
    async fn exchange_code(
        &self,
        token_endpoint: &str,
        code: &str,
        code_verifier: &str,
        credentials: &ClientCredentials,
    ) -> Result<String>;
}

/// Token client over HTTPS
#[derive(Debug, Clone)]
pub struct HttpOpenIdClient {
    http_client: reqwest::Client,
}

impl HttpOpenIdClient {
    /// Create a client with a request timeout
    pub fn new(timeout: Duration) -> std::result::Result<Self, ConfigError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "http_client",
                reason: e.to_string(),
            })?;
        Ok(Self { http_client })
    }

    /// Create a client around an existing `reqwest::Client`
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl OpenIdClient for HttpOpenIdClient {
    async fn exchange_code(
        &self,
        token_endpoint: &str,
        code: &str,
        code_verifier: &str,
        credentials: &ClientCredentials,
    ) -> Result<String> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("client_id", credentials.client_id.as_str()),
            ("redirect_uri", credentials.redirect_uri.as_str()),
        ];

        debug!(token_endpoint = %token_endpoint, "Exchanging authorization code");
        let response = self
            .http_client
            .post(token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| LoginError::IdpUnreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| LoginError::IdpUnreachable(e.to_string()))?;

        if !status.is_success() {
            warn!(token_endpoint = %token_endpoint, status = %status, "Token exchange failed");
            return Err(classify_failure(status, &body));
        }

        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| LoginError::MalformedTokenResponse(e.to_string()))?;
        if token.id_token.is_empty() {
            return Err(LoginError::MalformedTokenResponse("empty id_token".into()));
        }
        Ok(token.id_token)
    }
}

/// Map a non-2xx token endpoint response to a failure kind
fn classify_failure(status: StatusCode, body: &[u8]) -> LoginError {
    let transient = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS;
    if transient {
        return LoginError::IdpUnreachable(format!("token endpoint returned HTTP {}", status));
    }

    match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(err) => LoginError::IdpRejectedCode {
            error: err.error,
            description: err.error_description,
        },
        Err(_) => LoginError::IdpRejectedCode {
            error: format!("http_{}", status.as_u16()),
            description: None,
        },
    }
}
