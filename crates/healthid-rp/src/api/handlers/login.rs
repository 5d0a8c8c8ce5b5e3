//! Login endpoints
//!
//! `POST /auth/login` resolves the chosen IdP and returns where to send the
//! browser. `GET /auth/callback` finishes the login when the browser comes
//! back. Both answer every failure, unreadable requests included, with the same
//! 401 body.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::handlers::AppState;
use crate::error::LoginError;

/// Request to start a login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Entity identifier of the sectoral IdP
    pub idp: String,
}

/// Where to send the user's browser
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub authorization_url: String,
}

/// POST /auth/login
pub async fn start_login(
    State(state): State<Arc<AppState>>,
    request: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(request) = request?;
    let rp = &state.relying_party;
    let pending = rp.select_idp(&request.idp).await?.redirect(rp);
    let authorization_url = pending.authorization_url().to_string();

    state.pending.insert(pending).await;
    Ok(Json(LoginResponse { authorization_url }))
}

/// Query parameters of the IdP callback
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Set by the IdP when the user or the IdP aborted the login
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Verified identity
#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub sub: String,
    pub iss: String,
    pub claims: Map<String, Value>,
}

/// GET /auth/callback
pub async fn callback(
    State(state): State<Arc<AppState>>,
    params: Result<Query<CallbackParams>, QueryRejection>,
) -> Result<Json<CallbackResponse>, ApiError> {
    let Query(params) = params?;
    let rp = &state.relying_party;
    let callback_state = params.state.unwrap_or_default();

    // Taken before anything else so a state value is never usable twice
    let pending = state
        .pending
        .take(&callback_state)
        .await
        .ok_or(LoginError::StateMismatch)?;

    if let Some(error) = params.error {
        return Err(LoginError::IdpRejectedCode {
            error,
            description: params.error_description,
        }
        .into());
    }

    let verified = pending
        .receive_code(params.code.as_deref().unwrap_or_default(), &callback_state)?
        .exchange(rp)
        .await?
        .verify(rp)?;

    let claims = verified.claims();
    Ok(Json(CallbackResponse {
        sub: claims.sub.clone(),
        iss: claims.iss.clone(),
        claims: claims.extra.clone(),
    }))
}
