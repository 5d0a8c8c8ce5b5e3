//! Federation endpoints

use axum::{extract::State, http::header, response::IntoResponse};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::handlers::AppState;

/// Media type of signed entity statements
pub const ENTITY_STATEMENT_CONTENT_TYPE: &str = "application/entity-statement+jwt";

/// GET /.well-known/openid-federation
///
/// Returns this relying party's self-issued entity configuration, freshly
/// signed with the configured TTL.
pub async fn entity_configuration(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let statement = state.relying_party.entity_configuration()?;
    Ok((
        [(header::CONTENT_TYPE, ENTITY_STATEMENT_CONTENT_TYPE)],
        statement.raw().to_string(),
    ))
}
