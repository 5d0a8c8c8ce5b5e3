//! API request handlers

pub mod federation;
pub mod login;

use crate::flow::RelyingParty;
use crate::sessions::PendingLogins;

pub use federation::{entity_configuration, ENTITY_STATEMENT_CONTENT_TYPE};
pub use login::{callback, start_login, CallbackParams, CallbackResponse, LoginRequest, LoginResponse};

/// Application state shared across handlers
pub struct AppState {
    /// Configuration, resolver and token client
    pub relying_party: RelyingParty,
    /// Logins awaiting their callback
    pub pending: PendingLogins,
}
