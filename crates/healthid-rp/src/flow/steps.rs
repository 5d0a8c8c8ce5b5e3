//! Login steps
//!
//! Each state of a login is its own type, holding exactly the data that is
//! valid in that state. A transition consumes the previous state, so a step
//! can neither be skipped nor replayed:
//!
//! ```text
//! RelyingParty::select_idp -> IdpSelected -> RedirectedToIdp -> CodeReceived
//!                          -> TokenExchanged -> IdentityVerified
//! ```
//!
//! Every fallible transition returns `LoginError`, the failed state. A
//! failed login is restarted from `select_idp`.

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use url::Url;

use healthid_core::OpenIdProviderMetadata;
use healthid_federation::TrustChain;

use crate::client::ClientCredentials;
use crate::error::{LoginError, Result};
use crate::flow::id_token::{verify_id_token, IdTokenClaims, VerifiedIdToken};
use crate::flow::session::{AuthorizationSession, Secret};
use crate::flow::RelyingParty;

/// An IdP with a validated trust chain
#[derive(Debug, Clone)]
pub struct IdpSelected {
    idp: String,
    trust_chain: TrustChain,
    provider: OpenIdProviderMetadata,
    authorization_endpoint: Url,
}

impl IdpSelected {
    pub(crate) fn new(idp: String, trust_chain: TrustChain) -> Result<Self> {
        let metadata_error = |reason: &str| LoginError::ProviderMetadata {
            idp: idp.clone(),
            reason: reason.to_string(),
        };

        let provider = trust_chain
            .provider_metadata()
            .cloned()
            .ok_or_else(|| metadata_error("no openid_provider metadata"))?;
        let authorization_endpoint = Url::parse(&provider.authorization_endpoint)
            .map_err(|_| metadata_error("invalid authorization_endpoint"))?;
        Url::parse(&provider.token_endpoint).map_err(|_| metadata_error("invalid token_endpoint"))?;

        Ok(Self {
            idp,
            trust_chain,
            provider,
            authorization_endpoint,
        })
    }

    pub fn idp(&self) -> &str {
        &self.idp
    }

    pub fn trust_chain(&self) -> &TrustChain {
        &self.trust_chain
    }

    /// Provider metadata from the IdP's verified entity configuration
    pub fn provider(&self) -> &OpenIdProviderMetadata {
        &self.provider
    }

    /// Start a session and build the authorization request
    pub fn redirect(self, rp: &RelyingParty) -> RedirectedToIdp {
        self.redirect_at(rp, Utc::now())
    }

    pub fn redirect_at(self, rp: &RelyingParty, now: DateTime<Utc>) -> RedirectedToIdp {
        let config = rp.config();
        let session = AuthorizationSession::new(
            self.idp,
            self.trust_chain,
            self.provider.token_endpoint,
            config.callback_uri().to_string(),
            config.iss().to_string(),
            now,
            config.login_timeout(),
        );

        let mut authorization_url = self.authorization_endpoint;
        authorization_url
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", config.iss())
            .append_pair("redirect_uri", session.redirect_uri())
            .append_pair("scope", &config.scopes().join(" "))
            .append_pair("state", session.state().expose())
            .append_pair("nonce", session.nonce().expose())
            .append_pair("code_challenge", session.pkce().challenge())
            .append_pair("code_challenge_method", "S256");

        info!(
            session_id = %session.id(),
            idp = %session.idp(),
            expires_at = %session.expires_at(),
            "Redirecting to identity provider"
        );

        RedirectedToIdp {
            session,
            authorization_url,
        }
    }
}

/// Waiting for the user to return from the IdP
#[derive(Debug, Clone)]
pub struct RedirectedToIdp {
    session: AuthorizationSession,
    authorization_url: Url,
}

impl RedirectedToIdp {
    /// Where to send the user's browser
    pub fn authorization_url(&self) -> &Url {
        &self.authorization_url
    }

    pub fn session(&self) -> &AuthorizationSession {
        &self.session
    }

    /// `state` value the callback must echo
    pub fn state(&self) -> &str {
        self.session.state().expose()
    }

    /// Accept the callback parameters
    pub fn receive_code(self, code: &str, state: &str) -> Result<CodeReceived> {
        self.receive_code_at(code, state, Utc::now())
    }

    pub fn receive_code_at(self, code: &str, state: &str, now: DateTime<Utc>) -> Result<CodeReceived> {
        let session_id = self.session.id();
        if !self.session.state().matches(state) {
            warn!(session_id = %session_id, "Callback state does not match session");
            return Err(LoginError::StateMismatch);
        }
        if code.is_empty() {
            warn!(session_id = %session_id, "Callback without authorization code");
            return Err(LoginError::MissingCode);
        }
        if self.session.is_expired_at(now) {
            warn!(session_id = %session_id, expired_at = %self.session.expires_at(), "Login session expired");
            return Err(LoginError::SessionExpired);
        }

        Ok(CodeReceived {
            session: self.session,
            code: Secret::new(code),
        })
    }
}

/// Authorization code received, not yet exchanged
///
/// Not `Clone`: the code is exchanged at most once.
///
/// ```compile_fail
/// fn exchange_twice(step: &healthid_rp::CodeReceived) -> healthid_rp::CodeReceived {
///     step.clone()
/// }
/// ```
#[derive(Debug)]
pub struct CodeReceived {
    session: AuthorizationSession,
    code: Secret,
}

impl CodeReceived {
    pub fn session(&self) -> &AuthorizationSession {
        &self.session
    }

    /// Exchange the code at the IdP's token endpoint
    pub async fn exchange(self, rp: &RelyingParty) -> Result<TokenExchanged> {
        let credentials = ClientCredentials {
            client_id: rp.config().iss().to_string(),
            redirect_uri: self.session.redirect_uri().to_string(),
        };

        let id_token = rp
            .client()
            .exchange_code(
                self.session.token_endpoint(),
                self.code.expose(),
                self.session.pkce().verifier().expose(),
                &credentials,
            )
            .await
            .map_err(|e| {
                warn!(session_id = %self.session.id(), idp = %self.session.idp(), error = %e, "Code exchange failed");
                e
            })?;

        Ok(TokenExchanged {
            session: self.session,
            id_token,
        })
    }
}

/// Raw identity token received, not yet verified
///
/// ```compile_fail
/// fn verify_twice(step: &healthid_rp::TokenExchanged) -> healthid_rp::TokenExchanged {
///     step.clone()
/// }
/// ```
#[derive(Debug)]
pub struct TokenExchanged {
    session: AuthorizationSession,
    id_token: String,
}

impl TokenExchanged {
    pub fn session(&self) -> &AuthorizationSession {
        &self.session
    }

    /// Decrypt and verify the identity token
    pub fn verify(self, rp: &RelyingParty) -> Result<IdentityVerified> {
        self.verify_at(rp, Utc::now())
    }

    pub fn verify_at(self, rp: &RelyingParty, now: DateTime<Utc>) -> Result<IdentityVerified> {
        let config = rp.config();
        let id_token = verify_id_token(
            &self.id_token,
            &self.session,
            config.keys(),
            rp.jose().as_ref(),
            config.clock_skew(),
            now,
        )
        .map_err(|e| {
            warn!(session_id = %self.session.id(), idp = %self.session.idp(), kind = %e.kind(), error = %e, "Identity token rejected");
            e
        })?;

        info!(
            session_id = %self.session.id(),
            idp = %self.session.idp(),
            "Identity verified"
        );

        Ok(IdentityVerified {
            idp: self.session.idp().to_string(),
            id_token,
        })
    }
}

/// Terminal success: verified claims from a trusted IdP
#[derive(Debug, Clone)]
pub struct IdentityVerified {
    idp: String,
    id_token: VerifiedIdToken,
}

impl IdentityVerified {
    pub fn idp(&self) -> &str {
        &self.idp
    }

    pub fn claims(&self) -> &IdTokenClaims {
        self.id_token.claims()
    }

    pub fn id_token(&self) -> &VerifiedIdToken {
        &self.id_token
    }

    pub fn into_id_token(self) -> VerifiedIdToken {
        self.id_token
    }
}
