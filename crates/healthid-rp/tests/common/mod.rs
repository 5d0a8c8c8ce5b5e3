//! Shared fixture: a two-tier federation (anchor and one sectoral IdP), a
//! configured relying party and a scripted token endpoint

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, SubsecRound, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use healthid_core::{
    EntityStatementBuilder, JoseProvider, Jwk, Jwks, KeyUse, Metadata, OpenIdProviderMetadata,
    P256Jose,
};
use healthid_federation::MemoryFetcher;
use healthid_rp::{
    AuthorizationSession, ClientCredentials, FederationConfig, LoginError, OpenIdClient,
    RedirectedToIdp, RelyingParty,
};

pub const ANCHOR: &str = "https://anchor.example.org";
pub const IDP: &str = "https://idp.example.org";
pub const RP: &str = "https://rp.example.org";
pub const AUTHORIZATION_ENDPOINT: &str = "https://idp.example.org/authorize";
pub const TOKEN_ENDPOINT: &str = "https://idp.example.org/token";
pub const RP_ENC_KID: &str = "rp-enc";

/// One recorded call to the token endpoint
#[derive(Debug, Clone)]
pub struct Exchange {
    pub token_endpoint: String,
    pub code: String,
    pub code_verifier: String,
    pub credentials: ClientCredentials,
}

/// Token endpoint answering with whatever the test scripted
pub struct ScriptedClient {
    response: Mutex<Result<String, LoginError>>,
    calls: AtomicUsize,
    last: Mutex<Option<Exchange>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            response: Mutex::new(Err(LoginError::IdpUnreachable("not scripted".into()))),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn respond_with(&self, response: Result<String, LoginError>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<Exchange> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl OpenIdClient for ScriptedClient {
    async fn exchange_code(
        &self,
        token_endpoint: &str,
        code: &str,
        code_verifier: &str,
        credentials: &ClientCredentials,
    ) -> Result<String, LoginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(Exchange {
            token_endpoint: token_endpoint.to_string(),
            code: code.to_string(),
            code_verifier: code_verifier.to_string(),
            credentials: credentials.clone(),
        });
        self.response.lock().unwrap().clone()
    }
}

pub struct Harness {
    pub jose: P256Jose,
    pub fetcher: Arc<MemoryFetcher>,
    pub client: Arc<ScriptedClient>,
    pub anchor_key: Jwk,
    pub idp_key: Jwk,
    pub rp_enc_key: Jwk,
    pub config: FederationConfig,
}

impl Harness {
    /// Anchor and IdP with valid statements; the IdP publishes provider metadata
    pub fn new() -> Self {
        Self::with_provider(Some(OpenIdProviderMetadata {
            issuer: Some(IDP.to_string()),
            authorization_endpoint: AUTHORIZATION_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            ..OpenIdProviderMetadata::default()
        }))
    }

    pub fn with_provider(provider: Option<OpenIdProviderMetadata>) -> Self {
        let jose = P256Jose::new();
        let fetcher = Arc::new(MemoryFetcher::new());
        let anchor_key = Jwk::generate_p256(format!("{}#sig", ANCHOR), KeyUse::Sig);
        let idp_key = Jwk::generate_p256(format!("{}#sig", IDP), KeyUse::Sig);
        let rp_enc_key = Jwk::generate_p256(RP_ENC_KID, KeyUse::Enc);

        let now = Utc::now().trunc_subsecs(0);
        let window = |b: EntityStatementBuilder| b.validity(now - Duration::hours(1), now + Duration::hours(1));

        let anchor_config = window(EntityStatementBuilder::new().self_issued(ANCHOR))
            .add_key(&anchor_key)
            .sign(&jose, &anchor_key)
            .unwrap();
        fetcher.insert_configuration(ANCHOR, anchor_config.raw());

        let idp_config = window(EntityStatementBuilder::new().self_issued(IDP))
            .add_key(&idp_key)
            .authority_hints(vec![ANCHOR.to_string()])
            .metadata(Metadata {
                openid_provider: provider,
                ..Metadata::default()
            })
            .sign(&jose, &idp_key)
            .unwrap();
        fetcher.insert_configuration(IDP, idp_config.raw());

        let subordinate = window(EntityStatementBuilder::new().iss(ANCHOR).sub(IDP))
            .add_key(&idp_key)
            .sign(&jose, &anchor_key)
            .unwrap();
        fetcher.insert_subordinate(ANCHOR, IDP, subordinate.raw());

        let config = FederationConfig::builder()
            .iss(RP)
            .federation_master(ANCHOR)
            .entity_signing_key(Jwk::generate_p256("rp-sig", KeyUse::Sig))
            .relying_party_enc_keys(Jwks::new(vec![rp_enc_key.clone()]))
            .trust_anchor_jwks(Jwks::new(vec![anchor_key.to_public()]))
            .redirect_uris(vec![format!("{}/auth/callback", RP)])
            .scopes(vec!["openid".into(), "urn:telematik:versicherter".into()])
            .app_name("Health App")
            .build()
            .unwrap();

        Self {
            jose,
            fetcher,
            client: Arc::new(ScriptedClient::new()),
            anchor_key,
            idp_key,
            rp_enc_key,
            config,
        }
    }

    pub fn relying_party(&self) -> RelyingParty {
        RelyingParty::new(
            self.config.clone(),
            self.fetcher.clone(),
            self.client.clone(),
            Arc::new(self.jose),
        )
    }

    /// Run the flow up to the redirect
    pub async fn redirected(&self, rp: &RelyingParty) -> RedirectedToIdp {
        rp.select_idp(IDP).await.unwrap().redirect(rp)
    }

    /// Claims a well-behaved IdP would issue for `session`
    pub fn claims_for(&self, session: &AuthorizationSession) -> Value {
        self.claims_with_nonce(session.nonce().expose())
    }

    pub fn claims_with_nonce(&self, nonce: &str) -> Value {
        let now = Utc::now().timestamp();
        json!({
            "iss": IDP,
            "sub": "X110411675",
            "aud": RP,
            "iat": now,
            "exp": now + 300,
            "nonce": nonce,
            "urn:telematik:claims:email": "alice@example.org",
            "urn:telematik:claims:alter": "42"
        })
    }

    /// Sign with the IdP key
    pub fn sign(&self, claims: &Value) -> String {
        self.sign_with(claims, &self.idp_key)
    }

    pub fn sign_with(&self, claims: &Value, key: &Jwk) -> String {
        self.jose
            .sign(&serde_json::to_vec(claims).unwrap(), Some("JWT"), key)
            .unwrap()
    }

    /// Encrypt to the relying party's encryption key
    pub fn encrypt(&self, jws: &str) -> String {
        self.encrypt_to(jws, &self.rp_enc_key.to_public())
    }

    pub fn encrypt_to(&self, jws: &str, key: &Jwk) -> String {
        self.jose.encrypt(jws.as_bytes(), Some("JWT"), key).unwrap()
    }

    /// A valid identity token for `session`
    pub fn id_token(&self, session: &AuthorizationSession) -> String {
        self.encrypt(&self.sign(&self.claims_for(session)))
    }
}
