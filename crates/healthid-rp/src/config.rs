//! Relying party configuration
//!
//! `FederationConfig` is this relying party's identity in the federation:
//! who it is, which keys it signs and decrypts with, which anchor it trusts
//! and which parameters it requests logins with. It is built once at
//! startup, validated in full, and immutable afterwards.
//!
//! `ServerConfig` adds the process settings and loads everything from
//! `HEALTHID_*` environment variables.

use chrono::Duration;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use url::Url;

use healthid_core::{Jwk, Jwks};
use healthid_federation::{ResolverConfig, TrustAnchor, DEFAULT_MAX_DEPTH};

use crate::keys::ClientKeyStore;

/// Configuration errors; all are fatal at startup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid URI for {field}: {value}")]
    InvalidUri { field: &'static str, value: String },

    #[error("Invalid key in {field}: {reason}")]
    InvalidKey { field: &'static str, reason: String },

    #[error("Signing key '{0}' is not among the trusted entity signing keys")]
    SigningKeyNotTrusted(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Default lifetime of the self-issued entity configuration
pub const DEFAULT_STATEMENT_TTL_SECS: i64 = 3600;

/// Default bound on the time between redirect and callback
pub const DEFAULT_LOGIN_TIMEOUT_SECS: i64 = 600;

/// The relying party's federation identity
#[derive(Debug, Clone)]
pub struct FederationConfig {
    iss: String,
    sub: String,
    federation_master: String,
    entity_signing_keys: Jwks,
    keys: ClientKeyStore,
    trust_anchor: TrustAnchor,
    ttl: Duration,
    redirect_uris: Vec<String>,
    scopes: Vec<String>,
    app_name: String,
    max_chain_depth: usize,
    clock_skew: Duration,
    login_timeout: Duration,
}

impl FederationConfig {
    /// Start an empty builder
    pub fn builder() -> FederationConfigBuilder {
        FederationConfigBuilder::default()
    }

    /// Re-open this configuration for modification
    pub fn to_builder(&self) -> FederationConfigBuilder {
        FederationConfigBuilder {
            iss: Some(self.iss.clone()),
            sub: Some(self.sub.clone()),
            federation_master: Some(self.federation_master.clone()),
            entity_signing_keys: Some(self.entity_signing_keys.clone()),
            entity_signing_key: Some(self.keys.signing_key().clone()),
            relying_party_enc_keys: Some(self.keys.encryption_keys().clone()),
            trust_anchor_jwks: Some(self.trust_anchor.jwks().clone()),
            ttl: Some(self.ttl),
            redirect_uris: self.redirect_uris.clone(),
            scopes: self.scopes.clone(),
            app_name: Some(self.app_name.clone()),
            max_chain_depth: Some(self.max_chain_depth),
            clock_skew: Some(self.clock_skew),
            login_timeout: Some(self.login_timeout),
        }
    }

    /// Issuer identifier; also the OAuth client ID and expected token audience
    pub fn iss(&self) -> &str {
        &self.iss
    }

    pub fn sub(&self) -> &str {
        &self.sub
    }

    /// Superior entity named in this relying party's authority hints
    pub fn federation_master(&self) -> &str {
        &self.federation_master
    }

    /// Public signing keys published in the entity configuration
    pub fn entity_signing_keys(&self) -> &Jwks {
        &self.entity_signing_keys
    }

    pub fn keys(&self) -> &ClientKeyStore {
        &self.keys
    }

    pub fn trust_anchor(&self) -> &TrustAnchor {
        &self.trust_anchor
    }

    /// Lifetime of the self-issued entity configuration
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn redirect_uris(&self) -> &[String] {
        &self.redirect_uris
    }

    /// Redirect URI sent with authorization requests
    pub fn callback_uri(&self) -> &str {
        // build() rejects an empty list
        &self.redirect_uris[0]
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn max_chain_depth(&self) -> usize {
        self.max_chain_depth
    }

    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    /// Maximum time between redirect to the IdP and the callback
    pub fn login_timeout(&self) -> Duration {
        self.login_timeout
    }

    /// Resolver settings derived from this configuration
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig::default()
            .with_max_depth(self.max_chain_depth)
            .with_clock_skew(self.clock_skew)
    }
}

/// Builder for `FederationConfig`
#[derive(Debug, Clone, Default)]
pub struct FederationConfigBuilder {
    iss: Option<String>,
    sub: Option<String>,
    federation_master: Option<String>,
    entity_signing_keys: Option<Jwks>,
    entity_signing_key: Option<Jwk>,
    relying_party_enc_keys: Option<Jwks>,
    trust_anchor_jwks: Option<Jwks>,
    ttl: Option<Duration>,
    redirect_uris: Vec<String>,
    scopes: Vec<String>,
    app_name: Option<String>,
    max_chain_depth: Option<usize>,
    clock_skew: Option<Duration>,
    login_timeout: Option<Duration>,
}

impl FederationConfigBuilder {
    pub fn iss(mut self, iss: impl Into<String>) -> Self {
        self.iss = Some(iss.into());
        self
    }

    /// Subject; defaults to the issuer
    pub fn sub(mut self, sub: impl Into<String>) -> Self {
        self.sub = Some(sub.into());
        self
    }

    pub fn federation_master(mut self, federation_master: impl Into<String>) -> Self {
        self.federation_master = Some(federation_master.into());
        self
    }

    /// Trusted signing keys; defaults to the public half of the signing key
    pub fn entity_signing_keys(mut self, keys: Jwks) -> Self {
        self.entity_signing_keys = Some(keys);
        self
    }

    pub fn entity_signing_key(mut self, key: Jwk) -> Self {
        self.entity_signing_key = Some(key);
        self
    }

    pub fn relying_party_enc_keys(mut self, keys: Jwks) -> Self {
        self.relying_party_enc_keys = Some(keys);
        self
    }

    /// Pinned keys of the trust anchor (the federation master)
    pub fn trust_anchor_jwks(mut self, keys: Jwks) -> Self {
        self.trust_anchor_jwks = Some(keys);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn redirect_uris(mut self, redirect_uris: Vec<String>) -> Self {
        self.redirect_uris = redirect_uris;
        self
    }

    /// Requested scopes; defaults to `openid`
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn max_chain_depth(mut self, max_chain_depth: usize) -> Self {
        self.max_chain_depth = Some(max_chain_depth);
        self
    }

    pub fn clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = Some(clock_skew);
        self
    }

    pub fn login_timeout(mut self, login_timeout: Duration) -> Self {
        self.login_timeout = Some(login_timeout);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<FederationConfig, ConfigError> {
        let iss = require_uri("iss", self.iss)?;
        let sub = match self.sub {
            Some(sub) => require_uri("sub", Some(sub))?,
            None => iss.clone(),
        };
        let federation_master = require_uri("federation_master", self.federation_master)?;

        let signing_key = self
            .entity_signing_key
            .ok_or(ConfigError::Missing("entity_signing_key"))?;
        let enc_keys = self
            .relying_party_enc_keys
            .ok_or(ConfigError::Missing("relying_party_enc_keys"))?;
        let keys = ClientKeyStore::new(signing_key, enc_keys)?;

        let entity_signing_keys = self
            .entity_signing_keys
            .unwrap_or_else(|| Jwks::new(vec![keys.signing_key().to_public()]))
            .to_public();
        let trusted = entity_signing_keys
            .find(keys.signing_kid())
            .map(|k| k.same_public_key(keys.signing_key()))
            .unwrap_or(false);
        if !trusted {
            return Err(ConfigError::SigningKeyNotTrusted(keys.signing_kid().to_string()));
        }

        let anchor_jwks = self
            .trust_anchor_jwks
            .ok_or(ConfigError::Missing("trust_anchor_jwks"))?;
        if anchor_jwks.is_empty() {
            return Err(ConfigError::Missing("trust_anchor_jwks"));
        }
        let trust_anchor = TrustAnchor::new(federation_master.clone(), anchor_jwks);

        if self.redirect_uris.is_empty() {
            return Err(ConfigError::Missing("redirect_uris"));
        }
        let redirect_uris = self
            .redirect_uris
            .into_iter()
            .map(|uri| require_uri("redirect_uris", Some(uri)))
            .collect::<Result<Vec<_>, _>>()?;

        let scopes = if self.scopes.is_empty() {
            vec!["openid".to_string()]
        } else {
            self.scopes
        };

        let ttl = self
            .ttl
            .unwrap_or_else(|| Duration::seconds(DEFAULT_STATEMENT_TTL_SECS));
        require_positive("ttl", ttl)?;
        let login_timeout = self
            .login_timeout
            .unwrap_or_else(|| Duration::seconds(DEFAULT_LOGIN_TIMEOUT_SECS));
        require_positive("login_timeout", login_timeout)?;

        let clock_skew = self.clock_skew.unwrap_or_else(Duration::zero);
        if clock_skew < Duration::zero() {
            return Err(ConfigError::InvalidValue {
                field: "clock_skew",
                reason: "must not be negative".into(),
            });
        }

        let max_chain_depth = self.max_chain_depth.unwrap_or(DEFAULT_MAX_DEPTH);
        if max_chain_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_chain_depth",
                reason: "must be at least 1".into(),
            });
        }

        Ok(FederationConfig {
            app_name: self.app_name.unwrap_or_else(|| "healthid-rp".to_string()),
            iss,
            sub,
            federation_master,
            entity_signing_keys,
            keys,
            trust_anchor,
            ttl,
            redirect_uris,
            scopes,
            max_chain_depth,
            clock_skew,
            login_timeout,
        })
    }
}

fn require_uri(field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    let value = value.ok_or(ConfigError::Missing(field))?;
    match Url::parse(&value) {
        Ok(url) if url.has_host() => Ok(value),
        _ => Err(ConfigError::InvalidUri { field, value }),
    }
}

fn require_positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value <= Duration::zero() {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be positive".into(),
        });
    }
    Ok(())
}

// ============================================================================
// Server
// ============================================================================

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8080;

/// Default timeout for outgoing requests, in seconds
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Process settings for the relying party server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub http_timeout: std::time::Duration,
    pub cache_capacity: u64,
    pub federation: FederationConfig,
}

impl ServerConfig {
    /// Load from `HEALTHID_*` environment variables
    ///
    /// Required:
    /// - `HEALTHID_BASE_URI`: issuer identifier of this relying party
    /// - `HEALTHID_FEDERATION_MASTER`: trust anchor entity identifier
    /// - `HEALTHID_TRUST_ANCHOR_JWKS_PATH`: pinned anchor JWKS (JSON)
    /// - `HEALTHID_SIGNING_KEY_PATH`: private signing JWK (JSON)
    /// - `HEALTHID_ENCRYPTION_KEYS_PATH`: private encryption JWKS (JSON)
    ///
    /// Optional: `HEALTHID_PORT`, `HEALTHID_TRUSTED_SIGNING_KEYS_PATH`,
    /// `HEALTHID_REDIRECT_URIS` (comma separated), `HEALTHID_SCOPES`
    /// (space separated), `HEALTHID_APP_NAME`, `HEALTHID_STATEMENT_TTL_SECS`,
    /// `HEALTHID_MAX_CHAIN_DEPTH`, `HEALTHID_CLOCK_SKEW_SECS`,
    /// `HEALTHID_LOGIN_TIMEOUT_SECS`, `HEALTHID_HTTP_TIMEOUT_SECS`,
    /// `HEALTHID_CACHE_CAPACITY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("HEALTHID_"))
            .collect();
        Self::from_vars(&vars)
    }

    /// Load from an explicit variable map
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| vars.get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base_uri = get("HEALTHID_BASE_URI").ok_or(ConfigError::Missing("HEALTHID_BASE_URI"))?;
        let base_uri = base_uri.trim_end_matches('/').to_string();

        let signing_key: Jwk = read_json(
            "HEALTHID_SIGNING_KEY_PATH",
            &get("HEALTHID_SIGNING_KEY_PATH").ok_or(ConfigError::Missing("HEALTHID_SIGNING_KEY_PATH"))?,
        )?;
        let enc_keys: Jwks = read_json(
            "HEALTHID_ENCRYPTION_KEYS_PATH",
            &get("HEALTHID_ENCRYPTION_KEYS_PATH")
                .ok_or(ConfigError::Missing("HEALTHID_ENCRYPTION_KEYS_PATH"))?,
        )?;
        let anchor_jwks: Jwks = read_json(
            "HEALTHID_TRUST_ANCHOR_JWKS_PATH",
            &get("HEALTHID_TRUST_ANCHOR_JWKS_PATH")
                .ok_or(ConfigError::Missing("HEALTHID_TRUST_ANCHOR_JWKS_PATH"))?,
        )?;

        let mut builder = FederationConfig::builder()
            .iss(base_uri.clone())
            .sub(base_uri.clone())
            .federation_master(
                get("HEALTHID_FEDERATION_MASTER").ok_or(ConfigError::Missing("HEALTHID_FEDERATION_MASTER"))?,
            )
            .entity_signing_key(signing_key)
            .relying_party_enc_keys(enc_keys)
            .trust_anchor_jwks(anchor_jwks);

        if let Some(path) = get("HEALTHID_TRUSTED_SIGNING_KEYS_PATH") {
            builder = builder.entity_signing_keys(read_json("HEALTHID_TRUSTED_SIGNING_KEYS_PATH", &path)?);
        }

        let redirect_uris = match get("HEALTHID_REDIRECT_URIS") {
            Some(list) => list
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect(),
            None => vec![format!("{}/auth/callback", base_uri)],
        };
        builder = builder.redirect_uris(redirect_uris);

        if let Some(scopes) = get("HEALTHID_SCOPES") {
            builder = builder.scopes(scopes.split_whitespace().map(str::to_string).collect());
        }
        if let Some(app_name) = get("HEALTHID_APP_NAME") {
            builder = builder.app_name(app_name);
        }
        if let Some(secs) = parse_var::<i64>(&get, "HEALTHID_STATEMENT_TTL_SECS")? {
            builder = builder.ttl(Duration::seconds(secs));
        }
        if let Some(depth) = parse_var::<usize>(&get, "HEALTHID_MAX_CHAIN_DEPTH")? {
            builder = builder.max_chain_depth(depth);
        }
        if let Some(secs) = parse_var::<i64>(&get, "HEALTHID_CLOCK_SKEW_SECS")? {
            builder = builder.clock_skew(Duration::seconds(secs));
        }
        if let Some(secs) = parse_var::<i64>(&get, "HEALTHID_LOGIN_TIMEOUT_SECS")? {
            builder = builder.login_timeout(Duration::seconds(secs));
        }

        Ok(Self {
            port: parse_var(&get, "HEALTHID_PORT")?.unwrap_or(DEFAULT_PORT),
            http_timeout: std::time::Duration::from_secs(
                parse_var(&get, "HEALTHID_HTTP_TIMEOUT_SECS")?.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
            cache_capacity: parse_var(&get, "HEALTHID_CACHE_CAPACITY")?.unwrap_or(1_000),
            federation: builder.build()?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    get(name)
        .map(|v| {
            v.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                field: name,
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn read_json<T: serde::de::DeserializeOwned>(field: &'static str, path: &str) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(Path::new(path)).map_err(|e| ConfigError::Io {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&contents).map_err(|e| ConfigError::InvalidKey {
        field,
        reason: e.to_string(),
    })
}
