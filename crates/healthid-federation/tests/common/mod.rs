//! Shared fixture: an in-memory federation of signed statements

#![allow(dead_code)]

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use healthid_core::{EntityStatementBuilder, Jwk, Jwks, KeyUse, P256Jose};
use healthid_federation::{MemoryFetcher, ResolverConfig, TrustAnchor, TrustChainResolver};

pub const ANCHOR: &str = "https://anchor.example.org";
pub const INTERMEDIATE: &str = "https://intermediate.example.org";
pub const LEAF: &str = "https://idp.example.org";

/// Entities, their keys, and the statements they published
pub struct Federation {
    /// Reference time; statements are valid an hour either side of it
    pub now: DateTime<Utc>,
    pub jose: P256Jose,
    pub fetcher: Arc<MemoryFetcher>,
    keys: HashMap<String, Jwk>,
}

impl Federation {
    pub fn new() -> Self {
        Self {
            now: Utc::now().trunc_subsecs(0),
            jose: P256Jose::new(),
            fetcher: Arc::new(MemoryFetcher::new()),
            keys: HashMap::new(),
        }
    }

    /// Scenario A: T <- I <- L, all valid
    pub fn three_tier() -> Self {
        let mut fed = Self::new();
        fed.configuration(ANCHOR, &[]);
        fed.configuration(INTERMEDIATE, &[ANCHOR]);
        fed.configuration(LEAF, &[INTERMEDIATE]);
        fed.subordinate(ANCHOR, INTERMEDIATE);
        fed.subordinate(INTERMEDIATE, LEAF);
        fed
    }

    /// Private signing key of `entity`, generated on first use
    pub fn key(&mut self, entity: &str) -> Jwk {
        self.keys
            .entry(entity.to_string())
            .or_insert_with(|| Jwk::generate_p256(format!("{}#sig", entity), KeyUse::Sig))
            .clone()
    }

    /// Replace the key of `entity`
    pub fn rotate_key(&mut self, entity: &str) -> Jwk {
        let key = Jwk::generate_p256(format!("{}#sig-2", entity), KeyUse::Sig);
        self.keys.insert(entity.to_string(), key.clone());
        key
    }

    pub fn anchor(&mut self) -> TrustAnchor {
        self.trust_anchor(ANCHOR)
    }

    /// `entity` as a trust anchor, pinned to its current key
    pub fn trust_anchor(&mut self, entity: &str) -> TrustAnchor {
        let key = self.key(entity);
        TrustAnchor::new(entity, Jwks::new(vec![key.to_public()]))
    }

    pub fn resolver(&mut self) -> TrustChainResolver {
        self.resolver_with(ResolverConfig::default())
    }

    pub fn resolver_with(&mut self, config: ResolverConfig) -> TrustChainResolver {
        let anchor = self.anchor();
        self.resolver_for(anchor).with_config(config)
    }

    pub fn resolver_for(&mut self, anchor: TrustAnchor) -> TrustChainResolver {
        TrustChainResolver::new(self.fetcher.clone(), Arc::new(self.jose), anchor)
    }

    /// A statement by `iss` about `sub`, valid for an hour either side of `now`
    pub fn builder(&mut self, iss: &str, sub: &str) -> EntityStatementBuilder {
        let key = self.key(sub);
        EntityStatementBuilder::new()
            .iss(iss)
            .sub(sub)
            .validity(self.now - Duration::hours(1), self.now + Duration::hours(1))
            .add_key(&key)
    }

    /// Sign with the current key of `signer`
    pub fn sign(&mut self, signer: &str, builder: EntityStatementBuilder) -> String {
        let key = self.key(signer);
        builder.sign(&self.jose, &key).unwrap().raw().to_string()
    }

    pub fn configuration(&mut self, entity: &str, hints: &[&str]) {
        let builder = self
            .builder(entity, entity)
            .authority_hints(hints.iter().map(|h| h.to_string()).collect());
        let raw = self.sign(entity, builder);
        self.fetcher.insert_configuration(entity, raw);
    }

    pub fn subordinate(&mut self, superior: &str, subject: &str) {
        let builder = self.builder(superior, subject);
        let raw = self.sign(superior, builder);
        self.fetcher.insert_subordinate(superior, subject, raw);
    }

    /// Publish a linear chain `entities[0] -> entities[1] -> ... -> root`
    pub fn linear(&mut self, entities: &[String], root: &str) {
        self.configuration(root, &[]);
        for (i, entity) in entities.iter().enumerate() {
            let superior = entities.get(i + 1).map(String::as_str).unwrap_or(root);
            self.configuration(entity, &[superior]);
            self.subordinate(superior, entity);
        }
    }

    /// Replace a published statement with one whose signature has a flipped bit
    pub fn corrupt_signature(&self, issuer: &str, subject: &str, index: usize) {
        let raw = self.fetcher.get(issuer, subject).unwrap();
        let corrupted = flip_signature_byte(&raw, index);
        if issuer == subject {
            self.fetcher.insert_configuration(issuer, corrupted);
        } else {
            self.fetcher.insert_subordinate(issuer, subject, corrupted);
        }
    }
}

/// Flip one bit of the decoded signature of a compact JWS
pub fn flip_signature_byte(raw: &str, index: usize) -> String {
    let (input, signature) = raw.rsplit_once('.').unwrap();
    let mut bytes = URL_SAFE_NO_PAD.decode(signature).unwrap();
    let i = index % bytes.len();
    bytes[i] ^= 0x01;
    format!("{}.{}", input, URL_SAFE_NO_PAD.encode(bytes))
}
