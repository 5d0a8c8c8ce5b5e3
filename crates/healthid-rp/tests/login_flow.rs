//! Login flow tests: IdP selection through verified identity

mod common;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use healthid_core::{Jwk, Jwks, KeyUse, OpenIdProviderMetadata};
use healthid_federation::ResolveError;
use healthid_rp::{FailureKind, LoginError, PendingLogins, RelyingParty};

use common::{Harness, AUTHORIZATION_ENDPOINT, IDP, RP, TOKEN_ENDPOINT};

fn query(url: &url::Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

/// Drive a login to the token endpoint response, returning the verify result
async fn login_with_token(
    h: &Harness,
    rp: &RelyingParty,
    token: impl FnOnce(&Harness, &healthid_rp::AuthorizationSession) -> String,
) -> Result<healthid_rp::IdentityVerified, LoginError> {
    let pending = h.redirected(rp).await;
    h.client.respond_with(Ok(token(h, pending.session())));
    let state = pending.state().to_string();

    pending
        .receive_code("auth-code-1", &state)?
        .exchange(rp)
        .await?
        .verify(rp)
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn test_full_login() {
    let h = Harness::new();
    let rp = h.relying_party();

    let verified = login_with_token(&h, &rp, |h, s| h.id_token(s)).await.unwrap();

    assert_eq!(verified.idp(), IDP);
    let claims = verified.claims();
    assert_eq!(claims.sub, "X110411675");
    assert_eq!(claims.iss, IDP);
    assert_eq!(
        claims.extra.get("urn:telematik:claims:email"),
        Some(&json!("alice@example.org"))
    );
    assert_eq!(verified.id_token().jws().kid(), Some(h.idp_key.kid().unwrap()));
}

#[tokio::test]
async fn test_verified_claims_equal_issued_claims() {
    let h = Harness::new();
    let rp = h.relying_party();
    let mut issued = None;

    let verified = login_with_token(&h, &rp, |h, s| {
        let claims = h.claims_for(s);
        issued = Some(claims.clone());
        h.encrypt(&h.sign(&claims))
    })
    .await
    .unwrap();

    let roundtrip = serde_json::to_value(verified.claims()).unwrap();
    assert_eq!(Some(roundtrip), issued);
}

#[tokio::test]
async fn test_select_idp_resolves_trust_chain() {
    let h = Harness::new();
    let rp = h.relying_party();

    let selected = rp.select_idp(IDP).await.unwrap();

    assert_eq!(selected.trust_chain().entities(), vec![IDP, common::ANCHOR]);
    assert_eq!(selected.provider().token_endpoint, TOKEN_ENDPOINT);
}

#[tokio::test]
async fn test_authorization_request() {
    let h = Harness::new();
    let rp = h.relying_party();

    let pending = h.redirected(&rp).await;
    let url = pending.authorization_url();
    let params = query(url);
    let session = pending.session();

    assert!(url.as_str().starts_with(AUTHORIZATION_ENDPOINT));
    assert_eq!(params["response_type"], "code");
    assert_eq!(params["client_id"], RP);
    assert_eq!(params["redirect_uri"], "https://rp.example.org/auth/callback");
    assert_eq!(params["scope"], "openid urn:telematik:versicherter");
    assert_eq!(params["state"], pending.state());
    assert_eq!(params["nonce"], session.nonce().expose());
    assert_eq!(params["code_challenge_method"], "S256");

    let expected_challenge =
        URL_SAFE_NO_PAD.encode(Sha256::digest(session.pkce().verifier().expose().as_bytes()));
    assert_eq!(params["code_challenge"], expected_challenge);
    assert!(!params.values().any(|v| v == session.pkce().verifier().expose()));
}

#[tokio::test]
async fn test_each_login_gets_fresh_secrets() {
    let h = Harness::new();
    let rp = h.relying_party();

    let a = h.redirected(&rp).await;
    let b = h.redirected(&rp).await;

    assert_ne!(a.state(), b.state());
    assert_ne!(a.session().nonce(), b.session().nonce());
    assert_ne!(a.session().pkce().challenge(), b.session().pkce().challenge());
}

#[tokio::test]
async fn test_code_exchange_request() {
    let h = Harness::new();
    let rp = h.relying_party();

    let pending = h.redirected(&rp).await;
    let verifier = pending.session().pkce().verifier().expose().to_string();
    let state = pending.state().to_string();
    h.client.respond_with(Ok(h.id_token(pending.session())));

    pending
        .receive_code("auth-code-1", &state)
        .unwrap()
        .exchange(&rp)
        .await
        .unwrap();

    let exchange = h.client.last().unwrap();
    assert_eq!(exchange.token_endpoint, TOKEN_ENDPOINT);
    assert_eq!(exchange.code, "auth-code-1");
    assert_eq!(exchange.code_verifier, verifier);
    assert_eq!(exchange.credentials.client_id, RP);
    assert_eq!(exchange.credentials.redirect_uri, "https://rp.example.org/auth/callback");
}

#[tokio::test]
async fn test_provider_metadata_keys_verify_tokens() {
    let op_key = Jwk::generate_p256("idp-token-signer", KeyUse::Sig);
    let h = Harness::with_provider(Some(OpenIdProviderMetadata {
        authorization_endpoint: AUTHORIZATION_ENDPOINT.to_string(),
        token_endpoint: TOKEN_ENDPOINT.to_string(),
        jwks: Some(Jwks::new(vec![op_key.to_public()])),
        ..OpenIdProviderMetadata::default()
    }));
    let rp = h.relying_party();

    let result = login_with_token(&h, &rp, |h, s| h.encrypt(&h.sign_with(&h.claims_for(s), &op_key))).await;

    assert!(result.is_ok(), "{:?}", result.err());
}

// =============================================================================
// Trust
// =============================================================================

#[tokio::test]
async fn test_untrusted_idp() {
    let h = Harness::new();
    let rp = h.relying_party();

    let err = rp.select_idp("https://rogue-idp.example.org").await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::UntrustedIdp);
    assert!(matches!(err, LoginError::UntrustedIdp(ResolveError::FetchFailed { .. })));
}

#[tokio::test]
async fn test_idp_vouched_by_other_anchor_is_untrusted() {
    let h = Harness::new();
    // Pin a different anchor key
    let config = h
        .config
        .to_builder()
        .trust_anchor_jwks(Jwks::new(vec![Jwk::generate_p256(
            format!("{}#sig", common::ANCHOR),
            KeyUse::Sig,
        )
        .to_public()]))
        .build()
        .unwrap();
    let rp = RelyingParty::new(config, h.fetcher.clone(), h.client.clone(), std::sync::Arc::new(h.jose));

    let err = rp.select_idp(IDP).await.unwrap_err();

    assert!(matches!(
        err,
        LoginError::UntrustedIdp(ResolveError::InvalidTrustChain { .. })
    ));
}

#[tokio::test]
async fn test_idp_without_provider_metadata() {
    let h = Harness::with_provider(None);
    let rp = h.relying_party();

    let err = rp.select_idp(IDP).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::ProviderMetadata);
}

#[tokio::test]
async fn test_idp_with_invalid_authorization_endpoint() {
    let h = Harness::with_provider(Some(OpenIdProviderMetadata {
        authorization_endpoint: "not a url".to_string(),
        token_endpoint: TOKEN_ENDPOINT.to_string(),
        ..OpenIdProviderMetadata::default()
    }));
    let rp = h.relying_party();

    let err = rp.select_idp(IDP).await.unwrap_err();

    assert!(matches!(err, LoginError::ProviderMetadata { .. }));
}

// =============================================================================
// Callback
// =============================================================================

#[tokio::test]
async fn test_state_mismatch_skips_token_endpoint() {
    let h = Harness::new();
    let rp = h.relying_party();

    let pending = h.redirected(&rp).await;
    let err = pending.receive_code("auth-code-1", "forged-state").unwrap_err();

    assert_eq!(err, LoginError::StateMismatch);
    assert_eq!(h.client.calls(), 0);
}

#[tokio::test]
async fn test_empty_code() {
    let h = Harness::new();
    let rp = h.relying_party();

    let pending = h.redirected(&rp).await;
    let state = pending.state().to_string();

    assert_eq!(pending.receive_code("", &state).unwrap_err(), LoginError::MissingCode);
}

#[tokio::test]
async fn test_callback_after_login_timeout() {
    let h = Harness::new();
    let rp = h.relying_party();

    let pending = h.redirected(&rp).await;
    let state = pending.state().to_string();
    let late = pending.session().created_at() + h.config.login_timeout() + Duration::seconds(1);

    let err = pending.receive_code_at("auth-code-1", &state, late).unwrap_err();

    assert_eq!(err, LoginError::SessionExpired);
}

#[tokio::test]
async fn test_pending_logins_are_single_use() {
    let h = Harness::new();
    let rp = h.relying_party();
    let store = PendingLogins::new(10, std::time::Duration::from_secs(600));

    let pending = h.redirected(&rp).await;
    let state = pending.state().to_string();
    store.insert(pending).await;

    assert!(store.take(&state).await.is_some());
    assert!(store.take(&state).await.is_none());
    assert!(store.take("unknown").await.is_none());
}

// =============================================================================
// Token exchange
// =============================================================================

#[tokio::test]
async fn test_exchange_failure_propagates() {
    let h = Harness::new();
    let rp = h.relying_party();

    let pending = h.redirected(&rp).await;
    let state = pending.state().to_string();
    h.client.respond_with(Err(LoginError::IdpRejectedCode {
        error: "invalid_grant".into(),
        description: None,
    }));

    let err = pending
        .receive_code("auth-code-1", &state)
        .unwrap()
        .exchange(&rp)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::IdpRejectedCode);
    assert!(!err.is_retryable());
}

// =============================================================================
// Identity token
// =============================================================================

#[tokio::test]
async fn test_unknown_encryption_key() {
    let h = Harness::new();
    let rp = h.relying_party();
    let foreign = Jwk::generate_p256("someone-elses-enc", KeyUse::Enc);

    let err = login_with_token(&h, &rp, |h, s| h.encrypt_to(&h.sign(&h.claims_for(s)), &foreign.to_public()))
        .await
        .unwrap_err();

    assert_eq!(err, LoginError::UnknownEncryptionKey("someone-elses-enc".into()));
}

#[tokio::test]
async fn test_unknown_signing_key() {
    let h = Harness::new();
    let rp = h.relying_party();
    let rogue = Jwk::generate_p256("rogue-signer", KeyUse::Sig);

    let err = login_with_token(&h, &rp, |h, s| h.encrypt(&h.sign_with(&h.claims_for(s), &rogue)))
        .await
        .unwrap_err();

    assert_eq!(err, LoginError::UnknownSigningKey("rogue-signer".into()));
}

#[tokio::test]
async fn test_forged_signature_with_trusted_kid() {
    let h = Harness::new();
    let rp = h.relying_party();
    // Attacker reuses the IdP's kid with their own key
    let forger = Jwk::generate_p256(h.idp_key.kid().unwrap(), KeyUse::Sig);

    let err = login_with_token(&h, &rp, |h, s| h.encrypt(&h.sign_with(&h.claims_for(s), &forger)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::BadIdToken);
}

#[tokio::test]
async fn test_tampered_payload_decrypts_but_fails_signature() {
    let h = Harness::new();
    let rp = h.relying_party();

    let err = login_with_token(&h, &rp, |h, s| {
        let jws = h.sign(&h.claims_for(s));
        let mut claims = h.claims_for(s);
        claims["sub"] = json!("X999999999");
        let parts: Vec<&str> = jws.split('.').collect();
        let tampered = format!(
            "{}.{}.{}",
            parts[0],
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap()),
            parts[2]
        );
        h.encrypt(&tampered)
    })
    .await
    .unwrap_err();

    match err {
        LoginError::BadIdToken { reason } => assert!(reason.contains("Signature"), "{}", reason),
        other => panic!("expected BadIdToken, got {:?}", other),
    }
}

#[tokio::test]
async fn test_tampered_ciphertext_fails_decryption() {
    let h = Harness::new();
    let rp = h.relying_party();

    let err = login_with_token(&h, &rp, |h, s| {
        let jwe = h.id_token(s);
        let mut parts: Vec<String> = jwe.split('.').map(str::to_string).collect();
        let mut ciphertext = URL_SAFE_NO_PAD.decode(&parts[3]).unwrap();
        ciphertext[0] ^= 0x01;
        parts[3] = URL_SAFE_NO_PAD.encode(ciphertext);
        parts.join(".")
    })
    .await
    .unwrap_err();

    match err {
        LoginError::BadIdToken { reason } => assert!(reason.contains("Decryption"), "{}", reason),
        other => panic!("expected BadIdToken, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unencrypted_token_rejected() {
    let h = Harness::new();
    let rp = h.relying_party();

    let err = login_with_token(&h, &rp, |h, s| h.sign(&h.claims_for(s)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::BadIdToken);
}

async fn claim_mismatch(mutate: impl FnOnce(&mut serde_json::Value)) -> LoginError {
    let h = Harness::new();
    let rp = h.relying_party();

    login_with_token(&h, &rp, |h, s| {
        let mut claims = h.claims_for(s);
        mutate(&mut claims);
        h.encrypt(&h.sign(&claims))
    })
    .await
    .unwrap_err()
}

#[tokio::test]
async fn test_nonce_mismatch() {
    let err = claim_mismatch(|c| c["nonce"] = json!("replayed-nonce")).await;
    assert_eq!(err, LoginError::BadIdToken { reason: "nonce mismatch".into() });
}

#[tokio::test]
async fn test_missing_nonce() {
    let err = claim_mismatch(|c| {
        c.as_object_mut().unwrap().remove("nonce");
    })
    .await;
    assert_eq!(err, LoginError::BadIdToken { reason: "nonce mismatch".into() });
}

#[tokio::test]
async fn test_audience_mismatch() {
    let err = claim_mismatch(|c| c["aud"] = json!("https://other-rp.example.org")).await;
    assert_eq!(err, LoginError::BadIdToken { reason: "audience mismatch".into() });
}

#[tokio::test]
async fn test_audience_list_containing_rp() {
    let h = Harness::new();
    let rp = h.relying_party();

    let result = login_with_token(&h, &rp, |h, s| {
        let mut claims = h.claims_for(s);
        claims["aud"] = json!(["https://other-rp.example.org", RP]);
        h.encrypt(&h.sign(&claims))
    })
    .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_issuer_mismatch() {
    let err = claim_mismatch(|c| c["iss"] = json!("https://other-idp.example.org")).await;
    assert_eq!(err, LoginError::BadIdToken { reason: "issuer mismatch".into() });
}

#[tokio::test]
async fn test_expired_token() {
    let err = claim_mismatch(|c| c["exp"] = json!(Utc::now().timestamp() - 60)).await;
    assert_eq!(err, LoginError::BadIdToken { reason: "token expired".into() });
}

#[tokio::test]
async fn test_expired_token_within_clock_skew() {
    let mut h = Harness::new();
    h.config = h.config.to_builder().clock_skew(Duration::seconds(120)).build().unwrap();
    let rp = h.relying_party();

    let result = login_with_token(&h, &rp, |h, s| {
        let mut claims = h.claims_for(s);
        claims["exp"] = json!(Utc::now().timestamp() - 60);
        h.encrypt(&h.sign(&claims))
    })
    .await;

    assert!(result.is_ok());
}
