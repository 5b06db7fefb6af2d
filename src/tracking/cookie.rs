//! Signed attribution cookie
//!
//! Value format: `base64url(token).base64url(hmac_sha256(key, token))`
//! where `token` is 32 random bytes. The cookie carries no data beyond the
//! token itself; the signature only guards against a client forging or
//! editing it.

use anyhow::{anyhow, Result};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::{CookieConfig, MAX_COOKIE_LIFETIME_DAYS};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 32;

/// Issues and verifies attribution tokens with an injected secret.
#[derive(Clone)]
pub struct AttributionSigner {
    mac: HmacSha256,
}

impl AttributionSigner {
    /// Build a signer. Without a secret a random key is generated, which
    /// means cookies issued before a restart stop verifying.
    pub fn new(secret: Option<&str>) -> Result<Self> {
        match secret {
            Some(secret) => {
                if secret.len() < 32 {
                    tracing::warn!(
                        "ATTRIBUTION_COOKIE_SECRET is shorter than 32 bytes; use a longer random secret"
                    );
                }
                Self::from_key(secret.as_bytes())
            }
            None => {
                tracing::warn!(
                    "ATTRIBUTION_COOKIE_SECRET not set, using a random key: attribution cookies will not survive restarts"
                );
                Self::from_key(&rand::random::<[u8; 32]>())
            }
        }
    }

    pub fn from_key(key: &[u8]) -> Result<Self> {
        let mac =
            HmacSha256::new_from_slice(key).map_err(|e| anyhow!("Failed to create HMAC: {}", e))?;
        Ok(Self { mac })
    }

    fn signature(&self, token_b64: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(token_b64.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Generate a fresh signed cookie value
    pub fn issue(&self) -> String {
        let token = BASE64_URL_SAFE_NO_PAD.encode(rand::random::<[u8; TOKEN_LEN]>());
        let signature = BASE64_URL_SAFE_NO_PAD.encode(self.signature(&token));
        format!("{}.{}", token, signature)
    }

    /// Check a cookie value, returning the token bytes when it is genuine.
    pub fn verify(&self, value: &str) -> Option<Vec<u8>> {
        let (token_b64, signature_b64) = value.split_once('.')?;
        if signature_b64.contains('.') {
            return None;
        }

        let provided = BASE64_URL_SAFE_NO_PAD.decode(signature_b64).ok()?;
        let expected = self.signature(token_b64);
        if !bool::from(expected.ct_eq(&provided[..])) {
            return None;
        }

        let token = BASE64_URL_SAFE_NO_PAD.decode(token_b64).ok()?;
        (token.len() == TOKEN_LEN).then_some(token)
    }
}

/// What happened to the attribution cookie on this request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributionStatus {
    /// A valid cookie was presented and left alone
    Existing,
    /// No cookie was presented; a new one was set
    Issued,
    /// A cookie failed verification and was replaced
    Replaced,
}

/// Reads and (re)issues the attribution cookie.
#[derive(Clone)]
pub struct AttributionCookies {
    signer: AttributionSigner,
    name: String,
    lifetime: time::Duration,
}

impl AttributionCookies {
    pub fn new(signer: AttributionSigner, config: &CookieConfig) -> Self {
        Self {
            signer,
            name: config.name.clone(),
            lifetime: time::Duration::days(
                config.lifetime_days.clamp(1, MAX_COOKIE_LIFETIME_DAYS),
            ),
        }
    }

    pub fn from_config(config: &CookieConfig) -> Result<Self> {
        let signer = AttributionSigner::new(config.secret.as_deref())?;
        Ok(Self::new(signer, config))
    }

    /// Keep a valid cookie, otherwise add a freshly signed one to the jar.
    pub fn apply(&self, jar: CookieJar) -> (CookieJar, AttributionStatus) {
        let status = match jar.get(&self.name) {
            Some(cookie) if self.signer.verify(cookie.value()).is_some() => {
                return (jar, AttributionStatus::Existing);
            }
            Some(_) => {
                tracing::debug!(cookie = %self.name, "attribution cookie failed verification, replacing");
                AttributionStatus::Replaced
            }
            None => AttributionStatus::Issued,
        };

        let cookie = Cookie::build((self.name.clone(), self.signer.issue()))
            .path("/")
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Strict)
            .max_age(self.lifetime)
            .build();

        (jar.add(cookie), status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> AttributionSigner {
        AttributionSigner::from_key(b"test_secret_key_for_attribution_cookie").unwrap()
    }

    fn flip(value: &str, index: usize) -> String {
        let mut chars: Vec<char> = value.chars().collect();
        chars[index] = if chars[index] == 'A' { 'B' } else { 'A' };
        chars.into_iter().collect()
    }

    #[test]
    fn test_issue_and_verify() {
        let signer = signer();
        let value = signer.issue();
        let token = signer.verify(&value).unwrap();
        assert_eq!(token.len(), TOKEN_LEN);
    }

    #[test]
    fn test_single_flipped_character_is_rejected() {
        let signer = signer();
        let value = signer.issue();
        for index in [0, 10, value.len() / 2, value.len() - 1] {
            let tampered = flip(&value, index);
            assert_ne!(tampered, value);
            assert!(
                signer.verify(&tampered).is_none(),
                "tampered at {index} still verified"
            );
        }
    }

    #[test]
    fn test_other_key_is_rejected() {
        let value = signer().issue();
        let other = AttributionSigner::from_key(b"a_completely_different_secret_key!!").unwrap();
        assert!(other.verify(&value).is_none());
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let signer = signer();
        assert!(signer.verify("").is_none());
        assert!(signer.verify("no-separator").is_none());
        assert!(signer.verify("a.b.c").is_none());
        assert!(signer.verify("!!!.???").is_none());
    }

    #[test]
    fn test_apply_issues_keeps_and_replaces() {
        let cookies = AttributionCookies::new(signer(), &CookieConfig::default());

        let (jar, status) = cookies.apply(CookieJar::new());
        assert_eq!(status, AttributionStatus::Issued);
        let issued = jar.get("bna_attr").unwrap().clone();
        assert_eq!(issued.http_only(), Some(true));
        assert_eq!(issued.secure(), Some(true));
        assert_eq!(issued.same_site(), Some(SameSite::Strict));
        assert_eq!(issued.max_age(), Some(time::Duration::days(30)));

        let presented = CookieJar::new().add(Cookie::new("bna_attr", issued.value().to_string()));
        let (jar, status) = cookies.apply(presented);
        assert_eq!(status, AttributionStatus::Existing);
        assert_eq!(jar.get("bna_attr").unwrap().value(), issued.value());

        let forged = CookieJar::new().add(Cookie::new("bna_attr", "forged.value"));
        let (jar, status) = cookies.apply(forged);
        assert_eq!(status, AttributionStatus::Replaced);
        assert!(cookies
            .signer
            .verify(jar.get("bna_attr").unwrap().value())
            .is_some());
    }

    #[test]
    fn test_lifetime_is_capped() {
        let config = CookieConfig {
            lifetime_days: i64::MAX,
            ..CookieConfig::default()
        };
        let cookies = AttributionCookies::new(signer(), &config);
        let (jar, _) = cookies.apply(CookieJar::new());
        assert_eq!(
            jar.get("bna_attr").unwrap().max_age(),
            Some(time::Duration::days(MAX_COOKIE_LIFETIME_DAYS))
        );
    }
}
