use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;

/// API key check for the reporting API
pub struct AuthService {
    api_keys: Arc<Vec<String>>,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Self {
        if config.api_keys.is_empty() {
            tracing::warn!("API_KEYS is empty: the reporting API accepts unauthenticated requests");
        }
        Self {
            api_keys: Arc::new(config.api_keys.clone()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    pub fn validate_key(&self, key: &str) -> bool {
        // No keys configured: auth is disabled
        if self.api_keys.is_empty() {
            return true;
        }

        // Check every key so timing does not reveal which one matched
        self.api_keys
            .iter()
            .fold(0u8, |matched, k| {
                matched | k.as_bytes().ct_eq(key.as_bytes()).unwrap_u8()
            })
            == 1
    }
}

pub async fn auth_middleware(
    State(auth_service): State<Arc<AuthService>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let api_key = headers
        .get("X-API-Key")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if auth_service.validate_key(api_key) {
        next.run(request).await
    } else {
        tracing::debug!(path = %request.uri().path(), "rejected request without a valid API key");
        (StatusCode::UNAUTHORIZED, "Invalid or missing API key").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_checked() {
        let auth = AuthService::new(&AuthConfig {
            api_keys: vec!["alpha".to_string(), "beta".to_string()],
        });
        assert!(auth.is_enabled());
        assert!(auth.validate_key("beta"));
        assert!(!auth.validate_key("gamma"));
        assert!(!auth.validate_key(""));
        assert!(!auth.validate_key("alph"));
    }

    #[test]
    fn test_empty_key_list_disables_auth() {
        let auth = AuthService::new(&AuthConfig { api_keys: vec![] });
        assert!(!auth.is_enabled());
        assert!(auth.validate_key(""));
    }
}
