//! Allow-list validation for stored affiliate URLs
//!
//! A stored affiliate URL is only ever used as a redirect target after it
//! has passed through [`validate_affiliate_url`]. The returned
//! [`ValidatedUrl`] cannot be constructed any other way.

use thiserror::Error;
use url::{Host, Url};

/// Query parameter names (and value prefixes) that must never survive
/// into an outbound URL.
const DANGEROUS_SCHEMES: &[&str] = &["javascript", "data", "vbscript", "file"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("affiliate url is empty")]
    Empty,
    #[error("affiliate url could not be parsed: {0}")]
    Unparseable(String),
    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("affiliate url has no host")]
    MissingHost,
    #[error("host '{0}' is not an allowed partner domain")]
    HostNotAllowed(String),
    #[error("affiliate url for host '{0}' embeds credentials")]
    EmbeddedCredentials(String),
}

impl ValidationError {
    /// The host the rejected URL pointed at, if it got far enough to have one.
    pub fn attempted_host(&self) -> Option<&str> {
        match self {
            ValidationError::HostNotAllowed(host) | ValidationError::EmbeddedCredentials(host) => {
                Some(host)
            }
            _ => None,
        }
    }
}

/// An https URL on an allow-listed partner host with dangerous query
/// parameters removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl(Url);

impl ValidatedUrl {
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Returns true when `host` equals one of `allowed_domains` or is a
/// subdomain of one.
pub fn is_allowed_host(host: &str, allowed_domains: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    allowed_domains.iter().any(|domain| {
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            return false;
        }
        host == domain
            || host
                .strip_suffix(domain.as_str())
                .is_some_and(|prefix| prefix.ends_with('.') && prefix.len() > 1)
    })
}

fn is_dangerous_param(name: &str, value: &str) -> bool {
    let value = value.trim_start().to_ascii_lowercase();
    DANGEROUS_SCHEMES.iter().any(|scheme| {
        name.eq_ignore_ascii_case(scheme)
            || value
                .strip_prefix(scheme)
                .is_some_and(|rest| rest.starts_with(':'))
    })
}

/// Validate a stored affiliate URL against the partner allow-list.
pub fn validate_affiliate_url(
    raw: &str,
    allowed_domains: &[String],
) -> Result<ValidatedUrl, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::Empty);
    }

    let mut url = Url::parse(raw).map_err(|e| ValidationError::Unparseable(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }

    let host = match url.host() {
        Some(Host::Domain(domain)) => domain.to_ascii_lowercase(),
        // Raw IP literals are never partner hosts
        Some(other) => return Err(ValidationError::HostNotAllowed(other.to_string())),
        None => return Err(ValidationError::MissingHost),
    };

    if !is_allowed_host(&host, allowed_domains) {
        return Err(ValidationError::HostNotAllowed(host));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(ValidationError::EmbeddedCredentials(host));
    }

    if url.scheme() == "http" {
        if url.port() == Some(80) {
            let _ = url.set_port(None);
        }
        url.set_scheme("https")
            .map_err(|_| ValidationError::UnsupportedScheme("http".to_string()))?;
    }

    strip_dangerous_params(&mut url);

    Ok(ValidatedUrl(url))
}

fn strip_dangerous_params(url: &mut Url) {
    if url.query().is_none() {
        return;
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let total = pairs.len();
    let kept: Vec<(String, String)> = pairs
        .into_iter()
        .filter(|(k, v)| !is_dangerous_param(k, v))
        .collect();

    if kept.len() == total {
        return;
    }

    tracing::debug!(
        removed = total - kept.len(),
        "stripped dangerous query parameters from affiliate url"
    );

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
}
