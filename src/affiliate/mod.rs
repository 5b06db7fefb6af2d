//! Affiliate destination handling
//!
//! Turns a stored partner URL into the outbound redirect target:
//! allow-list validation first, then tracking parameter injection. When a
//! tour cannot be resolved the visitor is sent to the partner search page
//! instead.

pub mod params;
pub mod validator;

pub use params::{
    generate_click_id, inject_tracking_params, inject_tracking_params_with, Placement,
    TrackedUrl, UtmFields,
};
pub use validator::{is_allowed_host, validate_affiliate_url, ValidatedUrl, ValidationError};

use url::Url;

use crate::config::PartnerConfig;

const FALLBACK_SEARCH_PARAM: &str = "search";

/// Partner settings with the fallback URL already validated.
#[derive(Debug, Clone)]
pub struct AffiliatePolicy {
    partner: PartnerConfig,
    fallback: ValidatedUrl,
}

impl AffiliatePolicy {
    pub fn new(partner: PartnerConfig) -> Result<Self, ValidationError> {
        let fallback = validate_affiliate_url(&partner.fallback_url, &partner.allowed_domains)?;
        Ok(Self { partner, fallback })
    }

    pub fn partner(&self) -> &PartnerConfig {
        &self.partner
    }

    pub fn validate(&self, raw: &str) -> Result<ValidatedUrl, ValidationError> {
        validate_affiliate_url(raw, &self.partner.allowed_domains)
    }

    pub fn track(
        &self,
        url: &ValidatedUrl,
        tour_slug: &str,
        inbound: &UtmFields,
        placement: Placement,
    ) -> TrackedUrl {
        inject_tracking_params(url, &self.partner, tour_slug, inbound, placement)
    }

    /// Partner search page for a slug we could not resolve.
    ///
    /// `search` comes first so the partner's search page picks it up even
    /// when it ignores unknown parameters. Any `search` or tracking parameter already on the configured URL is
    /// dropped so each appears exactly once.
    pub fn fallback_for(&self, slug: &str) -> Url {
        let mut url = self.fallback.as_url().clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| {
                !k.eq_ignore_ascii_case(FALLBACK_SEARCH_PARAM)
                    && !params::RESERVED_PARAMS
                        .iter()
                        .any(|reserved| k.eq_ignore_ascii_case(reserved))
            })
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        url.query_pairs_mut()
            .clear()
            .append_pair(FALLBACK_SEARCH_PARAM, slug)
            .extend_pairs(kept)
            .append_pair(params::PARTNER_ID_PARAM, &self.partner.partner_id)
            .append_pair(params::TRACKING_ID_PARAM, &self.partner.tracking_id);
        url
    }
}
