//! Tracking parameter injection for outbound partner URLs

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use super::validator::ValidatedUrl;
use crate::config::PartnerConfig;

pub const PARTNER_ID_PARAM: &str = "partner_id";
pub const TRACKING_ID_PARAM: &str = "tid";
pub const CLICK_ID_PARAM: &str = "click_id";
pub const TIMESTAMP_PARAM: &str = "timestamp";
pub const PLACEMENT_PARAM: &str = "placement";

/// Parameters we own on the outbound URL. Any pre-existing value is dropped.
pub(crate) const RESERVED_PARAMS: &[&str] = &[
    PARTNER_ID_PARAM,
    TRACKING_ID_PARAM,
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_content",
    "utm_term",
    PLACEMENT_PARAM,
    CLICK_ID_PARAM,
    TIMESTAMP_PARAM,
];

const MAX_UTM_LEN: usize = 128;

/// Where on the site the outbound link was rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    TourDetail,
    TourCard,
    Featured,
    ServerRedirect,
}

impl Placement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Placement::TourDetail => "tour-detail",
            Placement::TourCard => "tour-card",
            Placement::Featured => "featured",
            Placement::ServerRedirect => "server-redirect",
        }
    }

    /// Unknown or missing tags mean the visitor came through the plain
    /// server redirect.
    pub fn from_query(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse().ok())
            .unwrap_or(Placement::ServerRedirect)
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Placement {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tour-detail" => Ok(Placement::TourDetail),
            "tour-card" => Ok(Placement::TourCard),
            "featured" => Ok(Placement::Featured),
            "server-redirect" => Ok(Placement::ServerRedirect),
            _ => Err(()),
        }
    }
}

/// Campaign attribution fields, as supplied by the inbound page or as
/// resolved onto the outbound URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmFields {
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
}

fn clean_utm(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.chars().take(MAX_UTM_LEN).collect())
}

impl UtmFields {
    /// Trim, drop empty values and cap lengths.
    pub fn sanitized(&self) -> Self {
        Self {
            utm_source: clean_utm(self.utm_source.as_deref()),
            utm_medium: clean_utm(self.utm_medium.as_deref()),
            utm_campaign: clean_utm(self.utm_campaign.as_deref()),
            utm_content: clean_utm(self.utm_content.as_deref()),
            utm_term: clean_utm(self.utm_term.as_deref()),
        }
    }
}

/// Outbound URL plus the values that were generated for it.
#[derive(Debug, Clone)]
pub struct TrackedUrl {
    pub url: Url,
    pub click_id: String,
    pub timestamp_ms: i64,
    /// UTM values as written onto the URL (defaults applied)
    pub utm: UtmFields,
}

/// Opaque per-click identifier: 16 random bytes, base64url without padding.
pub fn generate_click_id() -> String {
    BASE64_URL_SAFE_NO_PAD.encode(rand::random::<[u8; 16]>())
}

/// Inject tracking parameters with a fresh click id and the current time.
pub fn inject_tracking_params(
    url: &ValidatedUrl,
    partner: &PartnerConfig,
    tour_slug: &str,
    inbound: &UtmFields,
    placement: Placement,
) -> TrackedUrl {
    inject_tracking_params_with(
        url,
        partner,
        tour_slug,
        inbound,
        placement,
        generate_click_id(),
        chrono::Utc::now().timestamp_millis(),
    )
}

/// Deterministic core of [`inject_tracking_params`].
pub fn inject_tracking_params_with(
    url: &ValidatedUrl,
    partner: &PartnerConfig,
    tour_slug: &str,
    inbound: &UtmFields,
    placement: Placement,
    click_id: String,
    timestamp_ms: i64,
) -> TrackedUrl {
    let inbound = inbound.sanitized();
    let utm = UtmFields {
        utm_source: Some(
            inbound
                .utm_source
                .unwrap_or_else(|| partner.default_utm_source.clone()),
        ),
        utm_medium: Some(
            inbound
                .utm_medium
                .unwrap_or_else(|| partner.default_utm_medium.clone()),
        ),
        utm_campaign: Some(
            inbound
                .utm_campaign
                .unwrap_or_else(|| partner.default_utm_campaign.clone()),
        ),
        utm_content: Some(inbound.utm_content.unwrap_or_else(|| tour_slug.to_string())),
        utm_term: inbound.utm_term,
    };

    let mut out = url.as_url().clone();
    let existing: Vec<(String, String)> = out
        .query_pairs()
        .filter(|(k, _)| {
            !RESERVED_PARAMS
                .iter()
                .any(|reserved| k.eq_ignore_ascii_case(reserved))
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut query = out.query_pairs_mut();
        query.clear();
        query.extend_pairs(existing);
        query.append_pair(PARTNER_ID_PARAM, &partner.partner_id);
        query.append_pair(TRACKING_ID_PARAM, &partner.tracking_id);
        for (name, value) in [
            ("utm_source", &utm.utm_source),
            ("utm_medium", &utm.utm_medium),
            ("utm_campaign", &utm.utm_campaign),
            ("utm_content", &utm.utm_content),
            ("utm_term", &utm.utm_term),
        ] {
            if let Some(value) = value {
                query.append_pair(name, value);
            }
        }
        query.append_pair(PLACEMENT_PARAM, placement.as_str());
        query.append_pair(CLICK_ID_PARAM, &click_id);
        query.append_pair(TIMESTAMP_PARAM, &timestamp_ms.to_string());
    }

    TrackedUrl {
        url: out,
        click_id,
        timestamp_ms,
        utm,
    }
}
