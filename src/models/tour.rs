use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A bookable partner tour. Read-only from the redirect path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Tour {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub affiliate_url: Option<String>,
    pub operator_name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Catalog import record, keyed by slug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTour {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub affiliate_url: Option<String>,
    pub operator_name: String,
}

pub const MAX_SLUG_LEN: usize = 128;

/// Trim and lower-case a slug, returning `None` when it is not a
/// well-formed catalog slug.
pub fn normalize_slug(raw: &str) -> Option<String> {
    let slug = raw.trim().to_ascii_lowercase();
    let well_formed = !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_');
    well_formed.then_some(slug)
}
