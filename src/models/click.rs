use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

/// One successful outbound redirect. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ClickEvent {
    pub click_id: String,
    pub tour_id: i64,
    pub tour_slug: String,
    /// Client IP with the host part zeroed
    pub ip_anonymized: Option<String>,
    /// SHA-256 hex of the User-Agent header
    pub user_agent_hash: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
    pub placement: String,
    /// Unix milliseconds, same value as the outbound `timestamp` parameter
    pub clicked_at: i64,
}

/// Filters for listing click events
#[derive(Debug, Clone, Default)]
pub struct ClickQuery {
    pub tour_slug: Option<String>,
    /// Inclusive lower bound, unix milliseconds
    pub start_time: Option<i64>,
    /// Exclusive upper bound, unix milliseconds
    pub end_time: Option<i64>,
    pub limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickGroupBy {
    #[default]
    Tour,
    Source,
    Campaign,
    Placement,
    Day,
}

impl ClickGroupBy {
    /// SQL expression producing the grouping dimension as text.
    pub(crate) fn sql_expression(&self) -> &'static str {
        match self {
            ClickGroupBy::Tour => "tour_slug",
            ClickGroupBy::Source => "COALESCE(utm_source, '(none)')",
            ClickGroupBy::Campaign => "COALESCE(utm_campaign, '(none)')",
            ClickGroupBy::Placement => "placement",
            ClickGroupBy::Day => "CAST((clicked_at / 86400000) * 86400000 AS TEXT)",
        }
    }
}

impl FromStr for ClickGroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tour" => Ok(ClickGroupBy::Tour),
            "source" => Ok(ClickGroupBy::Source),
            "campaign" => Ok(ClickGroupBy::Campaign),
            "placement" => Ok(ClickGroupBy::Placement),
            "day" => Ok(ClickGroupBy::Day),
            other => Err(format!(
                "unknown group_by '{other}', expected one of: tour, source, campaign, placement, day"
            )),
        }
    }
}

/// Click count for one grouping dimension value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ClickAggregate {
    pub dimension: String,
    pub clicks: i64,
}
