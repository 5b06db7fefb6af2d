//! Tour catalog import
//!
//! The catalog is a JSON array of `{slug, title, affiliate_url?, operator_name}`
//! records. Affiliate URLs that fail validation are still imported: the
//! redirect path falls back to partner search for them, and the report
//! tells the operator which ones need fixing.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use crate::affiliate::AffiliatePolicy;
use crate::models::NewTour;
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportIssue {
    pub slug: String,
    pub reason: String,
}

/// Outcome of one catalog import
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    /// Imported, but the stored URL will not pass the redirect validator
    pub rejected_urls: Vec<ImportIssue>,
    /// Not imported at all
    pub failed: Vec<ImportIssue>,
}

pub fn load_tours(path: &Path) -> Result<Vec<NewTour>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog file {}", path.display()))?;
    let tours: Vec<NewTour> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of tours", path.display()))?;
    Ok(tours)
}

pub async fn import_tours(
    storage: &dyn Storage,
    policy: &AffiliatePolicy,
    tours: &[NewTour],
) -> ImportReport {
    let mut report = ImportReport::default();

    for tour in tours {
        if let Some(url) = tour.affiliate_url.as_deref() {
            if let Err(e) = policy.validate(url) {
                warn!(slug = %tour.slug, error = %e, "catalog entry has an invalid affiliate URL");
                report.rejected_urls.push(ImportIssue {
                    slug: tour.slug.clone(),
                    reason: e.to_string(),
                });
            }
        }

        match storage.upsert_tour(tour).await {
            Ok(_) => report.imported += 1,
            Err(e) => {
                warn!(slug = %tour.slug, error = %e, "failed to import catalog entry");
                report.failed.push(ImportIssue {
                    slug: tour.slug.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        imported = report.imported,
        rejected_urls = report.rejected_urls.len(),
        failed = report.failed.len(),
        "catalog import finished"
    );
    report
}
