use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tourlink::affiliate::AffiliatePolicy;
use tourlink::catalog::{import_tours, load_tours};
use tourlink::config::Config;
use tourlink::models::{ClickGroupBy, NewTour};
use tourlink::storage::{self, Storage};

#[derive(Parser)]
#[command(name = "tourlink-admin")]
#[command(about = "Tourlink catalog and click report CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upsert every tour in a JSON catalog file
    Import {
        /// JSON array of {slug, title, affiliate_url?, operator_name}
        file: PathBuf,
    },
    /// Insert or update a single tour
    Upsert {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        operator: String,
        /// Partner URL; omit for tours without a booking page
        #[arg(long)]
        url: Option<String>,
    },
    /// List tours
    Tours {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Click summary for the last N days
    Report {
        /// tour, source, campaign, placement or day
        #[arg(long, default_value = "tour")]
        group_by: String,
        #[arg(long, default_value_t = 7)]
        days: i64,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage = storage::connect(&config.database)
        .await
        .context("failed to open database")?;

    // Ensure database is initialized
    storage.init().await?;

    let policy = AffiliatePolicy::new(config.partner.clone())
        .context("invalid partner configuration")?;

    match cli.command {
        Commands::Import { file } => {
            let tours = load_tours(&file)?;
            let report = import_tours(storage.as_ref(), &policy, &tours).await;

            println!("✓ Imported {} of {} tours", report.imported, tours.len());
            for issue in &report.rejected_urls {
                println!(
                    "⚠ {}: affiliate URL rejected ({}), visitors will get partner search",
                    issue.slug, issue.reason
                );
            }
            for issue in &report.failed {
                println!("✗ {}: {}", issue.slug, issue.reason);
            }
        }
        Commands::Upsert {
            slug,
            title,
            operator,
            url,
        } => {
            if let Some(url) = url.as_deref() {
                if let Err(e) = policy.validate(url) {
                    println!("⚠ Affiliate URL will not be used for redirects: {}", e);
                }
            }
            let tour = storage
                .upsert_tour(&NewTour {
                    slug,
                    title,
                    affiliate_url: url,
                    operator_name: operator,
                })
                .await?;
            println!("✓ Saved tour '{}' (id {})", tour.slug, tour.id);
        }
        Commands::Tours { limit, offset } => {
            let tours = storage.list_tours(limit.clamp(1, 500), offset.max(0)).await?;
            if tours.is_empty() {
                println!("No tours found.");
            } else {
                println!("{:<32} {:<32} {}", "Slug", "Operator", "Affiliate URL");
                println!("{}", "-".repeat(100));
                for tour in tours {
                    println!(
                        "{:<32} {:<32} {}",
                        tour.slug,
                        tour.operator_name,
                        tour.affiliate_url.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        Commands::Report {
            group_by,
            days,
            limit,
        } => {
            let group_by: ClickGroupBy = group_by.parse().map_err(anyhow::Error::msg)?;
            let end = chrono::Utc::now().timestamp_millis();
            let start = end - days.max(1) * 86_400_000;

            let groups = storage
                .click_summary(group_by, Some(start), None, limit.clamp(1, 1000))
                .await?;
            if groups.is_empty() {
                println!("No clicks in the last {} days.", days.max(1));
            } else {
                println!("{:<48} {:>10}", format!("{:?}", group_by), "Clicks");
                println!("{}", "-".repeat(60));
                for group in &groups {
                    println!("{:<48} {:>10}", group.dimension, group.clicks);
                }
                let total: i64 = groups.iter().map(|g| g.clicks).sum();
                println!("{:<48} {:>10}", "Total", total);
            }
        }
    }

    Ok(())
}
