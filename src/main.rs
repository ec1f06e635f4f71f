use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

mod activity;
mod api;
mod classify;
mod config;
mod db;
mod models;
mod patterns;
mod pipeline;
mod report;
mod rollup;
mod telemetry;

use config::AnalyticsConfig;
use db::PgStore;
use models::PeriodType;
use pipeline::{user_label, AnalysisRequest};

#[derive(Parser)]
#[command(name = "sedentary-analytics")]
#[command(about = "Sedentary behaviour analytics over wearable accelerometer data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Insert thirty minutes of synthetic readings
    Seed {
        #[arg(long)]
        user: Option<Uuid>,
    },
    /// Import readings from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        user: Option<Uuid>,
    },
    /// Run the daily analysis for one user, or every user with recent data
    Analyze {
        #[arg(long)]
        user: Option<Uuid>,
        #[arg(long, default_value_t = 24)]
        hours: i64,
        /// Analyse the window ending at midnight after this date instead of now
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Recompute a weekly or monthly rollup from stored daily summaries
    Rollup {
        #[arg(long, value_enum)]
        period: PeriodType,
        #[arg(long)]
        user: Option<Uuid>,
        #[arg(long)]
        start: NaiveDate,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        user: Option<Uuid>,
        #[arg(long, value_enum, default_value_t = PeriodType::Daily)]
        period: PeriodType,
        #[arg(long, default_value_t = 30)]
        limit: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Serve the analytics API
    Serve {
        #[arg(long)]
        addr: Option<String>,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cli = Cli::parse();
    let config = AnalyticsConfig::from_env().context("invalid configuration")?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed { user } => {
            let pool = connect().await?;
            let inserted =
                db::seed(&pool, user, &config.thresholds, config.samples_per_minute).await?;
            println!("Inserted {inserted} synthetic readings for {}.", user_label(user));
        }
        Commands::Import { csv, user } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, &csv, user).await?;
            println!("Inserted {inserted} readings from {}.", csv.display());
        }
        Commands::Analyze { user, hours, date } => {
            let pool = match connect().await {
                Ok(pool) => pool,
                Err(err) => {
                    error!(error = %format!("{err:#}"), "analysis aborted, database unavailable");
                    return Ok(());
                }
            };

            let request = match date {
                Some(day) => AnalysisRequest::for_day(user, hours, day),
                None => AnalysisRequest::trailing(user, hours, Utc::now()),
            };

            let store = PgStore::new(pool.clone());
            let outcome = pipeline::run_analysis(&store, &config, &request).await;
            pool.close().await;

            println!(
                "Analysed {} user(s): {} summaries written, {} skipped, {} failures.",
                outcome.users_seen,
                outcome.written.len(),
                outcome.skipped,
                outcome.failures
            );
            for summary in &outcome.written {
                println!(
                    "- {} {} {} score {} ({:.1} sedentary / {:.1} active min)",
                    user_label(summary.user_id),
                    summary.period_type,
                    summary.date,
                    summary.stats.activity_score,
                    summary.stats.sedentary_minutes,
                    summary.stats.active_minutes
                );
            }
        }
        Commands::Rollup {
            period,
            user,
            start,
        } => {
            if period == PeriodType::Daily {
                anyhow::bail!("daily summaries are produced by `analyze`; pick weekly or monthly");
            }
            let pool = connect().await?;
            let store = PgStore::new(pool.clone());
            let rollup = pipeline::roll_up(&store, user, period, start).await;
            pool.close().await;

            match rollup? {
                Some(summary) => println!(
                    "Saved {} rollup for {} starting {}: score {}, dominant {}.",
                    period,
                    user_label(user),
                    summary.date,
                    summary.stats.activity_score,
                    summary.stats.dominant_state
                ),
                None => println!("No daily summaries in that {period} window."),
            }
        }
        Commands::Report {
            user,
            period,
            limit,
            out,
        } => {
            let pool = connect().await?;
            let summaries = db::fetch_summaries(&pool, user, period, limit).await?;
            let subject = user.map(|id| id.to_string());
            let report = report::build_report(subject.as_deref(), period, &summaries, &config);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve { addr } => {
            let pool = connect().await?;
            let addr = addr.unwrap_or_else(|| config.server_address.clone());
            api::serve(api::AppState::new(pool, config), &addr).await?;
        }
    }

    Ok(())
}
