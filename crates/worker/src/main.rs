#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Tourdesk Background Worker
//!
//! Handles scheduled jobs including:
//! - Stuck payment reconciliation against IremboPay (every 5 minutes by default)
//! - Heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tourdesk_payments::{sweeper::DEFAULT_STUCK_MINUTES, PaymentService, SweepSummary};
use tourdesk_shared::create_pool;
use tracing::{error, info, warn};

const DEFAULT_RECONCILE_CRON: &str = "0 */5 * * * *";

#[derive(Debug, Clone, PartialEq, Eq)]
struct WorkerSettings {
    database_url: String,
    stuck_minutes: i64,
    reconcile_cron: String,
}

impl WorkerSettings {
    fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        Self::from_values(
            database_url,
            std::env::var("STUCK_PAYMENT_MINUTES").ok(),
            std::env::var("RECONCILE_CRON").ok(),
        )
    }

    fn from_values(
        database_url: String,
        stuck_minutes: Option<String>,
        reconcile_cron: Option<String>,
    ) -> anyhow::Result<Self> {
        let stuck_minutes = match stuck_minutes.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_STUCK_MINUTES,
            Some(raw) => {
                let minutes: i64 = raw
                    .parse()
                    .with_context(|| format!("STUCK_PAYMENT_MINUTES is not a number: {raw}"))?;
                anyhow::ensure!(minutes > 0, "STUCK_PAYMENT_MINUTES must be positive");
                minutes
            }
        };

        let reconcile_cron = reconcile_cron
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_RECONCILE_CRON.to_string());

        Ok(Self {
            database_url,
            stuck_minutes,
            reconcile_cron,
        })
    }
}

fn log_sweep_summary(summary: &SweepSummary) {
    info!(
        examined = summary.examined,
        paid = summary.paid,
        failed = summary.failed,
        expired = summary.expired,
        untouched = summary.untouched,
        errors = summary.errors,
        "Stuck payment sweep complete"
    );
    if summary.errors > 0 {
        warn!(errors = summary.errors, "Some stuck bookings could not be reconciled");
    }
}

async fn heartbeat_only() -> anyhow::Result<()> {
    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
        info!("Worker heartbeat (minimal mode)");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Tourdesk Worker");

    let settings = WorkerSettings::from_env()?;
    let pool = create_pool(&settings.database_url).await?;
    info!("Database pool created");

    let payments = match PaymentService::from_env(pool).await {
        Ok(p) if p.provider_configured() => Arc::new(p),
        Ok(_) => {
            warn!("IremboPay not configured - running in minimal mode");
            return heartbeat_only().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to create payment service - running in minimal mode");
            return heartbeat_only().await;
        }
    };

    let scheduler = JobScheduler::new().await?;

    // Job 1: Reconcile bookings stuck in PROCESSING
    let sweep_payments = payments.clone();
    let stuck_after = time::Duration::minutes(settings.stuck_minutes);
    scheduler
        .add(Job::new_async(
            settings.reconcile_cron.as_str(),
            move |_uuid, _l| {
                let payments = sweep_payments.clone();
                Box::pin(async move {
                    info!("Running stuck payment sweep");
                    match payments.sweeper().with_stuck_after(stuck_after).sweep().await {
                        Ok(summary) => log_sweep_summary(&summary),
                        Err(e) => error!(error = %e, "Stuck payment sweep failed"),
                    }
                })
            },
        )?)
        .await?;
    info!(
        cron = %settings.reconcile_cron,
        stuck_minutes = settings.stuck_minutes,
        "Scheduled: Stuck payment reconciliation"
    );

    // Job 2: Heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker scheduler started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down worker");

    Ok(())
}
