//! Calendar triggers for unattended runs.
//!
//! Two cron jobs (business hours and overnight) call [`Orchestrator::run_all`]
//! at a fixed UTC offset. A trigger that lands while a run is active is logged
//! and dropped; nothing is queued.

use crate::config::ScheduleSettings;
use crate::error::{RunError, ScheduleError};
use crate::orchestrator::Orchestrator;
use chrono::FixedOffset;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, instrument};

/// Offset for `hours` east of UTC (negative is west).
pub fn fixed_offset(hours: i32) -> Result<FixedOffset, ScheduleError> {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or(ScheduleError::InvalidOffset(hours))
}

/// Build (but do not start) the scheduler with both cadences registered.
#[instrument(level = "info", skip_all, fields(utc_offset_hours = settings.utc_offset_hours))]
pub async fn build_scheduler(
    orchestrator: Orchestrator,
    settings: &ScheduleSettings,
) -> Result<JobScheduler, ScheduleError> {
    let offset = fixed_offset(settings.utc_offset_hours)?;
    let scheduler = JobScheduler::new().await?;

    for (cadence, cron) in [
        ("business-hours", &settings.business_hours),
        ("overnight", &settings.overnight),
    ] {
        let orchestrator = orchestrator.clone();
        let job = Job::new_async_tz(cron.as_str(), offset, move |_uuid, _lock| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move { scheduled_run(&orchestrator, cadence).await })
        })?;
        scheduler.add(job).await?;
        info!(cadence, %cron, "Scheduled scrape job");
    }

    Ok(scheduler)
}

async fn scheduled_run(orchestrator: &Orchestrator, cadence: &'static str) {
    info!(cadence, "Scheduled scrape triggered");
    match orchestrator.run_all().await {
        Ok(result) => info!(
            cadence,
            run_id = %result.run_id,
            successful = result.successful,
            failed = result.failed,
            articles = result.articles,
            "Scheduled scrape finished"
        ),
        Err(RunError::Busy) => {
            info!(cadence, "Skipping scheduled scrape: a run is already in progress")
        }
        Err(e) => error!(cadence, error = %e, "Scheduled scrape failed"),
    }
}
