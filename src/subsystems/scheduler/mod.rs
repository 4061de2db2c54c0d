//! Scheduler subsystem: runs the ingestion and report jobs on a timer.
//!
//! Two components share one bounded channel and a [`BusyFlag`]:
//!
//! - [`TimerService`] parks on `sleep_until` for the next deadline and sends
//!   the due [`Job`] only if it can claim the flag. A job that comes due
//!   while the runner is still busy is skipped for that tick.
//! - [`JobRunner`] executes jobs one at a time, logs failures and releases
//!   the flag when each job ends.
//!
//! Intervals come from `[schedule]`; a job with no interval never runs here
//! (it can still be run by hand with `onequery sync <job>`).

mod jobs;
mod service;

pub use jobs::{Job, JobRunner, run_job};
pub use service::{BusyFlag, ScheduleEntry, TimerService};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::config::ScheduleConfig;
use crate::services::Services;
use crate::subsystems::runtime::{Component, SubsystemHandle, spawn_components};

/// Build timer entries from `[schedule]`. Zero intervals count as disabled.
pub fn entries_from_config(schedule: &ScheduleConfig) -> Vec<ScheduleEntry> {
    [
        (Job::SlackSync, schedule.slack_secs),
        (Job::Reports, schedule.reports_secs),
        (Job::GmailSync, schedule.gmail_secs),
        (Job::DriveSync, schedule.drive_secs),
        (Job::MeetingsSync, schedule.meetings_secs),
        (Job::ClickupSync, schedule.clickup_secs),
    ]
    .into_iter()
    .filter_map(|(job, secs)| match secs {
        Some(secs) if secs > 0 => Some(ScheduleEntry {
            job,
            every: Duration::from_secs(secs),
        }),
        _ => None,
    })
    .collect()
}

/// Spawn the timer and the job runner.
pub fn start(services: Arc<Services>, shutdown: CancellationToken) -> SubsystemHandle {
    let entries = entries_from_config(&services.config.schedule);
    for entry in &entries {
        info!(job = %entry.job, every_secs = entry.every.as_secs(), "job scheduled");
    }

    let (job_tx, job_rx) = mpsc::channel(1);
    let busy = BusyFlag::default();
    let components: Vec<Box<dyn Component>> = vec![
        Box::new(TimerService::new(entries, job_tx, busy.clone())),
        Box::new(JobRunner::new(services, job_rx, busy)),
    ];
    spawn_components(components, shutdown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_entries_skip_disabled_jobs() {
        let schedule = ScheduleConfig {
            slack_secs: Some(600),
            reports_secs: Some(0),
            gmail_secs: None,
            drive_secs: Some(3600),
            meetings_secs: None,
            clickup_secs: Some(86_400),
        };
        let entries = entries_from_config(&schedule);
        let jobs: Vec<Job> = entries.iter().map(|e| e.job).collect();
        assert_eq!(jobs, vec![Job::SlackSync, Job::DriveSync, Job::ClickupSync]);
        assert_eq!(entries[0].every, Duration::from_secs(600));
    }

    #[test]
    fn empty_schedule_has_no_entries() {
        assert!(entries_from_config(&ScheduleConfig::default()).is_empty());
    }
}
