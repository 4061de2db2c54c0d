//! Background jobs and the runner that executes them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::service::BusyFlag;
use crate::core::error::AppError;
use crate::reports;
use crate::services::Services;
use crate::sources::{self, SourceError};
use crate::subsystems::runtime::{Component, ComponentFuture};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    SlackSync,
    Reports,
    GmailSync,
    DriveSync,
    MeetingsSync,
    ClickupSync,
}

impl Job {
    pub const ALL: [Job; 6] = [
        Job::SlackSync,
        Job::Reports,
        Job::GmailSync,
        Job::DriveSync,
        Job::MeetingsSync,
        Job::ClickupSync,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Job::SlackSync => "slack",
            Job::Reports => "reports",
            Job::GmailSync => "gmail",
            Job::DriveSync => "drive",
            Job::MeetingsSync => "meetings",
            Job::ClickupSync => "clickup",
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Job {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Job::ALL
            .into_iter()
            .find(|job| job.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let names: Vec<&str> = Job::ALL.iter().map(|j| j.name()).collect();
                AppError::Config(format!("unknown job '{s}' (expected one of: {})", names.join(", ")))
            })
    }
}

fn source_err(job: Job) -> impl FnOnce(SourceError) -> AppError {
    move |e| AppError::Source(format!("{job}: {e}"))
}

/// Run one job to completion and return a one-line summary.
pub async fn run_job(services: &Services, job: Job) -> Result<String, AppError> {
    let summary = match job {
        Job::SlackSync => sources::slack::sync_all(services)
            .await
            .map_err(source_err(job))?
            .to_string(),
        Job::GmailSync => sources::gmail::sync(services)
            .await
            .map_err(source_err(job))?
            .to_string(),
        Job::DriveSync => sources::drive::sync(services)
            .await
            .map_err(source_err(job))?
            .to_string(),
        Job::MeetingsSync => sources::meetings::sync(services)
            .await
            .map_err(source_err(job))?
            .to_string(),
        Job::ClickupSync => sources::clickup::sync(services)
            .await
            .map_err(source_err(job))?
            .to_string(),
        Job::Reports => {
            let run = reports::run_all(services)
                .await
                .map_err(|e| AppError::Report(e.to_string()))?;
            format!(
                "updated={} unchanged={} failed={}",
                run.updated.len(),
                run.unchanged.len(),
                run.failed.len()
            )
        }
    };
    Ok(summary)
}

// ── Runner ──────────────────────────────────────────────────────────────────

/// Executes jobs from the timer one at a time. A failed job is logged and
/// the runner moves on. `busy` is released after every job.
pub struct JobRunner {
    services: Arc<Services>,
    job_rx: mpsc::Receiver<Job>,
    busy: BusyFlag,
}

impl JobRunner {
    pub fn new(services: Arc<Services>, job_rx: mpsc::Receiver<Job>, busy: BusyFlag) -> Self {
        Self {
            services,
            job_rx,
            busy,
        }
    }

    async fn run_loop(mut self, shutdown: CancellationToken) -> Result<(), AppError> {
        loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                job = self.job_rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            info!(%job, "job started");
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(%job, "job interrupted by shutdown");
                    break;
                }
                r = run_job(&self.services, job) => r,
            };
            self.busy.release();
            match outcome {
                Ok(summary) => info!(%job, %summary, "job finished"),
                Err(e) => warn!(%job, error = %e, "job failed"),
            }
        }
        Ok(())
    }
}

impl Component for JobRunner {
    fn id(&self) -> &str {
        "job-runner"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(self.run_loop(shutdown))
    }
}
