//! Start-then-poll execution of long-running Birst jobs.

use crate::admin::SharedAdminService;
use crate::error::{BirstError, Result};
use crate::soap::{CloudConnection, StatusResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default time between completion checks.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(10);

/// Lifecycle of a [`JobRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    Running { job_token: String },
    Succeeded { status: StatusResult },
    Failed { status: StatusResult },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// Starts a Birst job, then polls until it completes or fails.
///
/// The start operation runs at most once per runner. Polling waits a fixed
/// interval between checks and stops early if the cancellation token fires.
pub struct JobRunner<F> {
    admin: SharedAdminService,
    start_job: Option<F>,
    polling_interval: Duration,
    cancel: CancellationToken,
    state: JobState,
}

impl<F, Fut> JobRunner<F>
where
    F: FnOnce(SharedAdminService) -> Fut + Send,
    Fut: Future<Output = Result<String>> + Send,
{
    pub fn new(start_job: F, admin: SharedAdminService) -> Self {
        Self {
            admin,
            start_job: Some(start_job),
            polling_interval: DEFAULT_POLLING_INTERVAL,
            cancel: CancellationToken::new(),
            state: JobState::NotStarted,
        }
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Run the job to a terminal state.
    ///
    /// Returns the final status on success and [`BirstError::JobFailed`] when
    /// the service reports `failed`. Cancellation returns
    /// [`BirstError::Cancelled`] and leaves the runner `Running`.
    pub async fn run_to_completion(&mut self) -> Result<StatusResult> {
        // A start that failed leaves the runner NotStarted but still consumed.
        let start_job = self.start_job.take().ok_or_else(|| {
            let message = match self.state {
                JobState::NotStarted => "Job start has already been attempted and failed",
                _ => "Job has already been started",
            };
            BirstError::InvalidOperation(message.to_string())
        })?;

        let job_token = start_job(self.admin.clone()).await?;
        info!(job_token = %job_token, "Birst job started");
        self.state = JobState::Running {
            job_token: job_token.clone(),
        };

        let mut polls: u64 = 1;
        while !self.admin.is_job_complete(&job_token).await? {
            debug!(
                job_token = %job_token,
                polls,
                interval_ms = interval_millis(self.polling_interval),
                "Birst job still running"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!(job_token = %job_token, "Birst job polling cancelled");
                    return Err(BirstError::Cancelled);
                }
                _ = tokio::time::sleep(self.polling_interval) => {}
            }
            polls = polls.saturating_add(1);
        }

        let status = self.admin.get_job_status(&job_token).await?;
        if status.is_failed() {
            warn!(job_token = %job_token, message = %status.message, "Birst job failed");
            self.state = JobState::Failed {
                status: status.clone(),
            };
            return Err(BirstError::JobFailed(status));
        }

        info!(job_token = %job_token, status = %status.status_code, polls, "Birst job completed");
        self.state = JobState::Succeeded {
            status: status.clone(),
        };
        Ok(status)
    }
}

fn interval_millis(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

/// Extract the given connections and wait for the job to finish.
pub async fn run_extract_cloud_connector_data_job(
    admin: SharedAdminService,
    space_id: &str,
    connections: Vec<CloudConnection>,
    polling_interval: Duration,
    cancel: CancellationToken,
) -> Result<StatusResult> {
    let space_id = space_id.to_string();
    let mut job = JobRunner::new(
        move |svc: SharedAdminService| async move {
            svc.extract_cloud_connector_data(&space_id, &connections).await
        },
        admin,
    )
    .with_polling_interval(polling_interval)
    .with_cancellation(cancel);

    job.run_to_completion().await
}

/// Publish the given processing groups and wait for the job to finish.
pub async fn run_publish_data_job(
    admin: SharedAdminService,
    space_id: &str,
    processing_groups: Vec<String>,
    polling_interval: Duration,
    cancel: CancellationToken,
) -> Result<StatusResult> {
    let space_id = space_id.to_string();
    let mut job = JobRunner::new(
        move |svc: SharedAdminService| async move { svc.publish_data(&space_id, &processing_groups).await },
        admin,
    )
    .with_polling_interval(polling_interval)
    .with_cancellation(cancel);

    job.run_to_completion().await
}
