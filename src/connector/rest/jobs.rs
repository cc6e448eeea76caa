//! Job descriptors and the bounded job poll loop of the `scalemgmt/v2` API.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{HttpRequest, HttpTransport};
use crate::connector::ConnectorError;

const STATUS_RUNNING: &str = "running";
const STATUS_COMPLETED: &str = "completed";

/// Body shared by mutating `scalemgmt/v2` responses and the jobs listing.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct JobsEnvelope {
    pub(crate) jobs: Vec<Job>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct Job {
    pub(crate) job_id: u64,
    pub(crate) status: String,
    pub(crate) result: Option<JobResult>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct JobResult {
    pub(crate) exit_code: Option<i64>,
    pub(crate) stderr: Vec<String>,
}

impl Job {
    fn failure_message(&self) -> String {
        let Some(result) = &self.result else {
            return String::new();
        };
        let stderr = result.stderr.join("\n");
        match result.exit_code {
            Some(code) if stderr.is_empty() => format!("exit code {code}"),
            Some(code) => format!("exit code {code}: {stderr}"),
            None => stderr,
        }
    }
}

/// Polls `scalemgmt/v2/jobs` until a job leaves the running state or the
/// deadline passes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct JobPoller {
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl JobPoller {
    /// Creates a poller sleeping `poll_interval` between polls and giving up
    /// after `wait_timeout`.
    #[must_use]
    pub const fn new(poll_interval: Duration, wait_timeout: Duration) -> Self {
        Self {
            poll_interval,
            wait_timeout,
        }
    }

    /// Waits for `job_id` to finish.
    ///
    /// The first status other than `running` decides the outcome:
    /// `completed` is success and anything else is
    /// [`ConnectorError::JobFailed`]. A job still running at the deadline is
    /// [`ConnectorError::JobPending`].
    ///
    /// # Errors
    ///
    /// Returns the job outcome errors above, or any transport or parse error
    /// raised while reading the job status.
    pub async fn wait<T>(&self, transport: &T, job_id: u64) -> Result<(), ConnectorError>
    where
        T: HttpTransport + ?Sized,
    {
        let started = Instant::now();
        let deadline = started + self.wait_timeout;
        let mut polls = 0_u32;

        loop {
            let job = fetch_job(transport, job_id).await?;
            polls += 1;

            if !job.status.eq_ignore_ascii_case(STATUS_RUNNING) {
                if job.status.eq_ignore_ascii_case(STATUS_COMPLETED) {
                    debug!(job_id, polls, "job completed");
                    return Ok(());
                }
                warn!(job_id, status = %job.status, "job failed");
                return Err(ConnectorError::JobFailed {
                    job_id,
                    message: job.failure_message(),
                    status: job.status,
                });
            }

            if Instant::now() >= deadline {
                warn!(job_id, polls, "job still running at deadline");
                return Err(ConnectorError::JobPending {
                    job_id,
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            debug!(job_id, polls, "job running");
            sleep(self.poll_interval).await;
        }
    }
}

async fn fetch_job<T>(transport: &T, job_id: u64) -> Result<Job, ConnectorError>
where
    T: HttpTransport + ?Sized,
{
    let request = HttpRequest::get(format!("scalemgmt/v2/jobs?filter=jobId={job_id}&fields=:all:"));
    let response = transport.send(&request).await?.require_success("job status")?;
    let envelope: JobsEnvelope = response.json("job status")?;
    envelope
        .jobs
        .into_iter()
        .find(|job| job.job_id == job_id)
        .ok_or_else(|| ConnectorError::parse("job status", format!("job {job_id} missing from listing")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTransport;
    use rstest::{fixture, rstest};

    fn job_body(status: &str) -> String {
        format!(r#"{{"jobs":[{{"jobId":42,"status":"{status}","result":{{"exitCode":1,"stderr":["EFSSG0072C fileset busy"]}}}}]}}"#)
    }

    #[fixture]
    fn poller() -> JobPoller {
        JobPoller::new(Duration::ZERO, Duration::from_secs(60))
    }

    #[rstest]
    #[tokio::test]
    async fn running_then_completed_takes_two_polls(poller: JobPoller) {
        let transport = ScriptedTransport::new();
        transport.push_json(200, job_body("RUNNING"));
        transport.push_json(200, job_body("COMPLETED"));

        poller.wait(&transport, 42).await.expect("job completes");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(
            requests
                .iter()
                .all(|req| req.path == "scalemgmt/v2/jobs?filter=jobId=42&fields=:all:")
        );
    }

    #[rstest]
    #[case(0)]
    #[case(3)]
    #[tokio::test]
    async fn first_terminal_status_other_than_completed_fails(
        poller: JobPoller,
        #[case] running_polls: usize,
    ) {
        let transport = ScriptedTransport::new();
        for _ in 0..running_polls {
            transport.push_json(200, job_body("RUNNING"));
        }
        transport.push_json(200, job_body("FAILED"));

        let err = poller.wait(&transport, 42).await.expect_err("job fails");

        assert_eq!(
            err,
            ConnectorError::JobFailed {
                job_id: 42,
                status: String::from("FAILED"),
                message: String::from("exit code 1: EFSSG0072C fileset busy"),
            }
        );
        assert_eq!(transport.requests().len(), running_polls + 1);
    }

    #[tokio::test]
    async fn running_past_deadline_is_pending() {
        let poller = JobPoller::new(Duration::ZERO, Duration::ZERO);
        let transport = ScriptedTransport::new();
        transport.push_json(200, job_body("RUNNING"));

        let err = poller.wait(&transport, 42).await.expect_err("job pending");

        assert!(matches!(err, ConnectorError::JobPending { job_id: 42, .. }));
    }

    #[rstest]
    #[tokio::test]
    async fn missing_job_in_listing_is_parse_error(poller: JobPoller) {
        let transport = ScriptedTransport::new();
        transport.push_json(200, r#"{"jobs":[]}"#);

        let err = poller.wait(&transport, 42).await.expect_err("no job");

        assert!(matches!(err, ConnectorError::Parse { .. }));
    }
}
