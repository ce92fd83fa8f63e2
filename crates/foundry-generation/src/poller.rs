//! Bounded status polling shared by the asynchronous drivers
//!
//! Each status response is classified by the driver into a [`StatusBucket`];
//! [`poll_once`] advances the job state from that classification alone, and
//! [`Poller::run`] wraps it with transport retries and the inter-poll sleep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use foundry_config::PollConfig;
use foundry_telemetry::GenerationMetrics;
use serde_json::Value;

use crate::error::{GenerationError, Result};
use crate::retry::with_transient_retries;

/// Timing limits for one provider's poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Extra tries for a status call that failed transiently
    pub transient_retries: u32,
    /// First backoff delay between transient retries
    pub backoff: Duration,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            transient_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }

    /// Apply configured overrides on top of the driver defaults
    #[must_use]
    pub fn with_overrides(mut self, overrides: Option<&PollConfig>) -> Self {
        let Some(overrides) = overrides else {
            return self;
        };

        if let Some(ms) = overrides.interval_ms {
            self.interval = Duration::from_millis(ms);
        }
        if let Some(max_attempts) = overrides.max_attempts {
            self.max_attempts = max_attempts.max(1);
        }
        if let Some(retries) = overrides.transient_retries {
            self.transient_retries = retries;
        }
        if let Some(ms) = overrides.backoff_ms {
            self.backoff = Duration::from_millis(ms);
        }

        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    Polling,
    Succeeded,
    Failed,
    Expired,
    TimedOut,
}

/// One in-flight provider task
#[derive(Debug, Clone)]
pub struct Job {
    pub provider_task_id: String,
    pub status: JobStatus,
    pub poll_attempt: u32,
    pub last_poll_response: Option<Value>,
}

impl Job {
    pub fn submitted(provider_task_id: impl Into<String>) -> Self {
        Self {
            provider_task_id: provider_task_id.into(),
            status: JobStatus::Submitted,
            poll_attempt: 0,
            last_poll_response: None,
        }
    }
}

/// Driver classification of a status response
#[derive(Debug)]
pub enum StatusBucket<P> {
    Pending,
    Succeeded(P),
    Failed {
        message: String,
        provider_code: Option<String>,
    },
    /// Provider-side expiry or cancellation; carries the raw status
    Expired(String),
}

/// A classified status response together with the raw body
#[derive(Debug)]
pub struct StatusReport<P> {
    pub bucket: StatusBucket<P>,
    pub raw: Value,
}

impl<P> StatusReport<P> {
    pub const fn new(bucket: StatusBucket<P>, raw: Value) -> Self {
        Self { bucket, raw }
    }
}

#[derive(Debug)]
pub enum PollStep<P> {
    Continue(Job),
    Done { job: Job, payload: P },
    Failed { job: Job, error: GenerationError },
}

/// Advance a job by one status observation
pub fn poll_once<P>(mut job: Job, report: StatusReport<P>, max_attempts: u32) -> PollStep<P> {
    job.poll_attempt += 1;
    job.last_poll_response = Some(report.raw);

    match report.bucket {
        StatusBucket::Pending if job.poll_attempt >= max_attempts => {
            job.status = JobStatus::TimedOut;
            let error = GenerationError::ProviderTimeout {
                task_id: job.provider_task_id.clone(),
                attempts: job.poll_attempt,
            };
            PollStep::Failed { job, error }
        }
        StatusBucket::Pending => {
            job.status = JobStatus::Polling;
            PollStep::Continue(job)
        }
        StatusBucket::Succeeded(payload) => {
            job.status = JobStatus::Succeeded;
            PollStep::Done { job, payload }
        }
        StatusBucket::Failed { message, provider_code } => {
            job.status = JobStatus::Failed;
            let error = GenerationError::ProviderTaskFailed {
                task_id: job.provider_task_id.clone(),
                message,
                provider_code,
            };
            PollStep::Failed { job, error }
        }
        StatusBucket::Expired(status) => {
            job.status = JobStatus::Expired;
            let error = GenerationError::ProviderTaskExpired {
                task_id: job.provider_task_id.clone(),
                status,
            };
            PollStep::Failed { job, error }
        }
    }
}

/// One status request for a task, implemented per driver
#[async_trait]
pub trait StatusProbe: Send + Sync {
    type Payload: Send;

    async fn check(&self, task_id: &str) -> Result<StatusReport<Self::Payload>>;
}

/// A finished job and the payload of its success status
#[derive(Debug)]
pub struct Completed<P> {
    pub job: Job,
    pub payload: P,
}

/// Poll loop bound to one provider
#[derive(Debug, Clone)]
pub struct Poller {
    provider: Arc<str>,
    policy: PollPolicy,
    metrics: GenerationMetrics,
}

impl Poller {
    pub fn new(provider: &str, policy: PollPolicy, metrics: GenerationMetrics) -> Self {
        Self {
            provider: Arc::from(provider),
            policy,
            metrics,
        }
    }

    pub const fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Poll `task_id` until it reaches a terminal status
    ///
    /// Issues at most `max_attempts` classified status calls and never sleeps
    /// after a terminal status or the final attempt. Transient failures are
    /// retried within an attempt and do not count toward the limit.
    pub async fn run<S: StatusProbe>(&self, probe: &S, task_id: String) -> Result<Completed<S::Payload>> {
        let mut job = Job::submitted(task_id);

        let outcome = loop {
            let report = match with_transient_retries(
                &self.provider,
                self.policy.transient_retries,
                self.policy.backoff,
                || probe.check(&job.provider_task_id),
            )
            .await
            {
                Ok(report) => report,
                Err(error) => break Err((job.poll_attempt + 1, error)),
            };

            match poll_once(job, report, self.policy.max_attempts) {
                PollStep::Continue(next) => {
                    tracing::debug!(
                        provider = %self.provider,
                        task_id = %next.provider_task_id,
                        attempt = next.poll_attempt,
                        max_attempts = self.policy.max_attempts,
                        "task pending"
                    );
                    job = next;
                    tokio::time::sleep(self.policy.interval).await;
                }
                PollStep::Done { job, payload } => {
                    tracing::info!(
                        provider = %self.provider,
                        task_id = %job.provider_task_id,
                        attempts = job.poll_attempt,
                        "task succeeded"
                    );
                    break Ok(Completed { job, payload });
                }
                PollStep::Failed { job, error } => {
                    tracing::warn!(
                        provider = %self.provider,
                        task_id = %job.provider_task_id,
                        attempts = job.poll_attempt,
                        status = ?job.status,
                        "task did not succeed: {error}"
                    );
                    break Err((job.poll_attempt, error));
                }
            }
        };

        match outcome {
            Ok(completed) => {
                self.metrics.record_poll_attempts(&self.provider, completed.job.poll_attempt);
                Ok(completed)
            }
            Err((attempts, error)) => {
                self.metrics.record_poll_attempts(&self.provider, attempts);
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;
    use tokio::time::Instant;

    use super::*;

    #[derive(Clone, Copy)]
    enum Scripted {
        Pending,
        Succeeded(&'static str),
        Failed(&'static str),
        Expired,
        Unreachable,
    }

    /// Replays scripted responses, repeating the last one
    struct ScriptedProbe {
        script: Mutex<VecDeque<Scripted>>,
        calls: AtomicU32,
    }

    impl ScriptedProbe {
        fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusProbe for ScriptedProbe {
        type Payload = String;

        async fn check(&self, _task_id: &str) -> Result<StatusReport<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let mut script = self.script.lock().unwrap();
            let step = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().copied()
            }
            .unwrap();
            drop(script);

            let bucket = match step {
                Scripted::Pending => StatusBucket::Pending,
                Scripted::Succeeded(payload) => StatusBucket::Succeeded(payload.to_string()),
                Scripted::Failed(message) => StatusBucket::Failed {
                    message: message.to_string(),
                    provider_code: None,
                },
                Scripted::Expired => StatusBucket::Expired("expired".to_string()),
                Scripted::Unreachable => {
                    return Err(GenerationError::ProviderUnreachable {
                        message: "connection refused".into(),
                        retryable: true,
                    });
                }
            };

            Ok(StatusReport::new(bucket, json!({})))
        }
    }

    fn poller(interval_secs: u64, max_attempts: u32) -> Poller {
        Poller::new(
            "test",
            PollPolicy::new(Duration::from_secs(interval_secs), max_attempts),
            GenerationMetrics::new(),
        )
    }

    #[test]
    fn pending_continues_until_last_attempt() {
        let job = Job::submitted("t-1");

        let PollStep::Continue(job) = poll_once::<()>(job, StatusReport::new(StatusBucket::Pending, json!({})), 2) else {
            panic!("expected continue");
        };
        assert_eq!(job.poll_attempt, 1);
        assert_eq!(job.status, JobStatus::Polling);

        let step = poll_once::<()>(job, StatusReport::new(StatusBucket::Pending, json!({"progress": 50})), 2);
        let PollStep::Failed { job, error } = step else {
            panic!("expected timeout");
        };
        assert_eq!(job.status, JobStatus::TimedOut);
        assert_eq!(job.last_poll_response, Some(json!({"progress": 50})));
        assert!(matches!(error, GenerationError::ProviderTimeout { attempts: 2, .. }));
    }

    #[test]
    fn terminal_buckets_map_to_errors() {
        let failed = poll_once::<()>(
            Job::submitted("t-1"),
            StatusReport::new(
                StatusBucket::Failed {
                    message: "bad prompt".into(),
                    provider_code: Some("1004".into()),
                },
                json!({}),
            ),
            10,
        );
        let PollStep::Failed { error, .. } = failed else {
            panic!("expected failure");
        };
        assert_eq!(error.code(), "provider_task_failed");
        assert_eq!(error.to_string(), "bad prompt");

        let expired = poll_once::<()>(
            Job::submitted("t-1"),
            StatusReport::new(StatusBucket::Expired("banned".into()), json!({})),
            10,
        );
        let PollStep::Failed { job, error } = expired else {
            panic!("expected expiry");
        };
        assert_eq!(job.status, JobStatus::Expired);
        assert_eq!(error.code(), "provider_task_expired");
    }

    #[test]
    fn overrides_replace_defaults() {
        let policy = PollPolicy::new(Duration::from_secs(10), 120).with_overrides(Some(&PollConfig {
            interval_ms: Some(0),
            max_attempts: Some(3),
            transient_retries: None,
            backoff_ms: Some(1),
        }));

        assert_eq!(policy.interval, Duration::ZERO);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.transient_retries, 3);
        assert_eq!(policy.backoff, Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_exactly_max_attempts() {
        let probe = ScriptedProbe::new([Scripted::Pending]);
        let start = Instant::now();

        let err = poller(10, 5).run(&probe, "t-1".into()).await.unwrap_err();

        assert!(matches!(err, GenerationError::ProviderTimeout { attempts: 5, .. }));
        assert_eq!(probe.calls(), 5);
        // No sleep after the final attempt
        assert_eq!(start.elapsed(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_k_plus_one_calls() {
        let probe = ScriptedProbe::new([
            Scripted::Pending,
            Scripted::Pending,
            Scripted::Pending,
            Scripted::Succeeded("model.glb"),
        ]);
        let start = Instant::now();

        let completed = poller(10, 120).run(&probe, "t-1".into()).await.unwrap();

        assert_eq!(completed.payload, "model.glb");
        assert_eq!(completed.job.poll_attempt, 4);
        assert_eq!(probe.calls(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_short_circuits_without_sleeping() {
        let probe = ScriptedProbe::new([Scripted::Failed("out of credits")]);
        let start = Instant::now();

        let err = poller(10, 120).run(&probe, "t-1".into()).await.unwrap_err();

        assert_eq!(err.to_string(), "out of credits");
        assert_eq!(probe.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_stops_polling() {
        let probe = ScriptedProbe::new([Scripted::Pending, Scripted::Expired]);

        let err = poller(5, 180).run(&probe, "t-1".into()).await.unwrap_err();

        assert_eq!(err.code(), "provider_task_expired");
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_do_not_consume_attempts() {
        let probe = ScriptedProbe::new([
            Scripted::Unreachable,
            Scripted::Pending,
            Scripted::Unreachable,
            Scripted::Unreachable,
            Scripted::Succeeded("video.mp4"),
        ]);

        let completed = poller(1, 2).run(&probe, "t-1".into()).await.unwrap();

        assert_eq!(completed.job.poll_attempt, 2);
        assert_eq!(probe.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_transient_retries_abort_with_unreachable() {
        let probe = ScriptedProbe::new([Scripted::Unreachable]);

        let err = poller(1, 10).run(&probe, "t-1".into()).await.unwrap_err();

        assert_eq!(err.code(), "provider_unreachable");
        // One call plus three retries
        assert_eq!(probe.calls(), 4);
    }
}
