//! Polling until an eventually consistent condition holds

use super::client::ClientError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Interval and upper bound for polling a condition
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        PollPolicy { interval, timeout }
    }
}

/// Result of a single evaluation of a condition
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Check<T> {
    /// The condition holds and yielded the given value.
    Satisfied(T),
    /// The condition does not hold yet; carries the observed state.
    Unsatisfied(String),
}

/// The condition did not hold within the timeout.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error(
    "{resource} did not reach the expected state within {elapsed:?} \
    (last observed state: {last_observed})"
)]
pub struct TimeoutError {
    pub resource: String,
    pub last_observed: String,
    pub elapsed: Duration,
}

/// Reasons why [`wait_until`] gave up
#[derive(Debug, Error)]
pub enum WaitError {
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error("reading {resource} failed permanently")]
    Client {
        resource: String,
        #[source]
        source: ClientError,
    },
    #[error("waiting for {resource} was cancelled")]
    Cancelled { resource: String },
}

/// Evaluates `check` every `policy.interval` until it is satisfied or
/// `policy.timeout` has elapsed.
///
/// The condition is evaluated at least once and once more when the timeout
/// is reached. Transient client errors count as "not satisfied yet", any
/// other client error ends the wait immediately. Cancelling the token ends
/// the wait with [`WaitError::Cancelled`].
pub async fn wait_until<T, F, Fut>(
    resource: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Check<T>, ClientError>>,
{
    let start = Instant::now();
    let mut last_observed = String::from("<not observed>");

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled {
                resource: resource.to_owned(),
            });
        }

        match check().await {
            Ok(Check::Satisfied(value)) => return Ok(value),
            Ok(Check::Unsatisfied(observed)) => last_observed = observed,
            Err(error) if error.is_transient() => last_observed = format!("read error: {}", error),
            Err(error) => {
                return Err(WaitError::Client {
                    resource: resource.to_owned(),
                    source: error,
                })
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            return Err(WaitError::Timeout(TimeoutError {
                resource: resource.to_owned(),
                last_observed,
                elapsed,
            }));
        }

        debug!(
            "Waiting for [{}], currently [{}], {:?} elapsed",
            resource, last_observed, elapsed
        );

        let pause = policy.interval.min(policy.timeout - elapsed);
        tokio::select! {
            _ = time::sleep(pause) => {}
            _ = cancel.cancelled() => {
                return Err(WaitError::Cancelled {
                    resource: resource.to_owned(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use spectral::prelude::*;
    use std::cell::Cell;

    fn policy() -> PollPolicy {
        PollPolicy::new(Duration::from_secs(2), Duration::from_secs(10))
    }

    fn transient() -> ClientError {
        ClientError::Transient {
            resource: String::from("claim"),
            message: String::from("503 Service Unavailable"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_return_without_further_polls_if_the_condition_holds() {
        let polls = Cell::new(0);

        let result = wait_until("claim", &policy(), &CancellationToken::new(), || {
            polls.set(polls.get() + 1);
            async { Ok(Check::Satisfied("Bound")) }
        })
        .await;

        assert_that(&result.ok()).is_equal_to(Some("Bound"));
        assert_that(&polls.get()).is_equal_to(1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_poll_until_the_condition_holds() {
        let polls = Cell::new(0);

        let result = wait_until("claim", &policy(), &CancellationToken::new(), || {
            polls.set(polls.get() + 1);
            let polls = polls.get();
            async move {
                if polls < 3 {
                    Ok(Check::Unsatisfied(String::from("Pending")))
                } else {
                    Ok(Check::Satisfied(()))
                }
            }
        })
        .await;

        assert_that(&result.is_ok()).is_true();
        assert_that(&polls.get()).is_equal_to(3);
    }

    #[tokio::test(start_paused = true)]
    async fn should_time_out_with_the_last_observed_state() {
        let start = Instant::now();

        let result: Result<(), _> = wait_until("claim", &policy(), &CancellationToken::new(), || {
            async { Ok(Check::Unsatisfied(String::from("Pending"))) }
        })
        .await;

        match result {
            Err(WaitError::Timeout(timeout)) => {
                assert_that(&timeout.resource.as_str()).is_equal_to("claim");
                assert_that(&timeout.last_observed.as_str()).is_equal_to("Pending");
                assert_that(&timeout.elapsed).is_equal_to(Duration::from_secs(10));
            }
            other => panic!("expected a timeout but got {:?}", other),
        }
        assert_that(&start.elapsed()).is_equal_to(Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn should_retry_transient_read_errors() {
        let polls = Cell::new(0);

        let result = wait_until("claim", &policy(), &CancellationToken::new(), || {
            polls.set(polls.get() + 1);
            let polls = polls.get();
            async move {
                if polls < 4 {
                    Err(transient())
                } else {
                    Ok(Check::Satisfied(()))
                }
            }
        })
        .await;

        assert_that(&result.is_ok()).is_true();
        assert_that(&polls.get()).is_equal_to(4);
    }

    #[tokio::test(start_paused = true)]
    async fn should_report_transient_errors_as_last_observed_state_on_timeout() {
        let result: Result<(), _> = wait_until("claim", &policy(), &CancellationToken::new(), || {
            async { Err(transient()) }
        })
        .await;

        match result {
            Err(WaitError::Timeout(timeout)) => {
                assert_that(&timeout.last_observed).contains("503 Service Unavailable");
            }
            other => panic!("expected a timeout but got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_propagate_permanent_read_errors_immediately() {
        let polls = Cell::new(0);

        let result: Result<(), _> = wait_until("claim", &policy(), &CancellationToken::new(), || {
            polls.set(polls.get() + 1);
            async {
                Err(ClientError::Rejected {
                    resource: String::from("claim"),
                    message: String::from("403 Forbidden"),
                })
            }
        })
        .await;

        assert_that(&matches!(result, Err(WaitError::Client { .. }))).is_true();
        assert_that(&polls.get()).is_equal_to(1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_stop_waiting_when_cancelled() {
        let cancel = CancellationToken::new();
        let polls = Cell::new(0);

        let result: Result<(), _> = wait_until("claim", &policy(), &cancel, || {
            polls.set(polls.get() + 1);
            if polls.get() == 2 {
                cancel.cancel();
            }
            async { Ok(Check::Unsatisfied(String::from("Pending"))) }
        })
        .await;

        assert_that(&matches!(result, Err(WaitError::Cancelled { .. }))).is_true();
        assert_that(&polls.get()).is_equal_to(2);
    }
}
