//! Shared retry-with-backoff and send-timeout helpers for the central and peripheral
//! endpoints, built on [`crate::ble::state_machine::RetryPolicy`].

use std::future::Future;
use std::time::Duration;

use crate::ble::state_machine::{ConnectionStateMachine, RetryPolicy};
use crate::ble::termination::TerminationProvider;
use crate::error::{ErrorClass, TransportError};

/// Runs `op`, retrying with jittered exponential backoff while it returns an error
/// classified [`ErrorClass::Recoverable`], up to `state_machine`'s configured
/// [`RetryPolicy::max_attempts`]. A terminal error is returned immediately. A
/// recoverable error that exhausts the retry budget forces `termination` into `Error`
/// rather than leaving the endpoint to retry forever silently.
pub async fn retry_or_terminate<T, F, Fut>(
    state_machine: &ConnectionStateMachine,
    termination: &TerminationProvider,
    mut op: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let policy = state_machine.retry_policy();
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if err.classify() == ErrorClass::Terminal {
                    termination.handle_error(&err);
                    return Err(err);
                }
                if attempt + 1 >= policy.max_attempts {
                    termination.force_terminal(&err);
                    return Err(err);
                }
                tokio::time::sleep(jittered_delay(&policy, attempt)).await;
                attempt += 1;
            }
        }
    }
}

/// Bounds a single delegate call to `duration`; an elapsed deadline surfaces as
/// [`TransportError::Timeout`], matching every other timeout in the transport.
pub async fn with_timeout<T>(
    duration: Duration,
    fut: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(duration, fut)
        .await
        .unwrap_or(Err(TransportError::Timeout))
}

fn jittered_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let bound = policy.backoff_bound(attempt);
    let millis = (rand::random::<f64>() * bound.as_millis() as f64) as u64;
    Duration::from_millis(millis)
}
