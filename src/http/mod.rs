// Shared HTTP plumbing for the Ollama-backed collaborators
// (embeddings and chat completion)


use anyhow::Result;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;
const MAX_BACKOFF_SECONDS: u64 = 60;

/// Build a `ureq` agent with a global timeout
#[inline]
pub fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Whether a failed request is worth another attempt.
///
/// Server errors and transport failures are retried; client errors are not.
#[inline]
pub fn is_retryable(error: &ureq::Error) -> bool {
    match error {
        ureq::Error::StatusCode(status) => *status >= 500,
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => true,
        _ => false,
    }
}

/// Delay before the attempt following `attempt` (1-based), never more than a minute
#[inline]
pub fn backoff_delay(attempt: u32) -> Duration {
    let seconds = EXPONENTIAL_BACKOFF_BASE
        .checked_pow(attempt.saturating_sub(1))
        .map_or(MAX_BACKOFF_SECONDS, |delay| delay.min(MAX_BACKOFF_SECONDS));
    Duration::from_secs(seconds)
}

/// Run `request_fn` up to `attempts` times with exponential backoff between
/// retryable failures.
#[inline]
pub fn request_with_retry<T, F>(target: &str, attempts: u32, mut request_fn: F) -> Result<T>
where
    F: FnMut() -> Result<T, ureq::Error>,
{
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        debug!("HTTP request attempt {}/{}", attempt, attempts);

        match request_fn() {
            Ok(value) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(value);
            }
            Err(error) => {
                if !is_retryable(&error) {
                    warn!("Non-retryable error: {}", error);
                    return Err(match error {
                        ureq::Error::StatusCode(status) => {
                            anyhow::anyhow!("Client error: HTTP {}", status)
                        }
                        other => anyhow::anyhow!("Non-retryable error: {}", other),
                    });
                }

                warn!(
                    "Retryable error: {}, attempt {}/{}",
                    error, attempt, attempts
                );
                last_error = Some(anyhow::anyhow!("Request error: {}", error));

                if attempt < attempts {
                    let delay = backoff_delay(attempt);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    error!("All retry attempts failed for request to {}", target);

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
}
