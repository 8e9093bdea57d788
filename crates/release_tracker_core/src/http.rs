use std::env;
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::RETRY_AFTER;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str = "release-tracker/0.1";

const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Transport settings shared by the chat and wiki clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
            max_retries: 2,
            max_write_retries: 1,
            retry_delay_ms: 500,
        }
    }
}

impl HttpSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            user_agent: env::var("TRACKER_USER_AGENT")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.user_agent),
            timeout_ms: env_value("TRACKER_HTTP_TIMEOUT_MS", defaults.timeout_ms),
            max_retries: env_value("TRACKER_HTTP_RETRIES", defaults.max_retries),
            max_write_retries: env_value("TRACKER_HTTP_WRITE_RETRIES", defaults.max_write_retries),
            retry_delay_ms: env_value("TRACKER_HTTP_RETRY_DELAY_MS", defaults.retry_delay_ms),
        }
    }

    pub fn build_client(&self) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(Duration::from_millis(self.timeout_ms))
            .user_agent(self.user_agent.clone())
            .build()
    }
}

fn env_value<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Sends the request built by `request`, retrying transient failures.
///
/// The final response is returned even when its status is an error so that
/// callers can map statuses onto their own failure kinds.
pub fn send_with_retry<F>(
    settings: &HttpSettings,
    max_retries: usize,
    mut request: F,
) -> Result<Response, reqwest::Error>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        match request().send() {
            Ok(response) => {
                let status = response.status();
                if attempt < max_retries && is_retryable_status(status) {
                    debug!(%status, attempt, "retrying HTTP request");
                    wait_before_retry(settings, attempt, retry_after(&response));
                    attempt += 1;
                    continue;
                }
                return Ok(response);
            }
            Err(error) => {
                if attempt < max_retries && is_retryable_error(&error) {
                    debug!(%error, attempt, "retrying HTTP request");
                    wait_before_retry(settings, attempt, None);
                    attempt += 1;
                    continue;
                }
                return Err(error);
            }
        }
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(|seconds| Duration::from_secs(seconds.min(MAX_RETRY_AFTER_SECS)))
}

fn wait_before_retry(settings: &HttpSettings, attempt: usize, hint: Option<Duration>) {
    if let Some(delay) = hint {
        sleep(delay);
        return;
    }
    sleep(backoff_delay(settings.retry_delay_ms, attempt));
}

pub(crate) fn backoff_delay(retry_delay_ms: u64, attempt: usize) -> Duration {
    let exponent = u32::try_from(attempt).unwrap_or(16);
    let base = retry_delay_ms.saturating_mul(2u64.saturating_pow(exponent));
    let jitter = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| u64::from(duration.subsec_millis() % 100))
        .unwrap_or(0);
    Duration::from_millis(base.saturating_add(jitter))
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}
