use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::ports::streaming::ServiceError;

/// Retry behavior for remote calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Upper bound on retries for a single call once throttled.
    pub max_retries: u32,
    /// Base in seconds for exponential backoff when the server suggested no
    /// delay.
    pub backoff_base: u64,
    /// Capture mode: after the first observed rate limit, log the event,
    /// sleep once and halt instead of burning through the retry budget.
    pub stop_on_first_rate_limit: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: 1,
            stop_on_first_rate_limit: true,
        }
    }
}

/// Which detection tier recognized the throttling response. Tiers run in
/// order: typed retry-after field, typed status code, then the textual
/// heuristic over the error's string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    RetryAfterField,
    StatusCode,
    ErrorText,
}

/// What the throttling detector found on an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSignal {
    /// Server-suggested delay in seconds, when one was present.
    pub retry_after: Option<u64>,
    pub source: SignalSource,
}

static RETRY_AFTER_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)retry-?after\D*(\d+)").expect("valid regex"));
static STATUS_429_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b429\b").expect("valid regex"));

/// Detect a throttling signal on a service error.
///
/// The first two tiers read typed fields. The third is a deliberate
/// best-effort sniff of the rendered error text, kept for errors that lost
/// their structure somewhere along the way; it is not hidden behind the
/// typed tiers, the first matching tier simply wins.
pub fn rate_limit_signal(error: &ServiceError) -> Option<RateLimitSignal> {
    if let ServiceError::Status {
        retry_after: Some(seconds),
        ..
    } = error
    {
        return Some(RateLimitSignal {
            retry_after: Some(*seconds),
            source: SignalSource::RetryAfterField,
        });
    }

    if let ServiceError::Status { status: 429, .. } = error {
        return Some(RateLimitSignal {
            retry_after: None,
            source: SignalSource::StatusCode,
        });
    }

    let text = error.to_string();
    if let Some(captures) = RETRY_AFTER_TEXT.captures(&text) {
        return Some(RateLimitSignal {
            retry_after: captures[1].parse().ok(),
            source: SignalSource::ErrorText,
        });
    }
    if STATUS_429_TEXT.is_match(&text) {
        return Some(RateLimitSignal {
            retry_after: None,
            source: SignalSource::ErrorText,
        });
    }

    None
}

/// One throttling occurrence. Appended to the event log as a JSON line the
/// moment it is detected, so a halted run still leaves a forensic trail.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitEvent {
    pub timestamp: String,
    pub operation: String,
    pub context: Value,
    pub attempt: u32,
    pub max_retries: u32,
    pub retry_after: Option<u64>,
    pub error: String,
}

/// Append-only JSONL log of rate-limit events. Never truncated between runs.
#[derive(Debug, Clone)]
pub struct RateLimitLog {
    path: PathBuf,
}

impl RateLimitLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. The file is opened per event so every detected
    /// occurrence reaches disk even when the run halts right after.
    pub fn append(&self, event: &RateLimitEvent) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(event).map_err(std::io::Error::other)?;
        writeln!(file, "{line}")
    }
}

/// Details preserved when a rate limit is captured instead of retried.
#[derive(Debug, Clone)]
pub struct CapturedRateLimit {
    pub operation: String,
    pub attempt: u32,
    pub retry_after: Option<u64>,
}

/// Outcome surface of [`call_with_retry`]. The captured variant is the run's
/// sole halting signal; every other failure is the underlying service error,
/// returned unchanged.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Rate limit captured during {}", .0.operation)]
    RateLimitCaptured(CapturedRateLimit),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Keys whose values never reach the event log.
const REDACTED_KEYS: &[&str] = &["client_secret", "authorization", "token", "auth", "headers"];
const MAX_SCALAR_LEN: usize = 200;

/// Reduce a call-site context object to something safe to log: credential
/// fields redacted, long strings truncated, nested values replaced by their
/// kind.
pub fn summarize_context(context: &Value) -> Value {
    match context {
        Value::Object(fields) => {
            let summarized = fields
                .iter()
                .map(|(key, value)| {
                    let summary = if REDACTED_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                        Value::String("<redacted>".to_string())
                    } else {
                        summarize_value(value)
                    };
                    (key.clone(), summary)
                })
                .collect();
            Value::Object(summarized)
        }
        other => summarize_value(other),
    }
}

fn summarize_value(value: &Value) -> Value {
    match value {
        Value::String(text) if text.chars().count() > MAX_SCALAR_LEN => {
            Value::String(text.chars().take(MAX_SCALAR_LEN).collect())
        }
        Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => value.clone(),
        Value::Array(_) => Value::String("list".to_string()),
        Value::Object(_) => Value::String("object".to_string()),
    }
}

/// Run a remote call, absorbing throttling responses.
///
/// Non-throttling errors pass through unchanged. A throttling response is
/// logged immediately, then the call sleeps out the server-suggested delay
/// plus one second (or `backoff_base * 2^(attempt-1)` when none was given,
/// attempt 1-indexed) and retries with the same arguments, up to
/// `policy.max_retries`. In capture mode the first occurrence returns
/// [`CallError::RateLimitCaptured`] right after the sleep instead of
/// retrying.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    log: &RateLimitLog,
    operation: &str,
    context: Value,
    mut call: F,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let summarized = summarize_context(&context);
    let mut attempt = 0u32;
    loop {
        let error = match call().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        attempt += 1;

        let Some(signal) = rate_limit_signal(&error) else {
            return Err(error.into());
        };
        if attempt > policy.max_retries {
            return Err(error.into());
        }

        let event = RateLimitEvent {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            operation: operation.to_string(),
            context: summarized.clone(),
            attempt,
            max_retries: policy.max_retries,
            retry_after: signal.retry_after,
            error: error.to_string(),
        };
        if let Err(log_error) = log.append(&event) {
            // A logging failure must never mask the call outcome.
            tracing::warn!(%log_error, "Failed to append rate-limit event");
        }

        let wait = match signal.retry_after {
            Some(seconds) => seconds + 1,
            None => policy.backoff_base * 2u64.pow(attempt - 1),
        };
        tracing::warn!(
            operation,
            attempt,
            max_retries = policy.max_retries,
            wait_secs = wait,
            "Rate limit encountered, backing off"
        );
        tokio::time::sleep(Duration::from_secs(wait)).await;

        if policy.stop_on_first_rate_limit {
            return Err(CallError::RateLimitCaptured(CapturedRateLimit {
                operation: operation.to_string(),
                attempt,
                retry_after: signal.retry_after,
            }));
        }
    }
}
