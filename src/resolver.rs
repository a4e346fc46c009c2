use serde_json::json;

use crate::ports::streaming::StreamingService;
use crate::retry::{CallError, RateLimitLog, RetryPolicy, call_with_retry};

/// Resolve one track descriptor to a service URI via search.
///
/// Titles that are empty or literally "unknown" (any casing) never touch the
/// service. The first ranked candidate is taken unconditionally; when the
/// title+artist query comes back empty, a title-only query gets one more
/// chance. Search failures downgrade to an unresolved track so one flaky
/// lookup cannot abort the run; the captured-rate-limit signal is the single
/// exception and propagates.
pub async fn resolve_track<S: StreamingService>(
    service: &S,
    policy: &RetryPolicy,
    log: &RateLimitLog,
    title: &str,
    artist: &str,
) -> Result<Option<String>, CallError> {
    if title.is_empty() || title.eq_ignore_ascii_case("unknown") {
        return Ok(None);
    }

    let mut query = format!("track:{title}");
    if !artist.is_empty() && !artist.eq_ignore_ascii_case("unknown") {
        query.push_str(&format!(" artist:{artist}"));
    }

    match search_first(service, policy, log, &query).await {
        Ok(Some(uri)) => return Ok(Some(uri)),
        Ok(None) => {}
        Err(CallError::RateLimitCaptured(captured)) => {
            return Err(CallError::RateLimitCaptured(captured));
        }
        Err(CallError::Service(error)) => {
            tracing::warn!(title, %error, "Error searching track");
            return Ok(None);
        }
    }

    // Fallback: search by title only.
    match search_first(service, policy, log, &format!("track:{title}")).await {
        Ok(candidate) => Ok(candidate),
        Err(CallError::RateLimitCaptured(captured)) => {
            Err(CallError::RateLimitCaptured(captured))
        }
        Err(CallError::Service(error)) => {
            tracing::warn!(title, %error, "Error searching track");
            Ok(None)
        }
    }
}

async fn search_first<S: StreamingService>(
    service: &S,
    policy: &RetryPolicy,
    log: &RateLimitLog,
    query: &str,
) -> Result<Option<String>, CallError> {
    let candidates = call_with_retry(policy, log, "search", json!({ "query": query }), || {
        service.search_tracks(query, 1)
    })
    .await?;
    Ok(candidates.into_iter().next().map(|candidate| candidate.uri))
}
