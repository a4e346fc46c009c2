use serde::Deserialize;

/// Error surface of the remote streaming service.
///
/// Throttling responses arrive as `Status` with `status == 429` and, when the
/// server provided one, the `Retry-After` delay in seconds. The retry layer
/// inspects these fields; everything else treats the error as opaque.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("HTTP {status} from {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        retry_after: Option<u64>,
        body: String,
    },
    #[error("Failed to send http request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Failed to parse response body: {0}")]
    Parse(#[source] reqwest::Error),
}

/// A ranked search candidate. Ranking comes from the service; callers take
/// the first candidate as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackCandidate {
    pub uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedPlaylist {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
}

/// Port trait wrapping the streaming-service capabilities used by the
/// migration pipeline.
///
/// Implementations live in `services::spotify::client` (production) or test
/// mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait StreamingService: Send + Sync {
    /// Profile of the user the bearer token belongs to.
    async fn current_user(&self) -> Result<UserProfile, ServiceError>;

    /// Ranked track search. `limit` bounds the number of candidates.
    async fn search_tracks(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<TrackCandidate>, ServiceError>;

    /// Create an empty playlist owned by `owner_id` and return its id.
    async fn create_playlist(
        &self,
        owner_id: &str,
        name: &str,
        public: bool,
    ) -> Result<CreatedPlaylist, ServiceError>;

    /// Append `uris` to a playlist. Callers keep batches at or under the
    /// service's 100-item ceiling.
    async fn add_items(&self, playlist_id: &str, uris: &[String]) -> Result<(), ServiceError>;
}
