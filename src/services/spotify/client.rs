use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::ports::streaming::{
    CreatedPlaylist, ServiceError, StreamingService, TrackCandidate, UserProfile,
};

const API_BASE: &str = "https://api.spotify.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Spotify Web API adapter for the [`StreamingService`] port.
///
/// Token exchange happens outside this crate; the client only needs a bearer
/// token carrying the playlist-modify scopes. Status codes and the
/// `Retry-After` header are preserved on errors so the retry layer can see
/// them.
pub struct SpotifyClient {
    access_token: String,
    client: reqwest::Client,
}

impl SpotifyClient {
    pub fn new(access_token: String) -> Self {
        Self {
            access_token,
            client: reqwest::Client::new(),
        }
    }

    /// Turn a non-success response into a typed error, keeping the status
    /// code and any server-suggested retry delay.
    async fn check(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());
        let body = response.text().await.unwrap_or_default();
        Err(ServiceError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            retry_after,
            body,
        })
    }
}

#[async_trait::async_trait]
impl StreamingService for SpotifyClient {
    async fn current_user(&self) -> Result<UserProfile, ServiceError> {
        let response = self
            .client
            .get(format!("{API_BASE}/me"))
            .bearer_auth(&self.access_token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let response = Self::check("me", response).await?;
        response.json().await.map_err(ServiceError::Parse)
    }

    async fn search_tracks(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<TrackCandidate>, ServiceError> {
        let url = format!(
            "{API_BASE}/search?q={}&type=track&limit={limit}",
            urlencoding::encode(query)
        );
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let response = Self::check("search", response).await?;

        #[derive(Deserialize)]
        struct SearchResponse {
            tracks: TracksPage,
        }

        #[derive(Deserialize)]
        struct TracksPage {
            items: Vec<TrackCandidate>,
        }

        let page: SearchResponse = response.json().await.map_err(ServiceError::Parse)?;
        Ok(page.tracks.items)
    }

    async fn create_playlist(
        &self,
        owner_id: &str,
        name: &str,
        public: bool,
    ) -> Result<CreatedPlaylist, ServiceError> {
        let response = self
            .client
            .post(format!("{API_BASE}/users/{owner_id}/playlists"))
            .bearer_auth(&self.access_token)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "name": name, "public": public }))
            .send()
            .await?;
        let response = Self::check("create_playlist", response).await?;
        response.json().await.map_err(ServiceError::Parse)
    }

    async fn add_items(&self, playlist_id: &str, uris: &[String]) -> Result<(), ServiceError> {
        let response = self
            .client
            .post(format!("{API_BASE}/playlists/{playlist_id}/tracks"))
            .bearer_auth(&self.access_token)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "uris": uris }))
            .send()
            .await?;
        Self::check("add_items", response).await?;
        Ok(())
    }
}
