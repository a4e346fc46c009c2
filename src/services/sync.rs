use serde_json::json;

use crate::model::{Library, MissingTrackRecord};
use crate::ports::streaming::StreamingService;
use crate::resolver::resolve_track;
use crate::retry::{CallError, CapturedRateLimit, RateLimitLog, RetryPolicy, call_with_retry};

/// Remote ceiling on items per add-items call.
pub const ADD_ITEMS_BATCH_SIZE: usize = 100;

/// Canonical reason recorded for every unresolved track.
pub const MISSING_TRACK_REASON: &str = "Not found or title unknown";

/// How a sync run ended.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Every playlist was created and uploaded.
    Completed,
    /// A rate limit was captured; remaining work was skipped.
    Halted(CapturedRateLimit),
}

/// Drives playlist creation, track resolution and batched upload, one
/// playlist at a time.
///
/// Playlists are processed in the model's insertion order and tracks in
/// appearance order. There is deliberately no parallelism: the remote rate
/// limit is a global resource, not a per-track one.
pub struct SyncEngine<'a, S: StreamingService> {
    service: &'a S,
    policy: &'a RetryPolicy,
    log: &'a RateLimitLog,
    missing: Vec<MissingTrackRecord>,
}

impl<'a, S: StreamingService> SyncEngine<'a, S> {
    pub fn new(service: &'a S, policy: &'a RetryPolicy, log: &'a RateLimitLog) -> Self {
        Self {
            service,
            policy,
            log,
            missing: Vec::new(),
        }
    }

    /// Missing-track records accumulated so far, in resolution order. Valid
    /// in every exit path, including a halted or failed run.
    pub fn missing_tracks(&self) -> &[MissingTrackRecord] {
        &self.missing
    }

    /// Recreate every playlist in the library on the remote service.
    ///
    /// Per playlist: create, resolve every track in order, then upload the
    /// resolved URIs in consecutive batches. A captured rate limit anywhere
    /// halts the whole run; a playlist that failed to be created cannot
    /// receive tracks, and the remote state after a failed upload is
    /// unknowable. Non-rate-limit failures of create or upload propagate as
    /// errors and abort.
    pub async fn sync(
        &mut self,
        owner_id: &str,
        library: &Library,
    ) -> Result<SyncOutcome, CallError> {
        for (playlist_name, tracks) in library.playlists() {
            tracing::info!(
                playlist = playlist_name,
                tracks = tracks.len(),
                "Creating playlist"
            );

            let created = match call_with_retry(
                self.policy,
                self.log,
                "create_playlist",
                json!({ "playlist": playlist_name }),
                || self.service.create_playlist(owner_id, playlist_name, false),
            )
            .await
            {
                Ok(created) => created,
                Err(CallError::RateLimitCaptured(captured)) => {
                    tracing::error!(
                        playlist = playlist_name,
                        "Stopped due to captured rate limit while creating playlist"
                    );
                    return Ok(SyncOutcome::Halted(captured));
                }
                Err(error) => return Err(error),
            };

            let mut uris = Vec::new();
            for track in tracks {
                match resolve_track(self.service, self.policy, self.log, &track.title, &track.artist)
                    .await
                {
                    Ok(Some(uri)) => {
                        tracing::info!(title = %track.title, artist = %track.artist, "Found");
                        uris.push(uri);
                    }
                    Ok(None) => {
                        tracing::info!(title = %track.title, artist = %track.artist, "Missing");
                        self.missing.push(MissingTrackRecord {
                            playlist: playlist_name.to_string(),
                            title: track.title.clone(),
                            artist: track.artist.clone(),
                            reason: MISSING_TRACK_REASON.to_string(),
                        });
                    }
                    Err(CallError::RateLimitCaptured(captured)) => {
                        tracing::error!(
                            playlist = playlist_name,
                            "Stopped due to captured rate limit while resolving tracks"
                        );
                        return Ok(SyncOutcome::Halted(captured));
                    }
                    Err(error) => return Err(error),
                }
            }

            for (index, batch) in uris.chunks(ADD_ITEMS_BATCH_SIZE).enumerate() {
                let offset = index * ADD_ITEMS_BATCH_SIZE;
                match call_with_retry(
                    self.policy,
                    self.log,
                    "add_items",
                    json!({ "playlist": playlist_name, "batch_offset": offset }),
                    || self.service.add_items(&created.id, batch),
                )
                .await
                {
                    Ok(()) => {}
                    Err(CallError::RateLimitCaptured(captured)) => {
                        tracing::error!(
                            playlist = playlist_name,
                            "Stopped due to captured rate limit while adding tracks"
                        );
                        return Ok(SyncOutcome::Halted(captured));
                    }
                    Err(error) => return Err(error),
                }
            }

            tracing::info!(
                playlist = playlist_name,
                uploaded = uris.len(),
                missing = tracks.len() - uris.len(),
                "Playlist uploaded"
            );
        }

        Ok(SyncOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use mockall::Sequence;

    use super::*;
    use crate::model::TrackDescriptor;
    use crate::ports::streaming::{
        CreatedPlaylist, MockStreamingService, ServiceError, TrackCandidate,
    };

    fn track(title: &str, artist: &str) -> TrackDescriptor {
        TrackDescriptor {
            title: title.to_string(),
            artist: artist.to_string(),
            album: "Album".to_string(),
        }
    }

    fn test_log(dir: &tempfile::TempDir) -> RateLimitLog {
        RateLimitLog::new(dir.path().join("rate_limit_events.jsonl"))
    }

    #[tokio::test]
    async fn test_sync_uploads_resolved_and_records_missing() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(&dir);
        let policy = RetryPolicy::default();

        let mut library = Library::new();
        library.push_track("MyList", track("FoundSong", "A"));
        library.push_track("MyList", track("MissingSong", "B"));

        let mut service = MockStreamingService::new();
        service
            .expect_create_playlist()
            .withf(|owner, name, public| owner == "testuser" && name == "MyList" && !public)
            .times(1)
            .returning(|_, _, _| {
                Ok(CreatedPlaylist {
                    id: "pl_1".to_string(),
                })
            });
        service
            .expect_search_tracks()
            .withf(|query, _| query.contains("FoundSong"))
            .times(1)
            .returning(|_, _| {
                Ok(vec![TrackCandidate {
                    uri: "spotify:track:found".to_string(),
                }])
            });
        // Primary and title-only fallback both come back empty.
        service
            .expect_search_tracks()
            .withf(|query, _| query.contains("MissingSong"))
            .times(2)
            .returning(|_, _| Ok(Vec::new()));
        service
            .expect_add_items()
            .withf(|playlist_id, uris| {
                playlist_id == "pl_1" && uris == ["spotify:track:found".to_string()]
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut engine = SyncEngine::new(&service, &policy, &log);
        let outcome = engine.sync("testuser", &library).await.unwrap();

        assert!(matches!(outcome, SyncOutcome::Completed));
        let missing = engine.missing_tracks();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].playlist, "MyList");
        assert_eq!(missing[0].title, "MissingSong");
        assert_eq!(missing[0].artist, "B");
        assert_eq!(missing[0].reason, MISSING_TRACK_REASON);
    }

    #[tokio::test]
    async fn test_uploads_are_chunked_at_the_batch_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(&dir);
        let policy = RetryPolicy::default();

        let mut library = Library::new();
        for index in 0..150 {
            library.push_track("Big", track(&format!("Song {index}"), "Artist"));
        }

        let mut service = MockStreamingService::new();
        service.expect_create_playlist().times(1).returning(|_, _, _| {
            Ok(CreatedPlaylist {
                id: "pl_big".to_string(),
            })
        });
        service
            .expect_search_tracks()
            .times(150)
            .returning(|query, _| {
                Ok(vec![TrackCandidate {
                    uri: format!("uri:{query}"),
                }])
            });

        let mut sequence = Sequence::new();
        service
            .expect_add_items()
            .withf(|_, uris| {
                uris.len() == 100
                    && uris[0] == "uri:track:Song 0 artist:Artist"
                    && uris[99] == "uri:track:Song 99 artist:Artist"
            })
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(()));
        service
            .expect_add_items()
            .withf(|_, uris| {
                uris.len() == 50
                    && uris[0] == "uri:track:Song 100 artist:Artist"
                    && uris[49] == "uri:track:Song 149 artist:Artist"
            })
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(()));

        let mut engine = SyncEngine::new(&service, &policy, &log);
        let outcome = engine.sync("testuser", &library).await.unwrap();

        assert!(matches!(outcome, SyncOutcome::Completed));
        assert!(engine.missing_tracks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_captured_rate_limit_on_create_halts_before_any_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(&dir);
        let policy = RetryPolicy::default();

        let mut library = Library::new();
        library.push_track("First", track("Song A", "Artist A"));
        library.push_track("Second", track("Song B", "Artist B"));

        let mut service = MockStreamingService::new();
        service.expect_create_playlist().times(1).returning(|_, _, _| {
            Err(ServiceError::Status {
                endpoint: "create_playlist".to_string(),
                status: 429,
                retry_after: Some(5),
                body: "API rate limit exceeded".to_string(),
            })
        });
        service.expect_search_tracks().never();
        service.expect_add_items().never();

        let mut engine = SyncEngine::new(&service, &policy, &log);
        let outcome = engine.sync("testuser", &library).await.unwrap();

        match outcome {
            SyncOutcome::Halted(captured) => {
                assert_eq!(captured.operation, "create_playlist");
            }
            other => panic!("expected a halted run, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_rate_limit_create_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let log = test_log(&dir);
        let policy = RetryPolicy::default();

        let mut library = Library::new();
        library.push_track("List", track("Song A", "Artist A"));

        let mut service = MockStreamingService::new();
        service.expect_create_playlist().times(1).returning(|_, _, _| {
            Err(ServiceError::Status {
                endpoint: "create_playlist".to_string(),
                status: 403,
                retry_after: None,
                body: "insufficient scope".to_string(),
            })
        });

        let mut engine = SyncEngine::new(&service, &policy, &log);
        let result = engine.sync("testuser", &library).await;

        assert!(matches!(
            result,
            Err(CallError::Service(ServiceError::Status { status: 403, .. }))
        ));
    }
}
