use std::collections::HashMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};

/// A single track as it appeared in the library export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub title: String,
    pub artist: String,
    pub album: String,
}

/// The parsed library: playlist name mapped to its ordered tracks.
///
/// Playlists keep first-seen order and tracks keep appearance order; both
/// orders drive upload order and report order downstream. Duplicate tracks
/// are permitted and preserved.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Library {
    entries: Vec<(String, Vec<TrackDescriptor>)>,
    index: HashMap<String, usize>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a track to the named playlist, creating the playlist on first
    /// sight. Re-encountering a name appends to its existing list.
    pub fn push_track(&mut self, playlist: &str, track: TrackDescriptor) {
        match self.index.get(playlist) {
            Some(&position) => self.entries[position].1.push(track),
            None => {
                self.index.insert(playlist.to_string(), self.entries.len());
                self.entries.push((playlist.to_string(), vec![track]));
            }
        }
    }

    /// Playlists in first-seen order.
    pub fn playlists(&self) -> impl Iterator<Item = (&str, &[TrackDescriptor])> {
        self.entries
            .iter()
            .map(|(name, tracks)| (name.as_str(), tracks.as_slice()))
    }

    pub fn playlist(&self, name: &str) -> Option<&[TrackDescriptor]> {
        self.index
            .get(name)
            .map(|&position| self.entries[position].1.as_slice())
    }

    pub fn playlist_count(&self) -> usize {
        self.entries.len()
    }

    pub fn track_count(&self) -> usize {
        self.entries.iter().map(|(_, tracks)| tracks.len()).sum()
    }
}

// Serialized as a JSON object in insertion order so the snapshot mirrors the
// export file's playlist order.
impl Serialize for Library {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, tracks) in &self.entries {
            map.serialize_entry(name, tracks)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Library {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct LibraryVisitor;

        impl<'de> serde::de::Visitor<'de> for LibraryVisitor {
            type Value = Library;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a map of playlist name to track list")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Library, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut library = Library::new();
                while let Some((name, tracks)) =
                    access.next_entry::<String, Vec<TrackDescriptor>>()?
                {
                    for track in tracks {
                        library.push_track(&name, track);
                    }
                }
                Ok(library)
            }
        }

        deserializer.deserialize_map(LibraryVisitor)
    }
}

/// One row of the missing-tracks report, accumulated across the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingTrackRecord {
    pub playlist: String,
    pub title: String,
    pub artist: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(title: &str) -> TrackDescriptor {
        TrackDescriptor {
            title: title.to_string(),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
        }
    }

    #[test]
    fn test_push_track_preserves_playlist_and_track_order() {
        let mut library = Library::new();
        library.push_track("MyPlaylist", track("Song A"));
        library.push_track("OtherPlaylist", track("Song B"));
        library.push_track("MyPlaylist", track("Song C"));

        let names: Vec<&str> = library.playlists().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["MyPlaylist", "OtherPlaylist"]);

        let mine = library.playlist("MyPlaylist").unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].title, "Song A");
        assert_eq!(mine[1].title, "Song C");
        assert_eq!(library.playlist("OtherPlaylist").unwrap().len(), 1);
        assert_eq!(library.track_count(), 3);
    }

    #[test]
    fn test_duplicates_are_preserved() {
        let mut library = Library::new();
        library.push_track("List", track("Same Song"));
        library.push_track("List", track("Same Song"));

        assert_eq!(library.playlist("List").unwrap().len(), 2);
    }

    #[test]
    fn test_serializes_as_ordered_map() {
        let mut library = Library::new();
        library.push_track("Zebra", track("Song A"));
        library.push_track("Apple", track("Song B"));

        let json = serde_json::to_string(&library).unwrap();
        let zebra = json.find("Zebra").unwrap();
        let apple = json.find("Apple").unwrap();
        assert!(zebra < apple, "insertion order lost: {json}");
    }

    #[test]
    fn test_json_round_trip() {
        let mut library = Library::new();
        library.push_track("MyPlaylist", track("Song A"));
        library.push_track("OtherPlaylist", track("Song B"));
        library.push_track("MyPlaylist", track("Song C"));

        let json = serde_json::to_string(&library).unwrap();
        let restored: Library = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, library);
    }
}
