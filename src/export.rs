use std::path::Path;

use color_eyre::Result;
use color_eyre::eyre::Context;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use serde::Serialize;

use crate::model::{Library, TrackDescriptor};

/// How the export file was decoded and what was found in it.
#[derive(Debug, Clone, Serialize)]
pub struct ParseMeta {
    /// Name of the encoding that decoded the file.
    pub encoding: String,
    /// True when invalid bytes had to be replaced to keep going.
    pub lossy: bool,
    pub delimiter: char,
    pub playlist_count: usize,
}

/// Encodings attempted in order before giving up on a clean decode. Exports
/// produced on Windows or by legacy tools are commonly not UTF-8.
const FALLBACK_ENCODINGS: &[&Encoding] = &[UTF_8, WINDOWS_1252];

fn decode_with_fallback(bytes: &[u8]) -> (String, String, bool) {
    for encoding in FALLBACK_ENCODINGS {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
            return (
                text.into_owned(),
                encoding.name().to_ascii_lowercase(),
                false,
            );
        }
    }
    // Last resort: decode anyway, substituting invalid sequences, so a dirty
    // export cannot abort the run.
    (
        String::from_utf8_lossy(bytes).into_owned(),
        UTF_8.name().to_ascii_lowercase(),
        true,
    )
}

/// Parse a delimited library export into the canonical model.
///
/// Each line must split on `delimiter` into exactly four fields: playlist
/// name, title, artist, album. Fields are trimmed. Lines with any other
/// field count are skipped silently; partial exports are expected data noise
/// and must not abort the run. Pure function of file content, no side
/// effects beyond reading the file.
pub fn parse_export(path: &Path, delimiter: char) -> Result<(Library, ParseMeta)> {
    let bytes = std::fs::read(path)
        .wrap_err_with(|| format!("Failed to read export file: {}", path.display()))?;
    let (text, encoding, lossy) = decode_with_fallback(&bytes);
    if lossy {
        tracing::warn!(
            file = %path.display(),
            "Export file contained undecodable bytes; some characters were replaced"
        );
    }

    let mut library = Library::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split(delimiter).map(str::trim).collect();
        let &[playlist, title, artist, album] = fields.as_slice() else {
            continue;
        };
        library.push_track(
            playlist,
            TrackDescriptor {
                title: title.to_string(),
                artist: artist.to_string(),
                album: album.to_string(),
            },
        );
    }

    let meta = ParseMeta {
        encoding,
        lossy,
        delimiter,
        playlist_count: library.playlist_count(),
    };
    Ok((library, meta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_export(dir: &tempfile::TempDir, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("export.txt");
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_parse_groups_tracks_under_playlists_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(
            &dir,
            b"MyPlaylist | Song A | Artist A | Album A\n\
              OtherPlaylist | Song B | Artist B | Album B\n\
              MyPlaylist | Song C | Artist C | Album C\n",
        );

        let (library, meta) = parse_export(&path, '|').unwrap();

        let names: Vec<&str> = library.playlists().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["MyPlaylist", "OtherPlaylist"]);

        let mine = library.playlist("MyPlaylist").unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].title, "Song A");
        assert_eq!(mine[1].title, "Song C");
        assert_eq!(library.playlist("OtherPlaylist").unwrap()[0].artist, "Artist B");

        assert_eq!(meta.encoding, "utf-8");
        assert!(!meta.lossy);
        assert_eq!(meta.delimiter, '|');
        assert_eq!(meta.playlist_count, 2);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(
            &dir,
            b"List;Song A;Artist A;Album A\n\
              not enough fields\n\
              List;Song B;Artist B;Album B;extra\n\
              \n\
              List;Song C;Artist C;Album C\n",
        );

        let (library, _) = parse_export(&path, ';').unwrap();

        let tracks = library.playlist("List").unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].title, "Song A");
        assert_eq!(tracks[1].title, "Song C");
    }

    #[test]
    fn test_windows_1252_export_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        // "Café" with a Windows-1252 e-acute, invalid as UTF-8.
        let path = write_export(&dir, b"List;Caf\xe9;Artist;Album\n");

        let (library, meta) = parse_export(&path, ';').unwrap();

        assert_eq!(library.playlist("List").unwrap()[0].title, "Caf\u{e9}");
        assert_eq!(meta.encoding, "windows-1252");
        assert!(!meta.lossy);
    }

    #[test]
    fn test_reparse_yields_identical_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(
            &dir,
            b"A;Song 1;Artist 1;Album 1\nB;Song 2;Artist 2;Album 2\nA;Song 3;Artist 3;Album 3\n",
        );

        let (first, _) = parse_export(&path, ';').unwrap();
        let (second, _) = parse_export(&path, ';').unwrap();
        assert_eq!(first, second);
    }
}
