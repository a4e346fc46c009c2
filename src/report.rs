use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use color_eyre::Result;
use color_eyre::eyre::Context;

use crate::model::{Library, MissingTrackRecord};

/// Write the missing-tracks report: a header row plus one row per unresolved
/// track, in accumulation order. The header is written even when no track
/// went missing so the report is always readable.
pub fn write_missing_report(path: &Path, records: &[MissingTrackRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).wrap_err_with(|| {
        format!(
            "Failed to create missing-tracks report at {}",
            path.display()
        )
    })?;
    writer
        .write_record(["playlist", "title", "artist", "reason"])
        .wrap_err("Failed to write missing-tracks header")?;
    for record in records {
        writer
            .write_record([
                record.playlist.as_str(),
                record.title.as_str(),
                record.artist.as_str(),
                record.reason.as_str(),
            ])
            .wrap_err("Failed to write missing-track record")?;
    }
    writer.flush().wrap_err("Failed to flush missing-tracks report")?;
    Ok(())
}

/// Timestamped sibling of `base`: `<stem>_<timestamp>.<ext>`, defaulting the
/// extension to `json` when the base path has none.
fn timestamped_path(base: &Path, timestamp: &str) -> PathBuf {
    let extension = base.extension().and_then(|ext| ext.to_str()).unwrap_or("json");
    let stem = base
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("playlist_export");
    base.with_file_name(format!("{stem}_{timestamp}.{extension}"))
}

/// Serialize the parsed model for auditing, before any remote call is
/// attempted. Returns the timestamped path actually written.
pub fn write_library_snapshot(
    base: &Path,
    library: &Library,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let path = timestamped_path(base, &now.format("%Y-%m-%d_%H-%M-%SZ").to_string());
    let json =
        serde_json::to_string_pretty(library).wrap_err("Failed to serialize parsed model")?;
    std::fs::write(&path, json)
        .wrap_err_with(|| format!("Failed to write model snapshot to {}", path.display()))?;
    Ok(path)
}
