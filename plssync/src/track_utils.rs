//! Filesystem-derived track flags.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::model::Track;

/// Sets `track.exists` from the filesystem.
pub fn check_if_track_exists(track: &mut Track) {
    track.exists = Path::new(&track.path).exists();
}

/// Sets `track.has_intro` when a file in `intros_dir` starts with the
/// track's artist name, compared case-insensitively.
///
/// An empty artist or an unreadable directory means no intro.
pub fn check_for_intro(intros_dir: &Path, track: &mut Track) {
    track.has_intro = false;
    if track.artist.is_empty() {
        return;
    }

    let entries = match fs::read_dir(intros_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %intros_dir.display(), error = %err, "cannot read intros directory");
            return;
        }
    };

    let artist = track.artist.to_lowercase();
    track.has_intro = entries
        .filter_map(|entry| entry.ok())
        .any(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .to_lowercase()
                .starts_with(&artist)
        });
    if track.has_intro {
        debug!(artist = %track.artist, "intro found");
    }
}
