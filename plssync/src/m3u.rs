//! Plain and extended M3U playlist files.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::errors::Result;
use crate::model::{Playlist, Track};

const BOM: char = '\u{feff}';

/// Reads an M3U file into a local playlist whose path is `path`.
///
/// `#EXTINF:<secs>,<title>` applies to the next entry. A malformed header
/// leaves that entry without title and duration; a negative duration means
/// unknown. Other comments, blank lines and a lone byte order mark are skipped.
pub fn load(path: &Path) -> Result<Playlist> {
    let text = fs::read_to_string(path)?;
    let tracks = parse(&text);
    debug!(path = %path.display(), tracks = tracks.len(), "m3u loaded");
    Ok(Playlist::new_local(Some(path.to_path_buf()), tracks))
}

pub fn parse(text: &str) -> Vec<Track> {
    let mut tracks = Vec::new();
    let mut pending_title: Option<String> = None;
    let mut pending_duration: Option<u32> = None;

    for line in text.lines() {
        let line = line.trim().trim_start_matches(BOM).trim();
        if line.is_empty() {
            continue;
        }
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            (pending_duration, pending_title) = match parse_extinf(info) {
                Some((duration, title)) => (duration, Some(title)),
                None => (None, None),
            };
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let mut track = Track::new(line);
        track.title = pending_title.take().unwrap_or_default();
        track.duration = pending_duration.take();
        tracks.push(track);
    }
    tracks
}

fn parse_extinf(info: &str) -> Option<(Option<u32>, String)> {
    let (duration, title) = info.split_once(',')?;
    let duration: i64 = duration.trim().parse().ok()?;
    Some((u32::try_from(duration).ok(), title.to_string()))
}

/// Writes `playlist` to `path`.
///
/// `.m3u` and `.m3u8` targets get `#EXTM3U` and `#EXTINF` headers, where a
/// missing title falls back to the file name and a missing duration to 0.
/// Any other extension gets one path per line.
pub fn save(playlist: &Playlist, path: &Path) -> Result<()> {
    let extended = path
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            ext == "m3u" || ext == "m3u8"
        })
        .unwrap_or(false);

    let mut out = BufWriter::new(fs::File::create(path)?);
    if extended {
        writeln!(out, "#EXTM3U")?;
    }
    for track in &playlist.tracks {
        if extended {
            let title = if track.title.is_empty() {
                file_name(&track.path)
            } else {
                track.title.as_str()
            };
            writeln!(out, "#EXTINF:{},{}", track.duration.unwrap_or(0), title)?;
        }
        writeln!(out, "{}", track.path)?;
    }
    out.flush()?;
    debug!(path = %path.display(), tracks = playlist.len(), "m3u saved");
    Ok(())
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
