use std::fmt;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Identifier of a configured remote source (e.g. `"104.7"`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        SourceId(value.to_string())
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        SourceId(value)
    }
}

/// Process-local identity of an open playlist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlaylistId(pub Uuid);

impl PlaylistId {
    pub fn new() -> Self {
        PlaylistId(Uuid::new_v4())
    }
}

impl Default for PlaylistId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Connection health of a remote source client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
    Timeout,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Timeout => "timeout",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ConnectionStatus::Error | ConnectionStatus::Timeout)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One media item of a playlist.
///
/// The automation server exposes no stable track id, so `path` is the
/// identity used by diffing and edit mirroring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    pub path: String,
    pub artist: String,
    pub title: String,
    /// Length in whole seconds, when known.
    pub duration: Option<u32>,
    /// Scheduled start, in seconds since Sunday 00:00:00 (`< WEEK_SECONDS`).
    ///
    /// Freshly parsed remote tracks carry the server's time of day here until
    /// the schedule projection rewrites it.
    pub play_time: Option<u32>,
    /// Cached filesystem check, not authoritative.
    pub exists: bool,
    /// Cached intro lookup, not authoritative.
    pub has_intro: bool,
}

/// The metadata tuple used to detect in-place edits of a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrackFingerprint<'a> {
    pub path: &'a str,
    pub artist: &'a str,
    pub title: &'a str,
    pub duration: Option<u32>,
}

impl Track {
    pub fn new(path: impl Into<String>) -> Self {
        Track {
            path: path.into(),
            artist: String::new(),
            title: String::new(),
            duration: None,
            play_time: None,
            exists: true,
            has_intro: false,
        }
    }

    pub fn with_metadata(
        path: impl Into<String>,
        artist: impl Into<String>,
        title: impl Into<String>,
        duration: Option<u32>,
    ) -> Self {
        Track {
            artist: artist.into(),
            title: title.into(),
            duration,
            ..Track::new(path)
        }
    }

    pub fn fingerprint(&self) -> TrackFingerprint<'_> {
        TrackFingerprint {
            path: &self.path,
            artist: &self.artist,
            title: &self.title,
            duration: self.duration,
        }
    }

    /// File name without directories or extension, used when a title is missing.
    pub fn file_stem(&self) -> String {
        // remote paths are usually Windows paths, split on both separators
        let name = self
            .path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.path.as_str());
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => name.to_string(),
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.artist.is_empty(), self.title.is_empty()) {
            (false, false) => write!(f, "{} - {}", self.artist, self.title),
            (true, false) => f.write_str(&self.title),
            _ => f.write_str(&self.path),
        }
    }
}

/// Where a playlist lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaylistKind {
    /// File-backed playlist; `None` until first saved.
    Local { path: Option<PathBuf> },
    /// Mirror of the playlist owned by a remote automation server.
    Remote { source_id: SourceId },
}

/// Ordered sequence of tracks.
#[derive(Clone, Debug)]
pub struct Playlist {
    id: PlaylistId,
    kind: PlaylistKind,
    pub tracks: Vec<Track>,
}

impl Playlist {
    pub fn new_local(path: Option<PathBuf>, tracks: Vec<Track>) -> Self {
        Playlist {
            id: PlaylistId::new(),
            kind: PlaylistKind::Local { path },
            tracks,
        }
    }

    pub fn new_remote(source_id: SourceId, tracks: Vec<Track>) -> Self {
        Playlist {
            id: PlaylistId::new(),
            kind: PlaylistKind::Remote { source_id },
            tracks,
        }
    }

    pub fn id(&self) -> PlaylistId {
        self.id
    }

    pub fn kind(&self) -> &PlaylistKind {
        &self.kind
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.kind, PlaylistKind::Remote { .. })
    }

    pub fn source_id(&self) -> Option<&SourceId> {
        match &self.kind {
            PlaylistKind::Remote { source_id } => Some(source_id),
            PlaylistKind::Local { .. } => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            PlaylistKind::Local { path } => path.as_deref(),
            PlaylistKind::Remote { .. } => None,
        }
    }

    /// Marks the playlist as the mirror of `source_id`.
    pub fn stamp_remote(&mut self, source_id: SourceId) {
        self.kind = PlaylistKind::Remote { source_id };
    }

    /// Records the file a local playlist was saved to. No-op on remote mirrors.
    pub fn set_path(&mut self, new_path: PathBuf) {
        if let PlaylistKind::Local { path } = &mut self.kind {
            *path = Some(new_path);
        }
    }

    pub fn name_for_display(&self) -> String {
        match &self.kind {
            PlaylistKind::Remote { source_id } => source_id.to_string(),
            PlaylistKind::Local { path: Some(path) } => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            PlaylistKind::Local { path: None } => "Untitled".to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Index of the first track with the given path.
    pub fn position_of(&self, path: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.path == path)
    }

    /// Inserts `tracks` starting at `index` (clamped to the end), keeping their order.
    pub fn insert_tracks(&mut self, index: usize, tracks: Vec<Track>) {
        let at = index.min(self.tracks.len());
        self.tracks.splice(at..at, tracks);
    }

    /// Removes the tracks at `indices`; out of range indices are ignored.
    pub fn remove_indices(&mut self, indices: &[usize]) {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();
        for index in sorted {
            if index < self.tracks.len() {
                self.tracks.remove(index);
            }
        }
    }

    /// Moves a block of tracks the same way the automation server does.
    ///
    /// Returns `false` without touching the playlist when `indices` is empty,
    /// out of range, or already starts at `new_index`.
    pub fn move_tracks(&mut self, indices: &[usize], new_index: usize) -> bool {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        let Some(&first) = sorted.first() else {
            return false;
        };
        if new_index == first || sorted.iter().any(|&i| i >= self.tracks.len()) {
            return false;
        }

        if new_index < first {
            for (offset, &from) in sorted.iter().enumerate() {
                let track = self.tracks.remove(from);
                let to = (new_index + offset).min(self.tracks.len());
                self.tracks.insert(to, track);
            }
        } else {
            let to = new_index + sorted.len() - 1;
            for _ in 0..sorted.len() {
                let track = self.tracks.remove(first);
                let at = to.min(self.tracks.len());
                self.tracks.insert(at, track);
            }
        }
        true
    }
}
