//! Entry point for editors of local and remote playlists.
//!
//! Edits on a remote mirror are sent to the owning source and the mirror is
//! then replaced by the playlist the source returned; local playlists are
//! edited directly. The service also keeps mirror schedules projected.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Local;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config_ext::SyncConfigExt;
use crate::diff::PlaylistDiff;
use crate::errors::{Result, SyncError};
use crate::events::{EventBus, ObserverId};
use crate::model::{ConnectionStatus, Playlist, PlaylistId, SourceId, Track};
use crate::registry::SourceRegistry;
use crate::remote::client::RemoteSourceClient;
use crate::schedule::project_from_time_of_day;
use crate::store::{PlaylistStore, SharedPlaylist};
use crate::track_utils::{check_for_intro, check_if_track_exists};

/// Settings the service reads once at construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceSettings {
    pub intros_dir: Option<PathBuf>,
    /// Poll interval; `None` disables auto-reload.
    pub auto_reload: Option<Duration>,
}

impl ServiceSettings {
    pub fn from_config(config: &plsconfig::Config) -> Self {
        ServiceSettings {
            intros_dir: config.get_intros_dir(),
            auto_reload: config.auto_reload_interval(),
        }
    }
}

/// A poll changed the membership or metadata of a mirror.
#[derive(Clone, Debug)]
pub struct MirrorChange {
    pub source_id: SourceId,
    pub playlist_id: PlaylistId,
    pub diff: PlaylistDiff,
}

pub struct PlaylistService {
    store: PlaylistStore,
    settings: ServiceSettings,
    poll_observers: Mutex<HashMap<SourceId, ObserverId>>,
    changes: EventBus<MirrorChange>,
}

impl PlaylistService {
    pub fn new(registry: Arc<SourceRegistry>, settings: ServiceSettings) -> Self {
        PlaylistService {
            store: PlaylistStore::new(registry),
            settings,
            poll_observers: Mutex::new(HashMap::new()),
            changes: EventBus::new(),
        }
    }

    pub fn store(&self) -> &PlaylistStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        self.store.registry()
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Mirror changes detected by auto-reload.
    pub fn subscribe_changes(&self) -> Receiver<MirrorChange> {
        self.changes.subscribe()
    }

    pub fn available_sources(&self) -> Vec<(SourceId, String)> {
        self.registry().available_sources()
    }

    fn resolve_source(&self, source_id: Option<&SourceId>) -> Result<SourceId> {
        match source_id {
            Some(id) => Ok(id.clone()),
            None => self
                .registry()
                .default_source()
                .ok_or_else(|| SyncError::UnknownSource("no remote source configured".to_string())),
        }
    }

    fn client(&self, source_id: &SourceId) -> Result<RemoteSourceClient> {
        self.registry()
            .get(source_id)
            .ok_or_else(|| SyncError::UnknownSource(source_id.to_string()))
    }

    // Local playlists

    pub fn create_playlist(&self) -> SharedPlaylist {
        self.store.create_playlist()
    }

    pub fn load_local_playlist(&self, path: &Path) -> Result<SharedPlaylist> {
        self.store.load_local_playlist(path)
    }

    pub fn save_playlist(&self, id: PlaylistId, path: Option<&Path>) -> Result<()> {
        self.store.save_playlist(id, path)
    }

    // Remote playlists

    /// Opens the mirror of `source_id` (the first configured source when
    /// `None`) and projects its schedule.
    pub fn load_remote_playlist(&self, source_id: Option<&SourceId>) -> Result<SharedPlaylist> {
        let source_id = self.resolve_source(source_id)?;
        let mirror = self.store.load_remote_playlist(&source_id)?;
        self.refresh_schedule(&mirror);
        Ok(mirror)
    }

    /// Refetches an open mirror in place and re-projects its schedule.
    pub fn reload_remote_playlist(&self, source_id: Option<&SourceId>) -> Result<SharedPlaylist> {
        let source_id = self.resolve_source(source_id)?;
        let mirror = self.store.reload_remote_playlist(&source_id)?;
        self.refresh_schedule(&mirror);
        Ok(mirror)
    }

    pub fn close_remote_playlist(&self, source_id: Option<&SourceId>) -> bool {
        match self.resolve_source(source_id) {
            Ok(source_id) => match self.store.remote_playlist(&source_id) {
                Some(mirror) => {
                    let id = mirror.read().id();
                    self.close_playlist(id)
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Closes any open playlist; closing a mirror disconnects its source.
    pub fn close_playlist(&self, id: PlaylistId) -> bool {
        let source_id = self
            .store
            .get(id)
            .as_ref()
            .and_then(|p| p.read().source_id().cloned());
        if let Some(source_id) = &source_id {
            self.detach_poll_observer(source_id);
        }
        self.store.close_playlist(id)
    }

    /// Status and message of a source, `None` if it is not registered.
    pub fn source_status(&self, source_id: &SourceId) -> Option<(ConnectionStatus, String)> {
        self.registry()
            .get(source_id)
            .map(|c| (c.status(), c.status_message()))
    }

    pub fn is_source_connected(&self, source_id: &SourceId) -> bool {
        self.registry()
            .get(source_id)
            .is_some_and(|c| c.is_connected())
    }

    /// 0-based index of the track playing on a source.
    pub fn current_position(&self, source_id: Option<&SourceId>) -> Option<usize> {
        let source_id = self.resolve_source(source_id).ok()?;
        self.registry().get(&source_id)?.get_current_track_position()
    }

    // Schedule

    /// Re-projects the schedule of a mirror from the track playing now.
    ///
    /// Returns the anchor index, or `None` for local playlists and when
    /// nothing is playing. The anchor's start comes from the client's last
    /// fetched playlist, which still holds the server's time of day.
    pub fn update_schedule(&self, playlist: &SharedPlaylist) -> Result<Option<usize>> {
        let Some(source_id) = playlist.read().source_id().cloned() else {
            return Ok(None);
        };
        let client = self.client(&source_id)?;
        let Some(position) = client.get_current_track_position() else {
            debug!(source = %source_id, "nothing playing, schedule left as is");
            return Ok(None);
        };

        let snapshot = client
            .playlist()
            .ok_or_else(|| SyncError::NotConnected(source_id.to_string()))?;
        let reference = snapshot.tracks.get(position).ok_or_else(|| {
            SyncError::InvalidAnchor(format!("position {} beyond the fetched playlist", position))
        })?;
        let time_of_day = reference.play_time.ok_or_else(|| {
            SyncError::InvalidAnchor(format!("{} has no start time", reference.path))
        })?;

        let mut mirror = playlist.write();
        if mirror.tracks.get(position).map(|t| t.path.as_str()) != Some(reference.path.as_str()) {
            return Err(SyncError::InvalidAnchor(format!(
                "mirror of {} differs from the server at {}",
                source_id, position
            )));
        }
        project_from_time_of_day(&mut mirror.tracks, position, time_of_day, &Local::now())?;
        Ok(Some(position))
    }

    fn refresh_schedule(&self, playlist: &SharedPlaylist) {
        if let Err(err) = self.update_schedule(playlist) {
            debug!(error = %err, "schedule not projected");
        }
    }

    // Edits

    fn refresh_mirror(&self, playlist: &SharedPlaylist, client: &RemoteSourceClient) {
        match client.playlist() {
            Some(fresh) => playlist.write().tracks = fresh.tracks,
            None => warn!(source = %client.source_id(), "no playlist to refresh the mirror from"),
        }
        self.refresh_schedule(playlist);
    }

    fn remote_client_of(&self, playlist: &SharedPlaylist) -> Option<Result<RemoteSourceClient>> {
        let source_id = playlist.read().source_id().cloned()?;
        Some(self.client(&source_id))
    }

    /// Inserts `tracks` at a 0-based index.
    pub fn insert_tracks(&self, playlist: &SharedPlaylist, index: usize, tracks: Vec<Track>) -> bool {
        match self.remote_client_of(playlist) {
            None => {
                playlist.write().insert_tracks(index, tracks);
                true
            }
            Some(Ok(client)) => {
                let ok = client.insert_tracks(&tracks, index);
                self.refresh_mirror(playlist, &client);
                ok
            }
            Some(Err(err)) => {
                warn!(error = %err, "insert on a mirror without client");
                false
            }
        }
    }

    /// Removes the tracks at 0-based `indices`.
    pub fn remove_tracks(&self, playlist: &SharedPlaylist, indices: &[usize]) -> bool {
        match self.remote_client_of(playlist) {
            None => {
                playlist.write().remove_indices(indices);
                true
            }
            Some(Ok(client)) => {
                let ok = client.remove_tracks(indices);
                self.refresh_mirror(playlist, &client);
                ok
            }
            Some(Err(err)) => {
                warn!(error = %err, "remove on a mirror without client");
                false
            }
        }
    }

    /// Moves the tracks at 0-based `indices` to 0-based `new_index`.
    ///
    /// The server's `move` verb counts from 1, so positions are shifted
    /// before being sent.
    pub fn move_tracks(&self, playlist: &SharedPlaylist, indices: &[usize], new_index: usize) -> bool {
        match self.remote_client_of(playlist) {
            None => playlist.write().move_tracks(indices, new_index),
            Some(Ok(client)) => {
                let positions: Vec<usize> = indices.iter().map(|i| i + 1).collect();
                let ok = client.move_tracks(&positions, new_index + 1);
                self.refresh_mirror(playlist, &client);
                ok
            }
            Some(Err(err)) => {
                warn!(error = %err, "move on a mirror without client");
                false
            }
        }
    }

    /// Pushes a locally edited track to the server by removing it and
    /// inserting it again at the same index.
    ///
    /// `queued_index` is where the track was when the edit was made; the
    /// track is looked up again by path before anything is sent. The mirror
    /// is refreshed from the server afterwards, whether or not both steps
    /// succeeded. A failed reinsert is not rolled back.
    pub fn remirror_track(
        &self,
        playlist: &SharedPlaylist,
        track_path: &str,
        queued_index: usize,
    ) -> Result<()> {
        let (source_id, index, track) = {
            let mirror = playlist.read();
            let source_id = mirror
                .source_id()
                .cloned()
                .ok_or_else(|| SyncError::NotConnected(mirror.name_for_display()))?;

            let index = if mirror
                .tracks
                .get(queued_index)
                .is_some_and(|t| t.path == track_path)
            {
                queued_index
            } else {
                match mirror.position_of(track_path) {
                    Some(found) => {
                        warn!(
                            source = %source_id,
                            queued = queued_index,
                            found,
                            "edited track moved before sync"
                        );
                        found
                    }
                    None => {
                        error!(source = %source_id, track = track_path, "edited track not in mirror, sync aborted");
                        return Err(SyncError::TrackNotFound(track_path.to_string()));
                    }
                }
            };
            (source_id, index, mirror.tracks[index].clone())
        };

        let client = self.client(&source_id)?;
        let outcome = if !client.remove_track(index) {
            error!(source = %source_id, pos = index + 1, track = %track, "remote remove failed");
            Err(SyncError::EditFailed(format!(
                "could not remove {} from {}: {}",
                track,
                source_id,
                client.last_error().unwrap_or_default()
            )))
        } else if !client.insert_track(&track, index) {
            error!(source = %source_id, pos = index + 1, track = %track, "remote reinsert failed");
            Err(SyncError::EditFailed(format!(
                "removed {} from {} but could not insert it again: {}",
                track,
                source_id,
                client.last_error().unwrap_or_default()
            )))
        } else {
            info!(source = %source_id, pos = index + 1, track = %track, "track remirrored");
            Ok(())
        };

        self.refresh_mirror(playlist, &client);
        outcome
    }

    // Polling

    /// Folds a polled playlist into the mirror of `source_id`.
    ///
    /// The mirror keeps its identity; its tracks are replaced and its
    /// schedule re-projected. Returns the diff when anything changed.
    pub fn apply_poll_reload(&self, source_id: &SourceId, fresh: &Playlist) -> Option<PlaylistDiff> {
        let mirror = self.store.remote_playlist(source_id)?;
        let (diff, playlist_id) = {
            let mut playlist = mirror.write();
            let diff = PlaylistDiff::compute(&playlist.tracks, &fresh.tracks);
            playlist.tracks = fresh.tracks.clone();
            (diff, playlist.id())
        };
        self.refresh_schedule(&mirror);

        if diff.is_identical {
            debug!(source = %source_id, "poll: no change");
            return None;
        }
        info!(
            source = %source_id,
            inserts = diff.inserts(),
            deletes = diff.deletes(),
            updates = diff.updates(),
            "poll: playlist changed"
        );
        self.changes.broadcast(MirrorChange {
            source_id: source_id.clone(),
            playlist_id,
            diff: diff.clone(),
        });
        Some(diff)
    }

    /// Starts polling `source_id` with the configured interval and keeps its
    /// mirror up to date. Returns `false` when auto-reload is disabled.
    pub fn start_auto_reload(self: &Arc<Self>, source_id: &SourceId) -> Result<bool> {
        let Some(interval) = self.settings.auto_reload else {
            debug!(source = %source_id, "auto-reload disabled");
            return Ok(false);
        };
        let client = self.client(source_id)?;

        let mut observers = self.poll_observers.lock();
        if !observers.contains_key(source_id) {
            let weak: Weak<PlaylistService> = Arc::downgrade(self);
            let source = source_id.clone();
            let id = client.add_reload_observer(move |playlist| {
                if let Some(service) = weak.upgrade() {
                    service.apply_poll_reload(&source, playlist);
                }
            });
            observers.insert(source_id.clone(), id);
        }
        drop(observers);

        client.start_auto_reload(interval);
        Ok(true)
    }

    pub fn stop_auto_reload(&self, source_id: &SourceId) {
        self.detach_poll_observer(source_id);
        if let Some(client) = self.registry().get(source_id) {
            client.stop_auto_reload();
        }
    }

    fn detach_poll_observer(&self, source_id: &SourceId) {
        let observer = self.poll_observers.lock().remove(source_id);
        if let (Some(id), Some(client)) = (observer, self.registry().get(source_id)) {
            client.remove_reload_observer(id);
        }
    }

    // Annotation

    /// Refreshes `exists` and `has_intro` on every track.
    pub fn annotate(&self, playlist: &SharedPlaylist) {
        let mut playlist = playlist.write();
        for track in playlist.tracks.iter_mut() {
            check_if_track_exists(track);
            match &self.settings.intros_dir {
                Some(dir) => check_for_intro(dir, track),
                None => track.has_intro = false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plsconfig::Config;

    #[test]
    fn test_settings_from_config() {
        let config = Config::from_yaml_str(
            "network:\n  auto_reload:\n    enabled: false\npaths:\n  intros_dir: /srv/intros\n",
        )
        .unwrap();
        let settings = ServiceSettings::from_config(&config);
        assert_eq!(settings.intros_dir, Some(PathBuf::from("/srv/intros")));
        assert_eq!(settings.auto_reload, None);
    }
}
