use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::errors::{Result, SyncError};
use crate::m3u;
use crate::model::{Playlist, PlaylistId, SourceId};
use crate::registry::SourceRegistry;
use crate::remote::client::RemoteSourceClient;

/// A playlist shared between the store, the service and its callers.
pub type SharedPlaylist = Arc<RwLock<Playlist>>;

#[derive(Default)]
struct StoreState {
    /// Every open playlist, local and remote, in opening order.
    open: Vec<SharedPlaylist>,
    /// Remote mirrors, at most one per source.
    remote: HashMap<SourceId, SharedPlaylist>,
}

/// Open playlists: file-backed ones deduplicated by path, and one mirror
/// per remote source.
pub struct PlaylistStore {
    registry: Arc<SourceRegistry>,
    state: RwLock<StoreState>,
}

impl PlaylistStore {
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        PlaylistStore {
            registry,
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn open_playlists(&self) -> Vec<SharedPlaylist> {
        self.state.read().open.clone()
    }

    pub fn get(&self, id: PlaylistId) -> Option<SharedPlaylist> {
        self.state
            .read()
            .open
            .iter()
            .find(|p| p.read().id() == id)
            .cloned()
    }

    pub fn remote_playlist(&self, source_id: &SourceId) -> Option<SharedPlaylist> {
        self.state.read().remote.get(source_id).cloned()
    }

    pub fn remote_playlists(&self) -> Vec<(SourceId, SharedPlaylist)> {
        self.state
            .read()
            .remote
            .iter()
            .map(|(id, p)| (id.clone(), Arc::clone(p)))
            .collect()
    }

    /// Client owning `playlist`, if it is a remote mirror of a registered source.
    pub fn client_for(&self, playlist: &Playlist) -> Option<RemoteSourceClient> {
        playlist
            .source_id()
            .and_then(|source_id| self.registry.get(source_id))
    }

    /// Opens a new, unsaved local playlist.
    pub fn create_playlist(&self) -> SharedPlaylist {
        let playlist = Arc::new(RwLock::new(Playlist::new_local(None, Vec::new())));
        self.state.write().open.push(Arc::clone(&playlist));
        playlist
    }

    /// Opens the M3U file at `path`, or returns it if already open.
    pub fn load_local_playlist(&self, path: &Path) -> Result<SharedPlaylist> {
        if let Some(existing) = self.find_local(path) {
            debug!(path = %path.display(), "playlist already open");
            return Ok(existing);
        }

        let playlist = Arc::new(RwLock::new(m3u::load(path)?));
        let mut state = self.state.write();
        // another caller may have opened it while the file was read
        if let Some(existing) = state
            .open
            .iter()
            .find(|p| p.read().path() == Some(path))
        {
            return Ok(Arc::clone(existing));
        }
        state.open.push(Arc::clone(&playlist));
        info!(path = %path.display(), "local playlist opened");
        Ok(playlist)
    }

    fn find_local(&self, path: &Path) -> Option<SharedPlaylist> {
        self.state
            .read()
            .open
            .iter()
            .find(|p| p.read().path() == Some(path))
            .cloned()
    }

    /// Writes playlist `id` to `path`, or to its own path when `None`.
    ///
    /// Saving a local playlist under a new path makes that its path.
    pub fn save_playlist(&self, id: PlaylistId, path: Option<&Path>) -> Result<()> {
        let shared = self
            .get(id)
            .ok_or_else(|| SyncError::PlaylistNotOpen(id.to_string()))?;

        let target = {
            let playlist = shared.read();
            let target = match path {
                Some(path) => path.to_path_buf(),
                None => playlist.path().map(Path::to_path_buf).ok_or_else(|| {
                    SyncError::Io(format!("playlist {} has no file path", id))
                })?,
            };
            m3u::save(&playlist, &target)?;
            target
        };

        let mut playlist = shared.write();
        if !playlist.is_remote() && playlist.path() != Some(target.as_path()) {
            playlist.set_path(target.clone());
        }
        info!(playlist = %id, path = %target.display(), "playlist saved");
        Ok(())
    }

    /// Fetches the playlist of `source_id` and opens it as that source's
    /// mirror, replacing any previous mirror.
    pub fn load_remote_playlist(&self, source_id: &SourceId) -> Result<SharedPlaylist> {
        let client = self
            .registry
            .get(source_id)
            .ok_or_else(|| SyncError::UnknownSource(source_id.to_string()))?;

        let mut playlist = client.try_reload_playlist()?;
        playlist.stamp_remote(source_id.clone());
        let shared = Arc::new(RwLock::new(playlist));

        let mut state = self.state.write();
        if let Some(previous) = state.remote.insert(source_id.clone(), Arc::clone(&shared)) {
            state.open.retain(|p| !Arc::ptr_eq(p, &previous));
        }
        state.open.push(Arc::clone(&shared));
        info!(source = %source_id, tracks = shared.read().len(), "remote playlist opened");
        Ok(shared)
    }

    /// Refetches the playlist of `source_id` into its existing mirror,
    /// keeping the mirror's identity. Opens a mirror if none exists.
    pub fn reload_remote_playlist(&self, source_id: &SourceId) -> Result<SharedPlaylist> {
        let Some(mirror) = self.remote_playlist(source_id) else {
            return self.load_remote_playlist(source_id);
        };
        let client = self
            .registry
            .get(source_id)
            .ok_or_else(|| SyncError::UnknownSource(source_id.to_string()))?;

        let fresh = client.try_reload_playlist()?;
        mirror.write().tracks = fresh.tracks;
        debug!(source = %source_id, "remote playlist refreshed");
        Ok(mirror)
    }

    /// Closes playlist `id`. Closing a remote mirror disconnects its source.
    pub fn close_playlist(&self, id: PlaylistId) -> bool {
        let removed = {
            let mut state = self.state.write();
            let Some(index) = state.open.iter().position(|p| p.read().id() == id) else {
                return false;
            };
            let removed = state.open.remove(index);
            let source_id = removed.read().source_id().cloned();
            if let Some(source_id) = &source_id {
                if state
                    .remote
                    .get(source_id)
                    .is_some_and(|p| Arc::ptr_eq(p, &removed))
                {
                    state.remote.remove(source_id);
                }
            }
            source_id
        };

        if let Some(source_id) = removed {
            match self.registry.get(&source_id) {
                Some(client) => client.disconnect(),
                None => warn!(source = %source_id, "closed mirror of an unregistered source"),
            }
        }
        info!(playlist = %id, "playlist closed");
        true
    }

    /// Closes the mirror of `source_id`, if open.
    pub fn close_remote_playlist(&self, source_id: &SourceId) -> bool {
        match self.remote_playlist(source_id) {
            Some(mirror) => {
                let id = mirror.read().id();
                self.close_playlist(id)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Track;
    use crate::remote::transport::{HttpReply, HttpTransport, Timeouts};
    use std::fs;
    use tempfile::TempDir;

    struct Offline;

    impl HttpTransport for Offline {
        fn get(&self, url: &str, _timeouts: &Timeouts) -> Result<HttpReply> {
            Err(SyncError::ConnectTimeout(url.to_string()))
        }
    }

    fn store() -> PlaylistStore {
        PlaylistStore::new(Arc::new(SourceRegistry::new(Arc::new(Offline))))
    }

    #[test]
    fn test_local_playlists_are_deduplicated_by_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("show.m3u");
        fs::write(&path, "a.mp3\nb.mp3\n").unwrap();

        let store = store();
        let first = store.load_local_playlist(&path).unwrap();
        let second = store.load_local_playlist(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.open_playlists().len(), 1);
    }

    #[test]
    fn test_save_as_sets_path() {
        let dir = TempDir::new().unwrap();
        let store = store();
        let playlist = store.create_playlist();
        playlist.write().tracks.push(Track::new("a.mp3"));
        let id = playlist.read().id();

        assert!(matches!(store.save_playlist(id, None), Err(SyncError::Io(_))));

        let path = dir.path().join("new.m3u");
        store.save_playlist(id, Some(&path)).unwrap();
        assert_eq!(playlist.read().path(), Some(path.as_path()));
        assert!(Arc::ptr_eq(&store.load_local_playlist(&path).unwrap(), &playlist));
    }

    #[test]
    fn test_unknown_source() {
        let store = store();
        assert!(matches!(
            store.load_remote_playlist(&SourceId::from("nope")),
            Err(SyncError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_close_local() {
        let store = store();
        let playlist = store.create_playlist();
        let id = playlist.read().id();
        assert!(store.close_playlist(id));
        assert!(!store.close_playlist(id));
        assert!(store.open_playlists().is_empty());
    }
}
