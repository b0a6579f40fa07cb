use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, info, warn};

use crate::errors::{Result, SyncError};
use crate::events::{
    ObserverId, ObserverList, ReloadObserver, SourceEvent, SourceEventBus, StatusObserver,
    call_observer,
};
use crate::model::{ConnectionStatus, Playlist, SourceId, Track};
use crate::remote::transport::{HttpTransport, Timeouts};
use crate::remote::wire::{self, Action};

/// How long `stop_auto_reload` waits for the poller thread to exit.
const POLLER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Where and how to reach one automation server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    /// Base URL including the `pass` token, e.g. `http://10.0.0.5:9000/?pass=xyz`.
    pub url: String,
    pub name: String,
    pub timeouts: Timeouts,
}

impl SourceSettings {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        SourceSettings {
            url: url.into(),
            name: name.into(),
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

#[derive(Debug, Default)]
struct StatusState {
    status: ConnectionStatus,
    message: String,
    last_error: Option<String>,
}

struct Poller {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

struct ClientInner {
    source_id: SourceId,
    settings: RwLock<SourceSettings>,
    transport: Arc<dyn HttpTransport>,
    state: Mutex<StatusState>,
    /// Held across a status update and its notifications.
    notify: ReentrantMutex<()>,
    /// Bumped by `disconnect`; requests started under an older value are discarded.
    epoch: AtomicU64,
    playlist: RwLock<Option<Playlist>>,
    status_observers: ObserverList<StatusObserver>,
    reload_observers: ObserverList<ReloadObserver>,
    bus: SourceEventBus,
    poller: Mutex<Option<Poller>>,
}

/// Connection to one remote automation server.
///
/// Cloning is cheap and every clone drives the same connection, status and
/// cached playlist. The cache is only ever replaced by a playlist fetched
/// from the server; write operations refetch it after the request.
#[derive(Clone)]
pub struct RemoteSourceClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for RemoteSourceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSourceClient")
            .field("source_id", &self.inner.source_id)
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

impl RemoteSourceClient {
    pub fn new(
        source_id: impl Into<SourceId>,
        settings: SourceSettings,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self::with_event_bus(source_id, settings, transport, SourceEventBus::new())
    }

    /// Like [`RemoteSourceClient::new`], publishing events on a shared bus.
    pub fn with_event_bus(
        source_id: impl Into<SourceId>,
        settings: SourceSettings,
        transport: Arc<dyn HttpTransport>,
        bus: SourceEventBus,
    ) -> Self {
        RemoteSourceClient {
            inner: Arc::new(ClientInner {
                source_id: source_id.into(),
                settings: RwLock::new(settings),
                transport,
                state: Mutex::new(StatusState::default()),
                notify: ReentrantMutex::new(()),
                epoch: AtomicU64::new(0),
                playlist: RwLock::new(None),
                status_observers: ObserverList::new(),
                reload_observers: ObserverList::new(),
                bus,
                poller: Mutex::new(None),
            }),
        }
    }

    pub fn source_id(&self) -> &SourceId {
        &self.inner.source_id
    }

    pub fn name(&self) -> String {
        self.inner.settings.read().name.clone()
    }

    pub fn url(&self) -> String {
        self.inner.settings.read().url.clone()
    }

    pub fn timeouts(&self) -> Timeouts {
        self.inner.settings.read().timeouts
    }

    /// Replaces url, name and timeouts without touching observers or the poller.
    /// An empty or missing name keeps the current one.
    pub fn update_source_config(&self, url: &str, name: Option<&str>, timeouts: Timeouts) {
        let mut settings = self.inner.settings.write();
        settings.url = url.to_string();
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            settings.name = name.to_string();
        }
        settings.timeouts = timeouts;
        debug!(source = %self.inner.source_id, "source settings updated");
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    pub fn status_message(&self) -> String {
        self.inner.state.lock().message.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// The playlist fetched by the last successful reload.
    pub fn playlist(&self) -> Option<Playlist> {
        self.inner.playlist.read().clone()
    }

    /// Observers called on every status change, in the order the changes
    /// were applied.
    ///
    /// Notifications are serialized per client: an observer runs while other
    /// threads wait to publish the next change, so it must not block on a
    /// thread that is itself talking to this client.
    pub fn add_status_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&SourceId, ConnectionStatus, &str) + Send + Sync + 'static,
    {
        self.inner.status_observers.add(Arc::new(observer))
    }

    pub fn remove_status_observer(&self, id: ObserverId) -> bool {
        self.inner.status_observers.remove(id)
    }

    /// Observers called with each playlist fetched by the background poller.
    pub fn add_reload_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Playlist) + Send + Sync + 'static,
    {
        self.inner.reload_observers.add(Arc::new(observer))
    }

    pub fn remove_reload_observer(&self, id: ObserverId) -> bool {
        self.inner.reload_observers.remove(id)
    }

    /// Channel receiving this client's status changes and polled playlists.
    pub fn subscribe(&self) -> Receiver<SourceEvent> {
        self.inner.bus.subscribe()
    }

    fn current_epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: ConnectionStatus, message: String) {
        self.update_status(None, status, message);
    }

    /// Applies a status on behalf of a request started at `epoch`; dropped
    /// when a disconnect happened since.
    fn set_status_at(&self, epoch: u64, status: ConnectionStatus, message: String) {
        self.update_status(Some(epoch), status, message);
    }

    fn update_status(&self, epoch: Option<u64>, status: ConnectionStatus, message: String) {
        let _notify = self.inner.notify.lock();
        let changed = {
            let mut state = self.inner.state.lock();
            if epoch.is_some_and(|e| e != self.current_epoch()) {
                return;
            }
            let old = state.status;
            state.status = status;
            state.message = message.clone();
            if status.is_failure() {
                state.last_error = Some(message.clone());
            }
            old != status
        };
        if !changed {
            return;
        }

        let source_id = &self.inner.source_id;
        info!(source = %source_id, %status, message = %message, "connection status changed");
        for observer in self.inner.status_observers.snapshot() {
            call_observer("status", source_id, || observer(source_id, status, &message));
        }
        self.inner.bus.broadcast(SourceEvent::StatusChanged {
            source_id: source_id.clone(),
            status,
            message,
        });
    }

    fn notify_reload(&self, playlist: &Playlist) {
        let source_id = &self.inner.source_id;
        for observer in self.inner.reload_observers.snapshot() {
            call_observer("reload", source_id, || observer(playlist));
        }
        self.inner.bus.broadcast(SourceEvent::PlaylistReloaded {
            source_id: source_id.clone(),
            playlist: playlist.clone(),
        });
    }

    /// One request/response cycle driving the status machine.
    ///
    /// The client is `Connected` only once `parse` accepted the body.
    fn exchange<T>(
        &self,
        action: Action<'_>,
        show_connecting: bool,
        parse: impl FnOnce(&str) -> Result<T>,
    ) -> Result<T> {
        self.exchange_at(self.current_epoch(), action, show_connecting, parse)
    }

    /// Like `exchange`, for a request belonging to `epoch`. A disconnect
    /// while the request is in flight turns the outcome into
    /// [`SyncError::Aborted`] and leaves the status alone.
    fn exchange_at<T>(
        &self,
        epoch: u64,
        action: Action<'_>,
        show_connecting: bool,
        parse: impl FnOnce(&str) -> Result<T>,
    ) -> Result<T> {
        let (url, name, timeouts) = {
            let settings = self.inner.settings.read();
            (
                wire::request_url(&settings.url, &action),
                settings.name.clone(),
                settings.timeouts,
            )
        };
        debug!(
            source = %self.inner.source_id,
            action = action.verb(),
            url = %wire::redact_url(&url),
            "sending request"
        );

        if show_connecting {
            self.set_status_at(
                epoch,
                ConnectionStatus::Connecting,
                format!("Connecting to {}...", name),
            );
        }

        let outcome = self
            .inner
            .transport
            .get(&url, &timeouts)
            .and_then(|reply| match reply.status {
                200 => parse(&reply.body),
                code => Err(SyncError::Server(code)),
            });

        if epoch != self.current_epoch() {
            debug!(
                source = %self.inner.source_id,
                action = action.verb(),
                "discarding reply received after disconnect"
            );
            return Err(SyncError::Aborted(self.inner.source_id.to_string()));
        }

        match outcome {
            Ok(value) => {
                self.set_status_at(
                    epoch,
                    ConnectionStatus::Connected,
                    format!("Connected to {}", name),
                );
                Ok(value)
            }
            Err(err) => {
                warn!(
                    source = %self.inner.source_id,
                    action = action.verb(),
                    error = %err,
                    "request failed"
                );
                let status = err.connection_status().unwrap_or(ConnectionStatus::Error);
                self.set_status_at(epoch, status, err.status_message());
                Err(err)
            }
        }
    }

    fn fetch_playlist(&self, show_connecting: bool) -> Result<Playlist> {
        let epoch = self.current_epoch();
        let tracks =
            self.exchange_at(epoch, Action::GetPlaylist, show_connecting, wire::parse_playlist)?;
        let playlist = Playlist::new_remote(self.inner.source_id.clone(), tracks);
        {
            let mut cache = self.inner.playlist.write();
            if epoch != self.current_epoch() {
                return Err(SyncError::Aborted(self.inner.source_id.to_string()));
            }
            *cache = Some(playlist.clone());
        }
        debug!(
            source = %self.inner.source_id,
            tracks = playlist.len(),
            "playlist reloaded"
        );
        Ok(playlist)
    }

    /// Fetches the full playlist and replaces the cache.
    pub fn try_reload_playlist(&self) -> Result<Playlist> {
        self.fetch_playlist(true)
    }

    /// Fetches the full playlist and replaces the cache; `None` on failure,
    /// with the reason in [`RemoteSourceClient::last_error`].
    pub fn reload_playlist(&self) -> Option<Playlist> {
        self.try_reload_playlist().ok()
    }

    /// 0-based index of the playing track, or `None` when nothing plays or
    /// the request failed.
    pub fn get_current_track_position(&self) -> Option<usize> {
        self.exchange(Action::PlaybackInfo, false, wire::parse_playback_position)
            .ok()
            .flatten()
    }

    /// The playing track from the cached playlist.
    ///
    /// `None` when the server's position does not fit the cache, which
    /// happens when the cache is stale.
    pub fn get_current_track(&self) -> Option<Track> {
        let position = self.get_current_track_position()?;
        self.inner
            .playlist
            .read()
            .as_ref()
            .and_then(|playlist| playlist.tracks.get(position).cloned())
    }

    fn write_request(&self, action: Action<'_>) -> bool {
        self.exchange(action, true, |_| Ok(())).is_ok()
    }

    fn resync(&self) {
        if let Err(err) = self.try_reload_playlist() {
            warn!(source = %self.inner.source_id, error = %err, "reload after edit failed");
        }
    }

    /// Inserts one track at a 0-based index, then reloads.
    pub fn insert_track(&self, track: &Track, index: usize) -> bool {
        let ok = self.write_request(Action::InsertTrack {
            pos: index + 1,
            filename: &track.path,
        });
        if ok {
            self.resync();
        }
        ok
    }

    /// Inserts tracks one by one from a 0-based index, keeping their order.
    /// `true` only if every insert succeeded.
    pub fn insert_tracks(&self, tracks: &[Track], index: usize) -> bool {
        let mut all_ok = true;
        for (offset, track) in tracks.iter().enumerate() {
            all_ok &= self.insert_track(track, index + offset);
        }
        all_ok
    }

    /// Removes the track at a 0-based index, then reloads.
    pub fn remove_track(&self, index: usize) -> bool {
        let ok = self.write_request(Action::Delete { pos: index + 1 });
        if ok {
            self.resync();
        }
        ok
    }

    /// Removes tracks from the highest index down so that the remaining
    /// indices stay valid. `true` only if every delete succeeded.
    pub fn remove_tracks(&self, indices: &[usize]) -> bool {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        let mut all_ok = true;
        for index in sorted {
            all_ok &= self.remove_track(index);
        }
        all_ok
    }

    /// Moves a block of tracks to `new_index`.
    ///
    /// Indices are sent as `pos1`/`pos2` without translation. Moving up sends
    /// one `move` per track to consecutive destinations; moving down sends
    /// the same `(first, new_index + count - 1)` pair once per track, relying
    /// on the server shifting the block after each move. A failed request
    /// stops the sequence; nothing is rolled back.
    pub fn move_tracks(&self, indices: &[usize], new_index: usize) -> bool {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        let Some(&first) = sorted.first() else {
            return false;
        };
        if new_index == first {
            return false;
        }

        let moves: Vec<(usize, usize)> = if new_index < first {
            sorted
                .iter()
                .enumerate()
                .map(|(offset, &pos1)| (pos1, new_index + offset))
                .collect()
        } else {
            let pos2 = new_index + sorted.len() - 1;
            vec![(first, pos2); sorted.len()]
        };

        let mut sent = 0;
        for &(pos1, pos2) in &moves {
            if !self.write_request(Action::Move { pos1, pos2 }) {
                break;
            }
            sent += 1;
        }
        if sent > 0 {
            self.resync();
        }
        sent == moves.len()
    }

    /// Starts the background poller; a no-op returning `false` while one runs.
    ///
    /// The poller reloads immediately, then every `interval`, without the
    /// transient `Connecting` status, and hands each fetched playlist to the
    /// reload observers. Failed iterations are logged and skipped.
    pub fn start_auto_reload(&self, interval: Duration) -> bool {
        let mut guard = self.inner.poller.lock();
        if guard.as_ref().is_some_and(|p| !p.handle.is_finished()) {
            return false;
        }

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (done_tx, done_rx) = bounded::<()>(1);
        let weak = Arc::downgrade(&self.inner);

        let spawned = thread::Builder::new()
            .name(format!("poll-{}", self.inner.source_id))
            .spawn(move || {
                poll_loop(weak, stop_rx, interval);
                drop(done_tx);
            });

        match spawned {
            Ok(handle) => {
                info!(
                    source = %self.inner.source_id,
                    interval_secs = interval.as_secs_f64(),
                    "auto-reload started"
                );
                *guard = Some(Poller {
                    stop_tx,
                    done_rx,
                    handle,
                });
                true
            }
            Err(err) => {
                warn!(source = %self.inner.source_id, error = %err, "cannot spawn poller thread");
                false
            }
        }
    }

    /// Stops the poller, waiting a bounded time for it to exit. Idempotent.
    pub fn stop_auto_reload(&self) {
        let Some(poller) = self.inner.poller.lock().take() else {
            return;
        };
        drop(poller.stop_tx);

        // called from an observer running on the poller itself
        if poller.handle.thread().id() == thread::current().id() {
            return;
        }

        match poller.done_rx.recv_timeout(POLLER_JOIN_TIMEOUT) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    source = %self.inner.source_id,
                    "poller still busy after stop, detaching"
                );
            }
            _ => {
                let _ = poller.handle.join();
                info!(source = %self.inner.source_id, "auto-reload stopped");
            }
        }
    }

    pub fn is_auto_reloading(&self) -> bool {
        self.inner
            .poller
            .lock()
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished())
    }

    /// Stops polling, drops the cached playlist and forces `Disconnected`.
    ///
    /// Requests still in flight, including a poll the bounded join gave up
    /// on, can no longer change the status or the cache.
    pub fn disconnect(&self) {
        self.stop_auto_reload();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let name = self.name();
        self.set_status(
            ConnectionStatus::Disconnected,
            format!("Disconnected from {}", name),
        );
        *self.inner.playlist.write() = None;
    }

    fn poll_once(&self, stop_rx: &Receiver<()>) {
        match self.fetch_playlist(false) {
            Ok(playlist) => {
                // a stop requested during the request wins over the result
                if matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                    self.notify_reload(&playlist);
                }
            }
            Err(SyncError::Aborted(_)) => {
                debug!(source = %self.inner.source_id, "poll abandoned after disconnect");
            }
            Err(err) => {
                warn!(source = %self.inner.source_id, error = %err, "auto-reload failed");
            }
        }
    }
}

fn poll_loop(weak: Weak<ClientInner>, stop_rx: Receiver<()>, interval: Duration) {
    loop {
        {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let client = RemoteSourceClient { inner };
            if catch_unwind(AssertUnwindSafe(|| client.poll_once(&stop_rx))).is_err() {
                warn!(source = %client.source_id(), "auto-reload iteration panicked");
            }
        }

        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            _ => return,
        }
    }
}
