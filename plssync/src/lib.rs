//! # plssync
//!
//! Mirrors the playlists of remote radio-automation servers and keeps them
//! in sync: every source is polled over HTTP, edits made on a mirror are
//! sent back as `action=` requests, and the start time of every track is
//! projected from the track currently on air.
//!
//! ```no_run
//! use std::sync::Arc;
//! use plssync::{PlaylistService, ServiceSettings, SourceRegistry, UreqTransport};
//!
//! let config = plsconfig::Config::load_config("")?;
//! let registry = Arc::new(SourceRegistry::from_catalog(&config, Arc::new(UreqTransport::new()))?);
//! let service = Arc::new(PlaylistService::new(registry, ServiceSettings::from_config(&config)));
//!
//! let mirror = service.load_remote_playlist(None)?;
//! for track in &mirror.read().tracks {
//!     println!("{}", track);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config_ext;
pub mod diff;
pub mod errors;
pub mod events;
pub mod m3u;
pub mod model;
pub mod registry;
pub mod remote;
pub mod schedule;
pub mod service;
pub mod store;
pub mod time_utils;
pub mod track_utils;

pub use config_ext::{SourceCatalog, SourceEntry, SyncConfigExt};
pub use diff::{PlaylistDiff, TrackChange};
pub use errors::{Result, SyncError};
pub use events::{EventBus, ObserverId, SourceEvent, SourceEventBus};
pub use model::{ConnectionStatus, Playlist, PlaylistId, PlaylistKind, SourceId, Track};
pub use registry::{RegistryChanges, SourceRegistry};
pub use remote::{HttpReply, HttpTransport, RemoteSourceClient, SourceSettings, Timeouts, UreqTransport};
pub use service::{MirrorChange, PlaylistService, ServiceSettings};
pub use store::{PlaylistStore, SharedPlaylist};
