mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use plssync::time_utils::{DAY_SECONDS, WEEK_SECONDS};
use plssync::{
    ConnectionStatus, PlaylistService, ServiceSettings, SharedPlaylist, SourceId, SourceRegistry,
    SyncError, Track,
};
use tempfile::TempDir;

use common::{BASE_URL, MockTransport, five_tracks, playlist_xml};

fn service(transport: &Arc<MockTransport>, settings: ServiceSettings) -> Arc<PlaylistService> {
    let registry = Arc::new(SourceRegistry::new(transport.clone()));
    registry.register_source("104.7", BASE_URL, Some("WXYZ"));
    Arc::new(PlaylistService::new(registry, settings))
}

fn paths(playlist: &SharedPlaylist) -> Vec<String> {
    playlist.read().tracks.iter().map(|t| t.path.clone()).collect()
}

fn source() -> SourceId {
    SourceId::from("104.7")
}

#[test]
fn test_load_projects_schedule_from_playing_track() {
    let transport = MockTransport::new(five_tracks());
    transport.set_playing(3);
    let service = service(&transport, ServiceSettings::default());

    let mirror = service.load_remote_playlist(None).unwrap();
    assert!(mirror.read().is_remote());
    assert_eq!(mirror.read().source_id(), Some(&source()));

    let times: Vec<u32> = mirror
        .read()
        .tracks
        .iter()
        .map(|t| t.play_time.unwrap())
        .collect();
    assert_eq!(times[2] % DAY_SECONDS, 14 * 3600 + 6 * 60);
    assert_eq!(times[1], (times[2] + WEEK_SECONDS - 180) % WEEK_SECONDS);
    assert_eq!(times[0], (times[2] + WEEK_SECONDS - 360) % WEEK_SECONDS);
    assert_eq!(times[3], (times[2] + 180) % WEEK_SECONDS);
    assert_eq!(times[4], (times[2] + 360) % WEEK_SECONDS);

    // the client cache keeps the server's time of day
    let raw = service.registry().get(&source()).unwrap().playlist().unwrap();
    assert_eq!(raw.tracks[2].play_time, Some(14 * 3600 + 6 * 60));
}

#[test]
fn test_nothing_playing_leaves_schedule_alone() {
    let transport = MockTransport::new(five_tracks());
    let service = service(&transport, ServiceSettings::default());

    let mirror = service.load_remote_playlist(Some(&source())).unwrap();
    assert_eq!(service.update_schedule(&mirror).unwrap(), None);
    assert_eq!(service.current_position(None), None);
}

#[test]
fn test_unknown_source() {
    let transport = MockTransport::new(five_tracks());
    let service = service(&transport, ServiceSettings::default());
    assert!(matches!(
        service.load_remote_playlist(Some(&SourceId::from("nope"))),
        Err(SyncError::UnknownSource(_))
    ));
    assert!(service.source_status(&SourceId::from("nope")).is_none());
}

#[test]
fn test_reload_keeps_mirror_identity() {
    let transport = MockTransport::new(five_tracks());
    let service = service(&transport, ServiceSettings::default());
    let mirror = service.load_remote_playlist(None).unwrap();
    let id = mirror.read().id();

    transport.set_playlist(playlist_xml(&[("z.mp3", "1:00", "15:00:00")]));
    let reloaded = service.reload_remote_playlist(None).unwrap();
    assert!(Arc::ptr_eq(&mirror, &reloaded));
    assert_eq!(reloaded.read().id(), id);
    assert_eq!(paths(&mirror), vec!["z.mp3"]);
}

#[test]
fn test_remirror_track_removes_then_reinserts() {
    let transport = MockTransport::new(five_tracks());
    let service = service(&transport, ServiceSettings::default());
    let mirror = service.load_remote_playlist(None).unwrap();
    transport.clear();

    service.remirror_track(&mirror, "c.mp3", 2).unwrap();
    assert_eq!(
        transport.edits(),
        vec!["action=delete&pos=3", "action=inserttrack&pos=3&filename=c.mp3"]
    );
}

#[test]
fn test_remirror_track_finds_moved_track() {
    let transport = MockTransport::new(five_tracks());
    let service = service(&transport, ServiceSettings::default());
    let mirror = service.load_remote_playlist(None).unwrap();
    transport.clear();

    service.remirror_track(&mirror, "d.mp3", 0).unwrap();
    assert_eq!(
        transport.edits(),
        vec!["action=delete&pos=4", "action=inserttrack&pos=4&filename=d.mp3"]
    );
}

#[test]
fn test_remirror_missing_track_sends_nothing() {
    let transport = MockTransport::new(five_tracks());
    let service = service(&transport, ServiceSettings::default());
    let mirror = service.load_remote_playlist(None).unwrap();
    transport.clear();

    assert_eq!(
        service.remirror_track(&mirror, "gone.mp3", 1),
        Err(SyncError::TrackNotFound("gone.mp3".to_string()))
    );
    assert!(transport.urls().is_empty());
}

#[test]
fn test_remirror_reports_failed_reinsert() {
    let transport = MockTransport::new(five_tracks());
    let service = service(&transport, ServiceSettings::default());
    let mirror = service.load_remote_playlist(None).unwrap();
    transport.clear();

    transport.fail_next_verb("inserttrack", SyncError::ReadTimeout("10.0.0.5".into()));
    let err = service.remirror_track(&mirror, "b.mp3", 1).unwrap_err();
    match err {
        SyncError::EditFailed(message) => {
            assert!(message.contains("could not insert it again"));
            assert!(message.contains("read timeout"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    let client = service.registry().get(&source()).unwrap();
    assert_eq!(client.last_error().as_deref(), Some("read timeout"));
    // the mirror still reflects what the server returned
    assert_eq!(paths(&mirror).len(), 5);
}

#[test]
fn test_remote_edits_go_through_the_server() {
    let transport = MockTransport::new(five_tracks());
    let service = service(&transport, ServiceSettings::default());
    let mirror = service.load_remote_playlist(None).unwrap();
    transport.clear();

    assert!(service.move_tracks(&mirror, &[2, 3], 0));
    assert!(service.remove_tracks(&mirror, &[1]));
    assert!(service.insert_tracks(&mirror, 0, vec![Track::new("new.mp3")]));
    assert_eq!(
        transport.edits(),
        vec![
            "action=move&pos1=3&pos2=1",
            "action=move&pos1=4&pos2=2",
            "action=delete&pos=2",
            "action=inserttrack&pos=1&filename=new.mp3",
        ]
    );
    // the mock server ignores edits, so the mirror matches it unchanged
    assert_eq!(paths(&mirror), vec!["a.mp3", "b.mp3", "c.mp3", "d.mp3", "e.mp3"]);
}

#[test]
fn test_local_edits_stay_local() {
    let transport = MockTransport::new(five_tracks());
    let service = service(&transport, ServiceSettings::default());
    let local = service.create_playlist();

    assert!(service.insert_tracks(
        &local,
        0,
        vec![Track::new("a"), Track::new("b"), Track::new("c")]
    ));
    assert!(service.move_tracks(&local, &[2], 0));
    assert_eq!(paths(&local), vec!["c", "a", "b"]);
    assert!(service.remove_tracks(&local, &[0]));
    assert_eq!(paths(&local), vec!["a", "b"]);

    assert_eq!(service.update_schedule(&local).unwrap(), None);
    assert!(transport.urls().is_empty());
}

#[test]
fn test_apply_poll_reload_diffs_in_place() {
    let transport = MockTransport::new(five_tracks());
    let service = service(&transport, ServiceSettings::default());
    let mirror = service.load_remote_playlist(None).unwrap();
    let changes = service.subscribe_changes();
    let client = service.registry().get(&source()).unwrap();

    let unchanged = client.reload_playlist().unwrap();
    assert!(service.apply_poll_reload(&source(), &unchanged).is_none());

    transport.set_playlist(playlist_xml(&[
        ("a.mp3", "3:00", "14:00:00"),
        ("c.mp3", "3:00", "14:03:00"),
        ("d.mp3", "3:00", "14:06:00"),
        ("e.mp3", "3:00", "14:09:00"),
        ("f.mp3", "2:00", "14:12:00"),
    ]));
    let fresh = client.reload_playlist().unwrap();
    let diff = service.apply_poll_reload(&source(), &fresh).unwrap();
    assert_eq!(diff.deletes(), 1);
    assert_eq!(diff.inserts(), 1);
    assert_eq!(paths(&mirror), vec!["a.mp3", "c.mp3", "d.mp3", "e.mp3", "f.mp3"]);

    let change = changes.try_recv().unwrap();
    assert_eq!(change.source_id, source());
    assert_eq!(change.playlist_id, mirror.read().id());
    assert!(changes.try_recv().is_err());
}

#[test]
fn test_auto_reload_follows_the_server() {
    let transport = MockTransport::new(five_tracks());
    let service = service(
        &transport,
        ServiceSettings {
            intros_dir: None,
            auto_reload: Some(Duration::from_millis(20)),
        },
    );
    let mirror = service.load_remote_playlist(None).unwrap();
    let changes = service.subscribe_changes();

    assert!(service.start_auto_reload(&source()).unwrap());
    transport.set_playlist(playlist_xml(&[("z.mp3", "1:00", "15:00:00")]));

    let change = changes.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(change.source_id, source());
    service.stop_auto_reload(&source());
    assert_eq!(paths(&mirror), vec!["z.mp3"]);
}

#[test]
fn test_auto_reload_disabled() {
    let transport = MockTransport::new(five_tracks());
    let service = service(&transport, ServiceSettings::default());
    assert!(!service.start_auto_reload(&source()).unwrap());
    assert!(!service.registry().get(&source()).unwrap().is_auto_reloading());
}

#[test]
fn test_close_remote_playlist_disconnects() {
    let transport = MockTransport::new(five_tracks());
    let service = service(&transport, ServiceSettings::default());
    service.load_remote_playlist(None).unwrap();
    assert!(service.is_source_connected(&source()));

    assert!(service.close_remote_playlist(None));
    assert!(!service.close_remote_playlist(None));
    assert_eq!(
        service.source_status(&source()),
        Some((ConnectionStatus::Disconnected, "Disconnected from WXYZ".to_string()))
    );
    assert!(service.store().remote_playlist(&source()).is_none());
}

#[test]
fn test_annotate_flags_tracks() {
    let dir = TempDir::new().unwrap();
    let intros = dir.path().join("intros");
    fs::create_dir(&intros).unwrap();
    fs::write(intros.join("the band - intro.mp3"), b"").unwrap();
    let song = dir.path().join("song.mp3");
    fs::write(&song, b"").unwrap();

    let transport = MockTransport::new(five_tracks());
    let service = service(
        &transport,
        ServiceSettings {
            intros_dir: Some(intros),
            auto_reload: None,
        },
    );
    let local = service.create_playlist();
    service.insert_tracks(
        &local,
        0,
        vec![
            Track::with_metadata(song.to_string_lossy(), "The Band", "Song", Some(200)),
            Track::with_metadata("/nowhere/x.mp3", "Other", "X", None),
        ],
    );

    service.annotate(&local);
    let playlist = local.read();
    assert!(playlist.tracks[0].exists);
    assert!(playlist.tracks[0].has_intro);
    assert!(!playlist.tracks[1].exists);
    assert!(!playlist.tracks[1].has_intro);
}
