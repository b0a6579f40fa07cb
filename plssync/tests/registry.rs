mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use plssync::{ConnectionStatus, SourceEntry, SourceId, SourceRegistry};

use common::{MockTransport, five_tracks};

fn catalog(main_url: &str) -> Vec<SourceEntry> {
    vec![
        SourceEntry::new("104.7", "Main", main_url),
        SourceEntry::new("88.7", "Talk", "http://10.0.0.6:9000/?pass=b"),
    ]
}

#[test]
fn test_reload_updates_clients_in_place() {
    let transport = MockTransport::new(five_tracks());
    let registry = SourceRegistry::new(transport.clone());
    registry.reload(&catalog("http://10.0.0.5:9000/?pass=a")).unwrap();

    let before = registry.get(&SourceId::from("104.7")).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    before.add_status_observer(move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut entries = catalog("http://10.0.0.9:9000/?pass=new");
    entries[0].name = "Main FM".to_string();
    let changes = registry.reload(&entries).unwrap();
    assert!(changes.added.is_empty());
    assert_eq!(changes.updated.len(), 2);

    let after = registry.get(&SourceId::from("104.7")).unwrap();
    assert_eq!(after.url(), "http://10.0.0.9:9000/?pass=new");
    assert_eq!(before.name(), "Main FM");

    after.reload_playlist().unwrap();
    assert!(calls.load(Ordering::SeqCst) >= 1);
    assert!(transport.urls()[0].starts_with("http://10.0.0.9:9000/?pass=new&"));
}

#[test]
fn test_disabled_sources_are_dropped_and_disconnected() {
    let transport = MockTransport::new(five_tracks());
    let registry = SourceRegistry::new(transport.clone());
    registry.reload(&catalog("http://10.0.0.5:9000/?pass=a")).unwrap();

    let talk = registry.get(&SourceId::from("88.7")).unwrap();
    talk.reload_playlist().unwrap();
    assert!(talk.is_connected());

    let mut entries = catalog("http://10.0.0.5:9000/?pass=a");
    entries[1] = entries[1].clone().disabled();
    let changes = registry.reload(&entries).unwrap();
    assert_eq!(changes.removed, vec![SourceId::from("88.7")]);

    assert!(registry.get(&SourceId::from("88.7")).is_none());
    assert_eq!(talk.status(), ConnectionStatus::Disconnected);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_registry_bus_sees_every_client() {
    let transport = MockTransport::new(five_tracks());
    let registry = SourceRegistry::new(transport);
    let events = registry.subscribe();
    registry.reload(&catalog("http://10.0.0.5:9000/?pass=a")).unwrap();

    for client in registry.clients() {
        client.reload_playlist().unwrap();
    }
    let mut sources: Vec<String> = events
        .try_iter()
        .map(|e| e.source_id().to_string())
        .collect();
    sources.dedup();
    assert_eq!(sources, vec!["104.7", "88.7"]);
    assert_eq!(registry.connected_clients().len(), 2);
}
