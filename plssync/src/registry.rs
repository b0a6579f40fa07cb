use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use tracing::info;

use crate::config_ext::SourceCatalog;
use crate::errors::Result;
use crate::events::{SourceEvent, SourceEventBus};
use crate::model::SourceId;
use crate::remote::client::{RemoteSourceClient, SourceSettings};
use crate::remote::transport::{HttpTransport, Timeouts, UreqTransport};

/// What a [`SourceRegistry::reload`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryChanges {
    pub added: Vec<SourceId>,
    pub updated: Vec<SourceId>,
    pub removed: Vec<SourceId>,
}

#[derive(Default)]
struct RegistryState {
    clients: HashMap<SourceId, RemoteSourceClient>,
    order: Vec<SourceId>,
    timeouts: Timeouts,
}

/// Catalog of remote source clients, one per enabled source.
///
/// Reloading updates surviving clients in place, so observers and pollers
/// attached to them keep working. All clients share one transport and one
/// event bus.
pub struct SourceRegistry {
    transport: Arc<dyn HttpTransport>,
    bus: SourceEventBus,
    state: RwLock<RegistryState>,
}

impl SourceRegistry {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        SourceRegistry {
            transport,
            bus: SourceEventBus::new(),
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Registry talking HTTP through `ureq`.
    pub fn with_http() -> Self {
        Self::new(Arc::new(UreqTransport::new()))
    }

    /// Registry populated with the enabled sources of `catalog`.
    pub fn from_catalog(
        catalog: &dyn SourceCatalog,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let registry = Self::new(transport);
        registry.reload(catalog)?;
        Ok(registry)
    }

    /// Creates a client for `id` unless one exists; returns the registered client.
    pub fn register_source(
        &self,
        id: impl Into<SourceId>,
        url: &str,
        name: Option<&str>,
    ) -> RemoteSourceClient {
        let id = id.into();
        let mut state = self.state.write();
        if let Some(existing) = state.clients.get(&id) {
            return existing.clone();
        }

        let timeouts = state.timeouts;
        let client = self.make_client(&id, url, name, timeouts);
        info!(source = %id, name = %client.name(), "remote source registered");
        state.clients.insert(id.clone(), client.clone());
        state.order.push(id);
        client
    }

    fn make_client(
        &self,
        id: &SourceId,
        url: &str,
        name: Option<&str>,
        timeouts: Timeouts,
    ) -> RemoteSourceClient {
        let name = name.filter(|n| !n.is_empty()).unwrap_or(id.as_str());
        RemoteSourceClient::with_event_bus(
            id.clone(),
            SourceSettings::new(url, name).with_timeouts(timeouts),
            Arc::clone(&self.transport),
            self.bus.clone(),
        )
    }

    pub fn get(&self, id: &SourceId) -> Option<RemoteSourceClient> {
        self.state.read().clients.get(id).cloned()
    }

    /// Clients in configuration order.
    pub fn clients(&self) -> Vec<RemoteSourceClient> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.clients.get(id).cloned())
            .collect()
    }

    pub fn connected_clients(&self) -> Vec<RemoteSourceClient> {
        self.clients()
            .into_iter()
            .filter(|c| c.is_connected())
            .collect()
    }

    /// `(id, name)` of every registered source, in configuration order.
    pub fn available_sources(&self) -> Vec<(SourceId, String)> {
        self.clients()
            .into_iter()
            .map(|c| (c.source_id().clone(), c.name()))
            .collect()
    }

    /// First registered source.
    pub fn default_source(&self) -> Option<SourceId> {
        self.state.read().order.first().cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events from every client of this registry, including clients added later.
    pub fn subscribe(&self) -> Receiver<SourceEvent> {
        self.bus.subscribe()
    }

    pub fn disconnect_all(&self) {
        // observers run during disconnect and may call back into the registry
        for client in self.clients() {
            client.disconnect();
        }
    }

    /// Re-reads `catalog`: disabled or removed sources are disconnected and
    /// dropped, surviving ones get their url and name updated in place, new
    /// enabled ones get a fresh client.
    pub fn reload(&self, catalog: &dyn SourceCatalog) -> Result<RegistryChanges> {
        let entries = catalog.remote_sources()?;
        let timeouts = catalog.request_timeouts();
        let enabled: Vec<_> = entries.into_iter().filter(|e| e.enabled).collect();

        let mut changes = RegistryChanges::default();
        let mut dropped = Vec::new();
        {
            let mut state = self.state.write();
            state.timeouts = timeouts;

            let stale: Vec<SourceId> = state
                .clients
                .keys()
                .filter(|id| !enabled.iter().any(|e| &e.id == *id))
                .cloned()
                .collect();
            for id in stale {
                if let Some(client) = state.clients.remove(&id) {
                    dropped.push(client);
                }
                changes.removed.push(id);
            }

            for entry in &enabled {
                match state.clients.get(&entry.id) {
                    Some(existing) => {
                        existing.update_source_config(&entry.url, Some(&entry.name), timeouts);
                        changes.updated.push(entry.id.clone());
                    }
                    None => {
                        let client =
                            self.make_client(&entry.id, &entry.url, Some(&entry.name), timeouts);
                        state.clients.insert(entry.id.clone(), client);
                        changes.added.push(entry.id.clone());
                    }
                }
            }
            state.order = enabled.iter().map(|e| e.id.clone()).collect();
        }

        for client in dropped {
            client.disconnect();
        }
        changes.removed.sort();

        info!(
            added = changes.added.len(),
            updated = changes.updated.len(),
            removed = changes.removed.len(),
            "remote sources reloaded"
        );
        Ok(changes)
    }
}
