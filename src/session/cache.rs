//! Per-host session cache
//!
//! Maps a [`Fingerprint`] of the connection parameters to a live
//! [`SessionHandle`]. Entries older than the TTL are closed and recreated on
//! lookup. Lookups for the same fingerprint are serialized so only one
//! caller ever connects.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

use super::establish::ConnectionEstablisher;
use super::handle::SessionHandle;
use super::probe::{PingProbe, ReachabilityProbe};
use crate::config::{ConnectionParameters, Fingerprint, SessionSettings};
use crate::error::SessionError;
use crate::ssh::Transport;

struct CacheEntry {
    handle: Arc<SessionHandle>,
    created_at: Instant,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Session cache with TTL eviction
pub struct SessionCache {
    establisher: Arc<ConnectionEstablisher>,
    probe: Arc<dyn ReachabilityProbe>,
    entries: DashMap<Fingerprint, Slot>,
}

impl SessionCache {
    pub fn new(transport: Arc<dyn Transport>, settings: SessionSettings) -> Self {
        Self {
            establisher: Arc::new(ConnectionEstablisher::new(transport, settings)),
            probe: Arc::new(PingProbe::new()),
            entries: DashMap::new(),
        }
    }

    /// Use a different reachability probe for the handles this cache creates
    pub fn with_probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn settings(&self) -> &SessionSettings {
        self.establisher.settings()
    }

    /// Cached session with the configured TTL
    pub async fn get_session(
        &self,
        params: &ConnectionParameters,
    ) -> Result<Arc<SessionHandle>, SessionError> {
        self.get_or_create(params, self.settings().ttl()).await
    }

    /// Return the live session for `params`, creating it if missing or
    /// older than `ttl`
    pub async fn get_or_create(
        &self,
        params: &ConnectionParameters,
        ttl: Duration,
    ) -> Result<Arc<SessionHandle>, SessionError> {
        let key = params.fingerprint();
        let (cell, mut slot) = loop {
            let cell = self.entries.entry(key).or_default().clone();
            let slot = cell.clone().lock_owned().await;
            // A slot that left the map meanwhile belongs to a failed
            // connect or an eviction; start over with a fresh one
            if self.is_current(&key, &cell) {
                break (cell, slot);
            }
        };
        let now = Instant::now();

        if let Some(entry) = slot.as_ref() {
            if now.duration_since(entry.created_at) <= ttl {
                info!("Reusing existing session for {}", params.address());
                entry.handle.reset_buffers().await;
                return Ok(entry.handle.clone());
            }

            info!("Recreating session for {} (expired)", params.address());
            if let Some(expired) = slot.take() {
                expired.handle.close().await;
            }
        }

        let handle = match SessionHandle::connect(
            params.clone(),
            None,
            self.establisher.clone(),
            self.probe.clone(),
        )
        .await
        {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                self.entries.remove_if(&key, |_, current| Arc::ptr_eq(current, &cell));
                return Err(e);
            }
        };

        *slot = Some(CacheEntry {
            handle: handle.clone(),
            created_at: now,
        });

        info!(
            "Created new session {} for {} (key {})",
            handle.id(),
            params.address(),
            key
        );
        Ok(handle)
    }

    fn is_current(&self, key: &Fingerprint, cell: &Slot) -> bool {
        self.entries
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current.value(), cell))
    }

    /// Close and evict the session for `params`
    pub async fn remove(&self, params: &ConnectionParameters) -> bool {
        let Some((_, slot)) = self.entries.remove(&params.fingerprint()) else {
            return false;
        };
        let entry = slot.lock().await.take();
        match entry {
            Some(entry) => {
                entry.handle.close().await;
                true
            }
            None => false,
        }
    }

    /// Close and evict every session
    pub async fn close_all(&self) {
        let slots: Vec<Slot> = self.entries.iter().map(|e| e.value().clone()).collect();
        self.entries.clear();

        info!("Closing {} cached sessions", slots.len());
        for slot in slots {
            let entry = slot.lock().await.take();
            if let Some(entry) = entry {
                entry.handle.close().await;
            }
        }
    }

    /// Number of cached sessions; slots being filled right now count too
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
