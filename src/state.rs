//! Shared application state.
//!
//! One [`AppState`] is built at startup and shared by every connection
//! task. Besides configuration it owns the session registry (the only
//! cross-connection mutable structure), the pipeline collaborator set, the
//! audio artifact store, and the WebSocket connection counters backing the
//! connection-limit middleware.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::config::ServerConfig;
use crate::core::audio_store::AudioStore;
use crate::core::pipeline::{PipelineEngines, PipelineInitError};
use crate::core::session::SessionRegistry;

/// Why a connection attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    /// The global WebSocket connection cap is reached.
    GlobalLimitReached,
    /// This IP already holds its maximum number of connections.
    PerIpLimitReached,
}

pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<SessionRegistry>,
    pub engines: Arc<PipelineEngines>,
    pub audio_store: AudioStore,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, usize>,
}

impl AppState {
    /// Build the state with the collaborator providers named by `config`.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, PipelineInitError> {
        let engines = PipelineEngines::from_config(&config)?;
        Ok(Self::with_engines(config, engines))
    }

    /// Build the state around an explicit collaborator set (used by tests
    /// to substitute in-process fakes).
    pub fn with_engines(config: ServerConfig, engines: PipelineEngines) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new(
            config.default_language.clone(),
            config.session_retention(),
        ));
        let audio_store = AudioStore::new(std::time::Duration::from_secs(
            config.audio_cache_ttl_seconds,
        ));
        Arc::new(Self {
            config,
            registry,
            engines: Arc::new(engines),
            audio_store,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Reserve a WebSocket connection slot for `ip`.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        if let Some(max) = self.config.max_websocket_connections {
            if self.ws_connections.load(Ordering::Acquire) >= max {
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        }

        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *per_ip += 1;
        drop(per_ip);

        self.ws_connections.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Release a slot previously acquired for `ip`.
    pub fn release_connection(&self, ip: IpAddr) {
        if let Some(mut per_ip) = self.ip_connections.get_mut(&ip) {
            *per_ip = per_ip.saturating_sub(1);
            let now_zero = *per_ip == 0;
            drop(per_ip);
            if now_zero {
                self.ip_connections.remove_if(&ip, |_, count| *count == 0);
            }
        }
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
    }

    /// Current number of open WebSocket connections.
    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    /// Current number of open WebSocket connections for one IP.
    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.ip_connections.get(ip).map(|c| *c).unwrap_or(0)
    }
}
