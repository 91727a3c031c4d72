//! Connection-handle lifecycle management.
//!
//! A single [`LifecycleManager`] owns the one piece of shared mutable state
//! in the sidecar: the currently published [`ConnectionHandle`]. Handles are
//! immutable, constructed whole inside [`LifecycleManager::initialize`] and
//! published with a guarded pointer swap, so readers always observe either
//! the fully-old or the fully-new handle and never a torn one.
//!
//! Publish order is deliberate: the fresh handle is installed *before* the
//! readiness probe runs. A failed probe moves the manager to
//! [`LifecycleState::Failed`] but leaves the degraded handle current, so the
//! `/test` endpoint can still reach it for diagnosis.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use http::header::HeaderMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::SidecarConfig;
use crate::error::SidecarResult;
use crate::headers::{build_identity_headers, StaticIdentity};
use crate::probe::probe;
use crate::remote::{DatabaseRef, InstanceRef, RestClient, SpannerService};

/// Lifecycle state of the managed connection set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// No initialize call has happened yet.
    Uninitialized,
    /// An initialize call is in flight.
    Initializing,
    /// The current handle passed its readiness probe.
    Ready,
    /// Construction or the readiness probe failed.
    Failed,
}

/// One usable connection to the remote service.
///
/// All four fields come from the same `initialize` call; a handle is never
/// mutated after construction.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// The pooled remote client.
    pub client: Arc<dyn SpannerService>,
    /// Resolved instance reference.
    pub instance: InstanceRef,
    /// Resolved database reference.
    pub database: DatabaseRef,
    /// Per-call identity set attached as the handle's default headers, so
    /// internal calls that cannot take explicit headers still carry tenant
    /// identity and trace token.
    pub default_headers: HeaderMap,
}

/// Factory producing a remote client from transport-level default headers.
///
/// Injected so tests (and alternative transports) can substitute the real
/// REST client with their own capability.
pub type ClientFactory =
    dyn Fn(&HeaderMap) -> SidecarResult<Arc<dyn SpannerService>> + Send + Sync;

/// Owner of the single live connection-set handle.
pub struct LifecycleManager {
    /// Static identity configuration.
    identity: StaticIdentity,
    /// Hard timeout for the readiness probe.
    probe_timeout: Duration,
    /// Published handle; `None` until the first initialize.
    current: ArcSwapOption<ConnectionHandle>,
    /// Lifecycle state.
    state: RwLock<LifecycleState>,
    /// Serializes initialize calls against each other.
    init_lock: Mutex<()>,
    /// Remote client factory.
    factory: Box<ClientFactory>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("state", &self.state())
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    /// Create a manager that constructs [`RestClient`]s against the
    /// configured endpoint.
    pub fn new(config: &SidecarConfig) -> Self {
        let endpoint = config.spanner.endpoint.clone();
        let timeout = config.spanner.forward_timeout;

        Self::with_factory(
            config,
            Box::new(move |default_headers| {
                let client = RestClient::new(endpoint.clone(), default_headers.clone(), timeout)?;
                Ok(Arc::new(client) as Arc<dyn SpannerService>)
            }),
        )
    }

    /// Create a manager with a custom client factory.
    pub fn with_factory(config: &SidecarConfig, factory: Box<ClientFactory>) -> Self {
        Self {
            identity: StaticIdentity::from(&config.spanner),
            probe_timeout: config.spanner.probe_timeout,
            current: ArcSwapOption::empty(),
            state: RwLock::new(LifecycleState::Uninitialized),
            init_lock: Mutex::new(()),
            factory,
        }
    }

    /// Build, probe and publish a new connection handle.
    ///
    /// Serialized against concurrent initialize calls; any state accepts a
    /// new call. Returns the readiness-probe outcome. Construction errors are
    /// contained: they log, move the manager to `Failed` and return `false`
    /// without publishing.
    pub async fn initialize(
        &self,
        project: &str,
        instance: &str,
        database: &str,
        trace_token: Option<&str>,
    ) -> bool {
        let _guard = self.init_lock.lock().await;
        *self.state.write() = LifecycleState::Initializing;

        // Best-effort close of the previous handle; it stays published until
        // the new one swaps in.
        if let Some(previous) = self.current.load_full() {
            if let Err(e) = previous.client.close().await {
                debug!(error = %e, "previous handle close failed");
            }
        }

        let handle = match self.build_handle(project, instance, database, trace_token) {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                error!(project, instance, database, error = %e, "handle construction failed");
                metrics::counter!("spangate_initialize_total", "outcome" => "error").increment(1);
                *self.state.write() = LifecycleState::Failed;
                return false;
            }
        };

        // Atomic publish: readers from here on see the new handle, whole.
        self.current.store(Some(handle.clone()));

        let result = probe(&handle, &handle.default_headers, self.probe_timeout).await;
        let outcome = if result.ok { "ready" } else { "failed" };
        metrics::counter!("spangate_initialize_total", "outcome" => outcome).increment(1);

        info!(
            project,
            instance,
            database,
            ready = result.ok,
            "initialize completed"
        );

        *self.state.write() = if result.ok {
            LifecycleState::Ready
        } else {
            LifecycleState::Failed
        };

        result.ok
    }

    fn build_handle(
        &self,
        project: &str,
        instance: &str,
        database: &str,
        trace_token: Option<&str>,
    ) -> SidecarResult<ConnectionHandle> {
        // Transport-level identity: the factory installs these as default
        // headers so session machinery without a per-call options path still
        // carries them.
        let default_headers = build_identity_headers(&self.identity, project, trace_token);
        let client = (self.factory)(&default_headers)?;

        // Resource-name resolution is pure string work; no RPC happens here.
        let instance_ref = InstanceRef::new(project, instance);
        let database_ref = DatabaseRef::new(project, instance, database);

        Ok(ConnectionHandle {
            client,
            instance: instance_ref,
            database: database_ref,
            default_headers,
        })
    }

    /// Snapshot of the published handle.
    ///
    /// Lock-free; never blocks on an in-flight initialize. A caller that
    /// invokes this after an `initialize` call returned observes the handle
    /// that call published.
    pub fn current(&self) -> Option<Arc<ConnectionHandle>> {
        self.current.load_full()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Static identity configuration.
    pub fn identity(&self) -> &StaticIdentity {
        &self.identity
    }

    /// Hard timeout applied to readiness probes.
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Close the published handle at process shutdown, best-effort.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.current.swap(None) {
            if let Err(e) = handle.client.close().await {
                debug!(error = %e, "handle close failed during shutdown");
            }
        }
        *self.state.write() = LifecycleState::Uninitialized;
    }
}
