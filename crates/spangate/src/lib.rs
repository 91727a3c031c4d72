//! Spangate - Spanner identity and lifecycle sidecar
//!
//! Spangate sits between HTTP callers and a pooled client for Cloud Spanner,
//! injecting per-tenant identity metadata and a distributed-trace correlation
//! header into every outbound call while managing the lifecycle of the
//! underlying connection set.
//!
//! # Architecture
//!
//! ```text
//!             ┌─────────────────────────────────────────────┐
//!   HTTP      │                  Spangate                   │
//!   caller ──►│  /init ──► LifecycleManager ─┐              │
//!             │  /test ──► ReadinessProbe ───┤              │      gRPC proxy /
//!             │  /listInstances ─► Forwarder ┴─► current()──┼────► Spanner API
//!             │                                   ▲         │
//!             │       identity + trace headers ───┘         │
//!             └─────────────────────────────────────────────┘
//! ```
//!
//! The only shared mutable state is the published [`ConnectionHandle`];
//! `initialize` builds a handle whole, publishes it with an atomic pointer
//! swap and probes it, while readers take lock-free snapshots through
//! [`LifecycleManager::current`]. Tenant identity (`x-goog-user-project`) is
//! bound per call, and the caller's `x-cloud-trace-context` token is echoed
//! on every response path.
//!
//! # Example Usage
//!
//! ```bash
//! # Run against a local Spanner-protocol proxy
//! $ SPANGATE_PROJECT_ID=my-project \
//!   SPANGATE_SPANNER_ENDPOINT=http://grpc.local:5001 \
//!   spangate
//!
//! # Initialize the client set, then forward an admin call
//! $ curl localhost:8080/init/my-project/my-instance/my-database
//! $ curl localhost:8080/listInstances/my-project
//! ```

#![doc(html_root_url = "https://docs.rs/spangate/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod forward;
pub mod headers;
pub mod lifecycle;
pub mod probe;
pub mod remote;
pub mod server;

pub use config::{SidecarConfig, SidecarConfigBuilder};
pub use error::{SidecarError, SidecarResult};
pub use forward::{Forwarder, RemoteCall};
pub use lifecycle::{ConnectionHandle, LifecycleManager, LifecycleState};
pub use probe::{probe, ProbeResult};
pub use remote::{RestClient, SpannerService};
pub use server::SidecarServer;

/// Sidecar version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_exports() {
        // Verify all public types are accessible
        let _config = SidecarConfig::default();
    }
}
