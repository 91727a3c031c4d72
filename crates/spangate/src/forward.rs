//! Single-attempt forwarding of remote calls through the current handle.

use std::sync::Arc;
use std::time::Duration;

use http::header::HeaderMap;
use serde_json::Value;
use tracing::debug;

use crate::error::{SidecarError, SidecarResult};
use crate::lifecycle::{ConnectionHandle, LifecycleManager, LifecycleState};
use crate::remote::{ExecuteSqlRequest, ListInstancesRequest};

/// A forwardable remote operation.
#[derive(Debug, Clone)]
pub enum RemoteCall {
    /// List instances under a parent project.
    ListInstances {
        /// Parent resource, `projects/{project}`.
        parent: String,
    },
    /// Execute a SQL statement against the handle's database.
    ExecuteSql {
        /// SQL statement text.
        sql: String,
    },
}

impl RemoteCall {
    /// Operation name for logging and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListInstances { .. } => "listInstances",
            Self::ExecuteSql { .. } => "executeSql",
        }
    }
}

/// Relays operations to the remote capability through the current handle.
///
/// One attempt per call, no retry, no backoff. A call is only dispatched when
/// the manager is [`LifecycleState::Ready`] and a handle is published;
/// otherwise the remote capability is not touched at all.
#[derive(Debug)]
pub struct Forwarder {
    /// Lifecycle manager owning the current handle.
    manager: Arc<LifecycleManager>,
    /// Upper bound on one forwarded call.
    timeout: Duration,
}

impl Forwarder {
    /// Create a new forwarder.
    pub fn new(manager: Arc<LifecycleManager>, timeout: Duration) -> Self {
        Self { manager, timeout }
    }

    /// Forward one call with the supplied per-call headers.
    ///
    /// Upstream errors are surfaced as-is; they are operation-specific and
    /// actionable for the caller.
    pub async fn forward(&self, call: RemoteCall, headers: &HeaderMap) -> SidecarResult<Value> {
        let operation = call.name();

        let handle = match (self.manager.state(), self.manager.current()) {
            (LifecycleState::Ready, Some(handle)) => handle,
            (state, _) => {
                debug!(operation, state = ?state, "rejecting forward, client not ready");
                metrics::counter!("spangate_forward_total", "operation" => operation, "outcome" => "not_initialized")
                    .increment(1);
                return Err(SidecarError::not_initialized(
                    "no ready connection handle; call /init first",
                ));
            }
        };

        let outcome = tokio::time::timeout(self.timeout, dispatch(&handle, call, headers)).await;

        let result = match outcome {
            Err(_) => Err(SidecarError::upstream(format!(
                "{operation} timed out after {}ms",
                self.timeout.as_millis()
            ))),
            Ok(result) => result,
        };

        let label = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!("spangate_forward_total", "operation" => operation, "outcome" => label)
            .increment(1);

        result
    }
}

async fn dispatch(
    handle: &ConnectionHandle,
    call: RemoteCall,
    headers: &HeaderMap,
) -> SidecarResult<Value> {
    match call {
        RemoteCall::ListInstances { parent } => {
            handle
                .client
                .list_instances(ListInstancesRequest { parent }, headers)
                .await
        }
        RemoteCall::ExecuteSql { sql } => {
            let set = handle
                .client
                .execute_sql(&handle.database, ExecuteSqlRequest { sql }, headers)
                .await?;
            Ok(serde_json::json!({ "rows": set.rows }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SidecarConfig;
    use crate::remote::{BoxFuture, DatabaseRef, ResultSet, SpannerService};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counting fake: records every remote invocation.
    #[derive(Debug, Default)]
    struct CountingService {
        calls: Arc<AtomicUsize>,
    }

    impl SpannerService for CountingService {
        fn list_instances(
            &self,
            request: ListInstancesRequest,
            _headers: &HeaderMap,
        ) -> BoxFuture<'_, SidecarResult<Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(serde_json::json!({ "instances": [], "parent": request.parent })) })
        }

        fn execute_sql(
            &self,
            _database: &DatabaseRef,
            _request: ExecuteSqlRequest,
            _headers: &HeaderMap,
        ) -> BoxFuture<'_, SidecarResult<ResultSet>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                Ok(ResultSet {
                    rows: vec![serde_json::json!(["1"])],
                })
            })
        }

        fn close(&self) -> BoxFuture<'_, SidecarResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn setup(calls: Arc<AtomicUsize>) -> (Arc<LifecycleManager>, Forwarder) {
        let config = SidecarConfig::builder()
            .endpoint("http://localhost:9020")
            .build()
            .unwrap();

        let manager = Arc::new(LifecycleManager::with_factory(
            &config,
            Box::new(move |_headers| {
                Ok(Arc::new(CountingService {
                    calls: calls.clone(),
                }) as Arc<dyn SpannerService>)
            }),
        ));

        let forwarder = Forwarder::new(manager.clone(), Duration::from_secs(1));
        (manager, forwarder)
    }

    #[tokio::test]
    async fn test_forward_without_initialize_makes_zero_remote_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_manager, forwarder) = setup(calls.clone());

        let result = forwarder
            .forward(
                RemoteCall::ListInstances {
                    parent: "projects/p1".to_string(),
                },
                &HeaderMap::new(),
            )
            .await;

        assert!(matches!(result, Err(SidecarError::NotInitialized { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_forward_after_initialize() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (manager, forwarder) = setup(calls.clone());

        assert!(manager.initialize("p1", "i1", "d1", None).await);
        let before = calls.load(Ordering::SeqCst); // the readiness probe

        let value = forwarder
            .forward(
                RemoteCall::ListInstances {
                    parent: "projects/p1".to_string(),
                },
                &HeaderMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(value["parent"], "projects/p1");
        assert_eq!(calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_forward_execute_sql_wraps_rows() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (manager, forwarder) = setup(calls);

        assert!(manager.initialize("p1", "i1", "d1", None).await);

        let value = forwarder
            .forward(
                RemoteCall::ExecuteSql {
                    sql: "SELECT 1".to_string(),
                },
                &HeaderMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(value["rows"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_call_names() {
        let call = RemoteCall::ListInstances {
            parent: String::new(),
        };
        assert_eq!(call.name(), "listInstances");

        let call = RemoteCall::ExecuteSql { sql: String::new() };
        assert_eq!(call.name(), "executeSql");
    }
}
