//! Readiness probe against the active connection handle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use http::header::HeaderMap;
use tracing::{debug, warn};

use crate::lifecycle::ConnectionHandle;
use crate::remote::ExecuteSqlRequest;

/// Minimal liveness statement; completing it proves the whole path (proxy,
/// session machinery, database) can serve a query.
const PROBE_STATEMENT: &str = "SELECT 1";

/// Outcome of one readiness probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Whether the probe query completed in time with at least one row.
    pub ok: bool,
    /// When the probe finished.
    pub observed_at: DateTime<Utc>,
    /// Failure description when `ok` is false.
    pub cause: Option<String>,
}

impl ProbeResult {
    fn pass() -> Self {
        Self {
            ok: true,
            observed_at: Utc::now(),
            cause: None,
        }
    }

    fn fail(cause: impl Into<String>) -> Self {
        Self {
            ok: false,
            observed_at: Utc::now(),
            cause: Some(cause.into()),
        }
    }
}

/// Probe a connection handle with a hard timeout.
///
/// Succeeds iff the probe query completes within `timeout` and returns at
/// least one row. Every failure mode (timeout, transport error, zero rows)
/// is converted into a `ProbeResult`; this function never returns an error
/// and never mutates lifecycle state — state transitions are the caller's
/// decision.
pub async fn probe(handle: &ConnectionHandle, headers: &HeaderMap, timeout: Duration) -> ProbeResult {
    let request = ExecuteSqlRequest {
        sql: PROBE_STATEMENT.to_string(),
    };

    let query = handle
        .client
        .execute_sql(&handle.database, request, headers);

    let result = match tokio::time::timeout(timeout, query).await {
        Err(_) => ProbeResult::fail(format!("probe timed out after {}ms", timeout.as_millis())),
        Ok(Err(e)) => ProbeResult::fail(format!("probe query failed: {e}")),
        Ok(Ok(set)) if set.rows.is_empty() => ProbeResult::fail("probe query returned no rows"),
        Ok(Ok(_)) => ProbeResult::pass(),
    };

    if result.ok {
        debug!(database = handle.database.name(), "readiness probe passed");
    } else {
        warn!(
            database = handle.database.name(),
            cause = result.cause.as_deref().unwrap_or(""),
            "readiness probe failed"
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SidecarError, SidecarResult};
    use crate::remote::{
        BoxFuture, DatabaseRef, InstanceRef, ListInstancesRequest, ResultSet, SpannerService,
    };
    use serde_json::Value;
    use std::sync::Arc;

    /// Probe responses a fake can be scripted with.
    #[derive(Debug, Clone, Copy)]
    enum Script {
        Rows,
        Empty,
        Error,
        Hang,
    }

    #[derive(Debug)]
    struct ScriptedService(Script);

    impl SpannerService for ScriptedService {
        fn list_instances(
            &self,
            _request: ListInstancesRequest,
            _headers: &HeaderMap,
        ) -> BoxFuture<'_, SidecarResult<Value>> {
            Box::pin(async { Ok(Value::Null) })
        }

        fn execute_sql(
            &self,
            _database: &DatabaseRef,
            _request: ExecuteSqlRequest,
            _headers: &HeaderMap,
        ) -> BoxFuture<'_, SidecarResult<ResultSet>> {
            let script = self.0;
            Box::pin(async move {
                match script {
                    Script::Rows => Ok(ResultSet {
                        rows: vec![serde_json::json!(["1"])],
                    }),
                    Script::Empty => Ok(ResultSet::default()),
                    Script::Error => Err(SidecarError::upstream("connection refused")),
                    Script::Hang => {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(ResultSet::default())
                    }
                }
            })
        }

        fn close(&self) -> BoxFuture<'_, SidecarResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn handle(script: Script) -> ConnectionHandle {
        ConnectionHandle {
            client: Arc::new(ScriptedService(script)),
            instance: InstanceRef::new("p1", "i1"),
            database: DatabaseRef::new("p1", "i1", "d1"),
            default_headers: HeaderMap::new(),
        }
    }

    #[tokio::test]
    async fn test_probe_passes_on_rows() {
        let result = probe(&handle(Script::Rows), &HeaderMap::new(), Duration::from_secs(1)).await;
        assert!(result.ok);
        assert!(result.cause.is_none());
    }

    #[tokio::test]
    async fn test_probe_fails_on_empty_result() {
        let result = probe(&handle(Script::Empty), &HeaderMap::new(), Duration::from_secs(1)).await;
        assert!(!result.ok);
        assert!(result.cause.unwrap().contains("no rows"));
    }

    #[tokio::test]
    async fn test_probe_fails_on_error_without_raising() {
        let result = probe(&handle(Script::Error), &HeaderMap::new(), Duration::from_secs(1)).await;
        assert!(!result.ok);
        assert!(result.cause.unwrap().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_times_out() {
        let result = probe(
            &handle(Script::Hang),
            &HeaderMap::new(),
            Duration::from_millis(1500),
        )
        .await;
        assert!(!result.ok);
        assert!(result.cause.unwrap().contains("timed out after 1500ms"));
    }
}
