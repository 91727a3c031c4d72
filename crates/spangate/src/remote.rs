//! The remote Spanner capability and its REST implementation.
//!
//! The sidecar never speaks to Spanner directly; it goes through the
//! object-safe [`SpannerService`] trait so the lifecycle and forwarding
//! layers stay independent of the transport. The shipped implementation,
//! [`RestClient`], talks to the Spanner REST surface through a pooled
//! `reqwest` client. The static identity set is installed as the client's
//! *default* headers, so internal sub-resource calls that expose no per-call
//! header hook (session creation, notably) still carry tenant identity.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use http::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{SidecarError, SidecarResult};

/// Boxed future type used by the capability trait.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fully qualified Spanner instance resource name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef(String);

impl InstanceRef {
    /// Create a reference to `projects/{project}/instances/{instance}`.
    pub fn new(project: &str, instance: &str) -> Self {
        Self(format!("projects/{project}/instances/{instance}"))
    }

    /// The resource name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Fully qualified Spanner database resource name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRef(String);

impl DatabaseRef {
    /// Create a reference to
    /// `projects/{project}/instances/{instance}/databases/{database}`.
    pub fn new(project: &str, instance: &str, database: &str) -> Self {
        Self(format!(
            "projects/{project}/instances/{instance}/databases/{database}"
        ))
    }

    /// The resource name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Request for the instance-listing admin operation.
#[derive(Debug, Clone)]
pub struct ListInstancesRequest {
    /// Parent resource, `projects/{project}`.
    pub parent: String,
}

/// Request for a SQL query.
#[derive(Debug, Clone)]
pub struct ExecuteSqlRequest {
    /// SQL statement text.
    pub sql: String,
}

/// Subset of a Spanner result set the sidecar cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultSet {
    /// Result rows; each row is an array of column values.
    #[serde(default)]
    pub rows: Vec<Value>,
}

/// The remote Spanner service as an opaque capability.
///
/// Both operations take a per-call header overlay; implementations must apply
/// it on top of whatever transport-level defaults they carry.
pub trait SpannerService: Send + Sync + std::fmt::Debug {
    /// List instances under a parent project.
    fn list_instances(
        &self,
        request: ListInstancesRequest,
        headers: &HeaderMap,
    ) -> BoxFuture<'_, SidecarResult<Value>>;

    /// Execute a SQL statement against a database.
    fn execute_sql(
        &self,
        database: &DatabaseRef,
        request: ExecuteSqlRequest,
        headers: &HeaderMap,
    ) -> BoxFuture<'_, SidecarResult<ResultSet>>;

    /// Release transport resources. Best-effort; callers ignore errors.
    fn close(&self) -> BoxFuture<'_, SidecarResult<()>>;
}

/// `SpannerService` over the Spanner REST surface.
#[derive(Debug, Clone)]
pub struct RestClient {
    /// Pooled HTTP client carrying the static identity as default headers.
    http: reqwest::Client,
    /// Base URL of the Spanner API.
    endpoint: String,
}

impl RestClient {
    /// Create a new REST client bound to `endpoint`.
    ///
    /// `default_headers` is attached at the transport level and therefore
    /// applies to every request this client makes, including session
    /// management calls that have no per-call header path.
    pub fn new(
        endpoint: impl Into<String>,
        default_headers: HeaderMap,
        timeout: Duration,
    ) -> SidecarResult<Self> {
        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| SidecarError::init(format!("failed to create client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    /// Get the endpoint this client is bound to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn read_json(response: reqwest::Response) -> SidecarResult<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SidecarError::upstream_with_status(
                format!("upstream returned {status}: {body}"),
                status.as_u16(),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| SidecarError::upstream(format!("invalid JSON response: {e}")))
    }

    /// Create a single-use session for a query.
    ///
    /// This is the sub-resource path that cannot accept per-call headers; it
    /// relies on the transport-level defaults installed in [`Self::new`].
    async fn create_session(&self, database: &DatabaseRef) -> SidecarResult<String> {
        #[derive(Deserialize)]
        struct Session {
            name: String,
        }

        let url = format!("{}/v1/{}/sessions", self.endpoint, database.name());
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| SidecarError::upstream(format!("session create failed: {e}")))?;

        let session: Session = serde_json::from_value(Self::read_json(response).await?)?;
        Ok(session.name)
    }

    async fn delete_session(&self, session: &str) {
        let url = format!("{}/v1/{}", self.endpoint, session);
        if let Err(e) = self.http.delete(&url).send().await {
            debug!(session, error = %e, "session delete failed");
        }
    }
}

impl SpannerService for RestClient {
    fn list_instances(
        &self,
        request: ListInstancesRequest,
        headers: &HeaderMap,
    ) -> BoxFuture<'_, SidecarResult<Value>> {
        let url = format!("{}/v1/{}/instances", self.endpoint, request.parent);
        let headers = headers.clone();

        Box::pin(async move {
            let response = self
                .http
                .get(&url)
                .headers(headers)
                .send()
                .await
                .map_err(|e| SidecarError::upstream(format!("listInstances failed: {e}")))?;

            Self::read_json(response).await
        })
    }

    fn execute_sql(
        &self,
        database: &DatabaseRef,
        request: ExecuteSqlRequest,
        headers: &HeaderMap,
    ) -> BoxFuture<'_, SidecarResult<ResultSet>> {
        let database = database.clone();
        let headers = headers.clone();

        Box::pin(async move {
            let session = self.create_session(&database).await?;

            let url = format!("{}/v1/{}:executeSql", self.endpoint, session);
            let result = async {
                let response = self
                    .http
                    .post(&url)
                    .headers(headers)
                    .json(&serde_json::json!({ "sql": request.sql }))
                    .send()
                    .await
                    .map_err(|e| SidecarError::upstream(format!("executeSql failed: {e}")))?;

                let body = Self::read_json(response).await?;
                serde_json::from_value(body).map_err(SidecarError::from)
            }
            .await;

            // The session is single-use; drop it regardless of the outcome.
            self.delete_session(&session).await;

            result
        })
    }

    fn close(&self) -> BoxFuture<'_, SidecarResult<()>> {
        // Dropping the reqwest client drains its pool; nothing to do eagerly.
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names() {
        let instance = InstanceRef::new("p1", "i1");
        assert_eq!(instance.name(), "projects/p1/instances/i1");

        let database = DatabaseRef::new("p1", "i1", "d1");
        assert_eq!(database.name(), "projects/p1/instances/i1/databases/d1");
    }

    #[test]
    fn test_rest_client_construction() {
        let client = RestClient::new(
            "http://localhost:9020",
            HeaderMap::new(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:9020");
    }

    #[test]
    fn test_result_set_deserialization() {
        let set: ResultSet = serde_json::from_str(r#"{"rows": [["1"]]}"#).unwrap();
        assert_eq!(set.rows.len(), 1);

        // Spanner omits `rows` entirely for empty results.
        let set: ResultSet = serde_json::from_str(r#"{"metadata": {}}"#).unwrap();
        assert!(set.rows.is_empty());
    }

    #[tokio::test]
    async fn test_list_instances_unreachable() {
        // Port 1 is reliably closed; the capability must surface an upstream
        // error rather than panic.
        let client = RestClient::new(
            "http://127.0.0.1:1",
            HeaderMap::new(),
            Duration::from_millis(200),
        )
        .unwrap();

        let result = client
            .list_instances(
                ListInstancesRequest {
                    parent: "projects/p1".to_string(),
                },
                &HeaderMap::new(),
            )
            .await;

        assert!(matches!(result, Err(SidecarError::Upstream { .. })));
    }
}
