//! Identity and trace header construction.
//!
//! Every outbound Spanner call carries an ordered identity set: the static
//! proxy headers first, then the per-call tenant header (which overrides any
//! static tenant value), then the trace token when the caller sent one.
//! Construction is pure; nothing is cached between calls, so one tenant's
//! identity can never bleed into the next request.

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::SpannerSettings;

/// Header naming the tenant project billed/quota-charged for the call.
pub static HEADER_USER_PROJECT: HeaderName = HeaderName::from_static("x-goog-user-project");

/// Header naming the project the gRPC proxy itself runs under.
pub static HEADER_PROXY_PROJECT: HeaderName = HeaderName::from_static("x-grpc-proxy-project");

/// Header naming the upstream endpoint the proxy should dial.
pub static HEADER_PROXY_ENDPOINT: HeaderName = HeaderName::from_static("x-grpc-proxy-endpoint");

/// Trace correlation header, propagated verbatim and echoed on responses.
pub static HEADER_TRACE_CONTEXT: HeaderName = HeaderName::from_static("x-cloud-trace-context");

/// Request ID header added to every response.
pub static HEADER_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Static identity configuration shared by every call.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    /// Proxy project id.
    pub proxy_project: String,
    /// Fixed upstream endpoint.
    pub proxy_endpoint: String,
}

impl From<&SpannerSettings> for StaticIdentity {
    fn from(settings: &SpannerSettings) -> Self {
        Self {
            proxy_project: settings.proxy_project.clone(),
            proxy_endpoint: settings.proxy_endpoint.clone(),
        }
    }
}

/// Build the ordered identity set for one call.
///
/// Precedence is static proxy/endpoint headers, then the tenant header keyed
/// by `tenant_project` (later insertion wins over any static value of the
/// same name), then the trace header iff `trace_token` is non-empty. The
/// `tenant_project` must be the value bound to this specific call, never a
/// stale one from a previous request.
pub fn build_identity_headers(
    identity: &StaticIdentity,
    tenant_project: &str,
    trace_token: Option<&str>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Ok(value) = HeaderValue::from_str(&identity.proxy_endpoint) {
        headers.insert(HEADER_PROXY_ENDPOINT.clone(), value);
    }

    if let Ok(value) = HeaderValue::from_str(&identity.proxy_project) {
        headers.insert(HEADER_PROXY_PROJECT.clone(), value);
    }

    if let Ok(value) = HeaderValue::from_str(tenant_project) {
        headers.insert(HEADER_USER_PROJECT.clone(), value);
    }

    if let Some(token) = trace_token.filter(|t| !t.is_empty()) {
        if let Ok(value) = HeaderValue::from_str(token) {
            headers.insert(HEADER_TRACE_CONTEXT.clone(), value);
        }
    }

    headers
}

/// Extract the trace token from inbound request headers.
///
/// Returns `None` for a missing or empty header, so an absent token stays
/// absent on the response.
pub fn trace_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(&HEADER_TRACE_CONTEXT)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Copy the trace token onto a response header map, when present.
pub fn echo_trace(headers: &mut HeaderMap, token: Option<&str>) {
    if let Some(token) = token {
        if let Ok(value) = HeaderValue::from_str(token) {
            headers.insert(HEADER_TRACE_CONTEXT.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statics() -> StaticIdentity {
        StaticIdentity {
            proxy_project: "proxy-proj".to_string(),
            proxy_endpoint: "spanner.googleapis.com:443".to_string(),
        }
    }

    #[test]
    fn test_build_identity_headers() {
        let headers = build_identity_headers(&statics(), "tenant-a", Some("trace-1/2;o=1"));

        assert_eq!(headers.get(&HEADER_USER_PROJECT).unwrap(), "tenant-a");
        assert_eq!(headers.get(&HEADER_PROXY_PROJECT).unwrap(), "proxy-proj");
        assert_eq!(
            headers.get(&HEADER_PROXY_ENDPOINT).unwrap(),
            "spanner.googleapis.com:443"
        );
        assert_eq!(headers.get(&HEADER_TRACE_CONTEXT).unwrap(), "trace-1/2;o=1");
    }

    #[test]
    fn test_absent_trace_token_is_omitted() {
        let headers = build_identity_headers(&statics(), "tenant-a", None);
        assert!(headers.get(&HEADER_TRACE_CONTEXT).is_none());

        let headers = build_identity_headers(&statics(), "tenant-a", Some(""));
        assert!(headers.get(&HEADER_TRACE_CONTEXT).is_none());
    }

    #[test]
    fn test_no_leak_between_tenants() {
        let a = build_identity_headers(&statics(), "tenant-a", Some("trace-a"));
        let b = build_identity_headers(&statics(), "tenant-b", None);

        assert_eq!(b.get(&HEADER_USER_PROJECT).unwrap(), "tenant-b");
        assert!(b.get(&HEADER_TRACE_CONTEXT).is_none());
        // The first build is untouched by the second.
        assert_eq!(a.get(&HEADER_USER_PROJECT).unwrap(), "tenant-a");
        assert_eq!(a.get(&HEADER_TRACE_CONTEXT).unwrap(), "trace-a");
    }

    #[test]
    fn test_trace_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(trace_token(&headers), None);

        headers.insert(&HEADER_TRACE_CONTEXT, HeaderValue::from_static(""));
        assert_eq!(trace_token(&headers), None);

        headers.insert(&HEADER_TRACE_CONTEXT, HeaderValue::from_static("abc/123"));
        assert_eq!(trace_token(&headers), Some("abc/123".to_string()));
    }

    #[test]
    fn test_echo_trace() {
        let mut response = HeaderMap::new();
        echo_trace(&mut response, None);
        assert!(response.get(&HEADER_TRACE_CONTEXT).is_none());

        echo_trace(&mut response, Some("abc/123"));
        assert_eq!(response.get(&HEADER_TRACE_CONTEXT).unwrap(), "abc/123");
    }
}
