//! JSON envelope for the job trigger endpoints.
//!
//! Enqueue, run and job-inspection handlers all return their payload under
//! `data`, with per-request timing under `meta`:
//! ```json
//! {
//!   "data": { "id": "...", "kind": "task:createPost", "status": "queued" },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 5 },
//!   "_links": { "self": "/api/v1/jobs/..." }
//! }
//! ```
//! Failures carry `data: null` and an `errors` list built by
//! [`crate::http::error::AppError`].

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

/// A job, run summary or job list, wrapped for the wire.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,

    pub meta: ApiMeta,

    /// Related job URLs, e.g. `self` for a freshly enqueued job.
    #[serde(rename = "_links", skip_serializing_if = "HashMap::is_empty")]
    pub links: HashMap<String, String>,
}

/// Request id and server-side timing.
#[derive(Debug, Serialize)]
pub struct ApiMeta {
    pub request_id: String,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
    pub response_time_ms: u64,
}

impl<T: Serialize> ApiResponse<T> {
    /// Wrap `data`, timing the request from `start`.
    pub fn success(data: T, start: Instant) -> Self {
        Self {
            data,
            meta: ApiMeta {
                request_id: Uuid::now_v7().to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                response_time_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            },
            links: HashMap::new(),
        }
    }

    /// Attach a related URL under `rel`.
    pub fn with_link(mut self, rel: &str, href: &str) -> Self {
        self.links.insert(rel.to_string(), href.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let resp = ApiResponse::success(vec![1, 2], Instant::now()).with_link("self", "/api/v1/jobs");
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["data"], serde_json::json!([1, 2]));
        assert_eq!(value["_links"]["self"], "/api/v1/jobs");
        assert!(value["meta"]["request_id"].is_string());
    }

    #[test]
    fn test_links_omitted_when_empty() {
        let value = serde_json::to_value(ApiResponse::success("ok", Instant::now())).unwrap();
        assert!(value.get("_links").is_none());
    }
}
