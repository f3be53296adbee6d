//! HTTP adapter for the remote store.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so any library
//! (reqwest, ureq, hyper) can be plugged in. Resources follow the usual
//! REST-over-document-store conventions: `_status`, `_etag`, `_updated`
//! and `_items` metadata, `If-Match` for conditional updates, and
//! `where`/`sort`/`max_results` list parameters.

use crate::digest::fingerprint;
use crate::remote::RemoteStore;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{debug, error};
use wattsync_protocol::{
    Ack, ListQuery, RemoteError, RemoteRecord, RemoteResult, SortOrder, VersionTag,
};

/// HTTP verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Partial update.
    Patch,
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Verb.
    pub method: HttpMethod,
    /// Absolute URL without query string.
    pub url: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Vec<u8>>,
}

/// A received response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw body.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// `Err` means the exchange never completed (DNS, connect, reset).
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, String>;
}

/// Remote store backed by one REST resource.
pub struct HttpRemote<C: HttpClient> {
    base_url: String,
    resource: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpRemote<C> {
    /// Creates an adapter for `resource` under `base_url`.
    pub fn new(base_url: impl Into<String>, resource: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            resource: resource.into().trim_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the resource name.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.base_url, self.resource)
    }

    fn item_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.resource, key)
    }

    fn fail(&self, error: RemoteError) -> RemoteError {
        *self.last_error.write() = Some(error.to_string());
        error
    }

    /// Sends `request` and decodes a JSON object body, mapping failures.
    fn exchange(
        &self,
        key: &str,
        request: HttpRequest,
        expected: Option<&VersionTag>,
    ) -> RemoteResult<Map<String, Value>> {
        let start = Instant::now();
        let response = self
            .client
            .send(&request)
            .map_err(|e| self.fail(RemoteError::transport_retryable(e)))?;
        debug!(
            resource = %self.resource,
            key,
            method = ?request.method,
            status = response.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "remote call"
        );

        let status = response.status;
        if status == 404 {
            return Err(RemoteError::NotFound { key: key.to_string() });
        }
        if status == 409 || status == 412 {
            return Err(self.fail(RemoteError::Conflict {
                key: key.to_string(),
                expected: expected.cloned().unwrap_or_else(|| VersionTag::new("")),
            }));
        }
        if status == 429 || status >= 500 {
            return Err(self.fail(RemoteError::transport_retryable(format!(
                "{} answered {status}",
                request.url
            ))));
        }

        let request_body = request.body.as_deref().unwrap_or_default();
        let document: Value = serde_json::from_slice(&response.body).map_err(|e| {
            self.fail(RemoteError::transport_fatal(format!("malformed response body: {e}")))
        })?;
        let mut object = match document {
            Value::Object(object) => object,
            _ => {
                return Err(
                    self.fail(RemoteError::transport_fatal("response body is not an object"))
                )
            }
        };

        let status_field = object.get("_status").and_then(Value::as_str).map(str::to_string);
        let rejected = !(200..300).contains(&status)
            || status_field.as_deref().is_some_and(|s| s != "OK")
            || (request.method != HttpMethod::Get && status_field.is_none());
        if rejected {
            let hash = fingerprint(request_body, &response.body);
            let reason = object
                .remove("_error")
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("status {status}"));
            error!(
                resource = %self.resource,
                key,
                code = status_field.as_deref().unwrap_or("-"),
                fingerprint = %hash,
                "remote rejected request"
            );
            return Err(self.fail(RemoteError::transport_fatal(format!(
                "rejected ({hash}): {reason}"
            ))));
        }

        *self.last_error.write() = None;
        Ok(object)
    }

    fn write_request(
        &self,
        method: HttpMethod,
        url: String,
        payload: &Value,
        version: Option<&VersionTag>,
    ) -> RemoteResult<HttpRequest> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| RemoteError::transport_fatal(format!("unencodable payload: {e}")))?;
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(version) = version {
            headers.push(("If-Match".to_string(), version.to_string()));
        }
        Ok(HttpRequest {
            method,
            url,
            query: Vec::new(),
            headers,
            body: Some(body),
        })
    }
}

impl<C: HttpClient> std::fmt::Debug for HttpRemote<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

/// Parses `_updated`, which services emit either as RFC 2822 or RFC 3339.
pub fn parse_updated(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn meta_tag(object: &Map<String, Value>) -> RemoteResult<VersionTag> {
    object
        .get("_etag")
        .and_then(Value::as_str)
        .map(VersionTag::new)
        .ok_or_else(|| RemoteError::transport_fatal("response without _etag"))
}

fn meta_updated(object: &Map<String, Value>) -> RemoteResult<DateTime<Utc>> {
    object
        .get("_updated")
        .and_then(Value::as_str)
        .and_then(parse_updated)
        .ok_or_else(|| RemoteError::transport_fatal("response without a valid _updated"))
}

fn record_from(key: String, object: Map<String, Value>) -> RemoteResult<RemoteRecord> {
    let version = meta_tag(&object)?;
    let updated_at = meta_updated(&object)?;
    let payload: Map<String, Value> = object
        .into_iter()
        .filter(|(field, _)| !field.starts_with('_'))
        .collect();
    Ok(RemoteRecord {
        key,
        version,
        updated_at,
        payload: Value::Object(payload),
    })
}

fn ack_from(key: &str, object: &Map<String, Value>) -> RemoteResult<Ack> {
    Ok(Ack {
        key: key.to_string(),
        version: meta_tag(object)?,
        updated_at: meta_updated(object).unwrap_or_else(|_| Utc::now()),
    })
}

fn list_params(query: &ListQuery) -> Vec<(String, String)> {
    let mut params = Vec::new();
    if !query.filter.is_empty() {
        let filter: Map<String, Value> = query.filter.iter().cloned().collect();
        params.push(("where".to_string(), Value::Object(filter).to_string()));
    }
    if let Some((field, order)) = &query.sort {
        let direction = match order {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        };
        params.push(("sort".to_string(), format!("[(\"{field}\", {direction})]")));
    }
    if let Some(limit) = query.limit {
        params.push(("max_results".to_string(), limit.to_string()));
    }
    params
}

impl<C: HttpClient> RemoteStore for HttpRemote<C> {
    fn get(&self, key: &str) -> RemoteResult<RemoteRecord> {
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: self.item_url(key),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        };
        let object = self.exchange(key, request, None)?;
        record_from(key.to_string(), object)
    }

    fn create(&self, key: &str, payload: &Value) -> RemoteResult<Ack> {
        let request = self.write_request(HttpMethod::Post, self.collection_url(), payload, None)?;
        let object = self.exchange(key, request, None)?;
        ack_from(key, &object)
    }

    fn update(&self, key: &str, payload: &Value, version: &VersionTag) -> RemoteResult<Ack> {
        let request =
            self.write_request(HttpMethod::Patch, self.item_url(key), payload, Some(version))?;
        let object = self.exchange(key, request, Some(version))?;
        ack_from(key, &object)
    }

    fn list(&self, query: &ListQuery) -> RemoteResult<Vec<RemoteRecord>> {
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: self.collection_url(),
            query: list_params(query),
            headers: Vec::new(),
            body: None,
        };
        let mut object = self.exchange(&self.resource, request, None)?;
        let items = match object.remove("_items") {
            Some(Value::Array(items)) => items,
            _ => return Ok(Vec::new()),
        };

        items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(item) => Some(item),
                _ => None,
            })
            .map(|item| {
                let key = item
                    .get("_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                record_from(key, item)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<HttpResponse, String>>>,
        sent: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedClient {
        fn reply(&self, status: u16, body: Value) {
            self.responses.lock().push_back(Ok(HttpResponse {
                status,
                body: body.to_string().into_bytes(),
            }));
        }

        fn drop_connection(&self) {
            self.responses.lock().push_back(Err("connection reset".into()));
        }
    }

    impl HttpClient for &ScriptedClient {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, String> {
            self.sent.lock().push(request.clone());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted response".into()))
        }
    }

    const UPDATED: &str = "Tue, 10 Jan 2023 10:00:00 GMT";

    #[test]
    fn get_strips_metadata() {
        let client = ScriptedClient::default();
        client.reply(
            200,
            json!({"_id": "x1", "_etag": "e1", "_updated": UPDATED, "contractId": "C1"}),
        );
        let remote = HttpRemote::new("https://api.example.com/", "contracts", &client);

        let record = remote.get("C1").unwrap();
        assert_eq!(record.version.as_str(), "e1");
        assert_eq!(record.payload, json!({"contractId": "C1"}));
        assert_eq!(record.updated_at.to_rfc3339(), "2023-01-10T10:00:00+00:00");
        assert_eq!(client.sent.lock()[0].url, "https://api.example.com/contracts/C1");
    }

    #[test]
    fn status_mapping() {
        let client = ScriptedClient::default();
        let remote = HttpRemote::new("https://api.example.com", "contracts", &client);

        client.reply(404, json!({"_status": "ERR"}));
        assert!(remote.get("C1").unwrap_err().is_not_found());

        client.reply(412, json!({"_status": "ERR"}));
        assert!(remote
            .update("C1", &json!({}), &VersionTag::new("stale"))
            .unwrap_err()
            .is_conflict());

        client.reply(503, json!({}));
        assert!(remote.get("C1").unwrap_err().is_retryable());

        client.drop_connection();
        assert!(remote.get("C1").unwrap_err().is_retryable());
        assert!(remote.last_error().is_some());

        client.reply(422, json!({"_status": "ERR", "_error": "bad field"}));
        let err = remote.create("C1", &json!({})).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn write_without_ok_status_is_rejected() {
        let client = ScriptedClient::default();
        client.reply(200, json!({"_status": "ERR", "_etag": "e2"}));
        let remote = HttpRemote::new("https://api.example.com", "contracts", &client);

        let err = remote.create("C1", &json!({"contractId": "C1"})).unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("rejected ("));
    }

    #[test]
    fn update_sends_if_match() {
        let client = ScriptedClient::default();
        client.reply(200, json!({"_status": "OK", "_etag": "e2", "_updated": UPDATED}));
        let remote = HttpRemote::new("https://api.example.com", "contracts", &client);

        let ack = remote
            .update("C1", &json!({"power": 5.5}), &VersionTag::new("e1"))
            .unwrap();
        assert_eq!(ack.version.as_str(), "e2");
        assert!(remote.last_error().is_none());

        let sent = client.sent.lock();
        assert_eq!(sent[0].method, HttpMethod::Patch);
        assert!(sent[0]
            .headers
            .contains(&("If-Match".to_string(), "e1".to_string())));
    }

    #[test]
    fn list_builds_query() {
        let client = ScriptedClient::default();
        client.reply(
            200,
            json!({"_items": [
                {"_id": "x1", "_etag": "e1", "_updated": "2023-01-10T10:00:00Z", "contractId": "C1"}
            ]}),
        );
        let remote = HttpRemote::new("https://api.example.com", "contracts", &client);

        let records = remote.list(&ListQuery::latest()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "x1");

        let sent = client.sent.lock();
        assert!(sent[0]
            .query
            .contains(&("sort".to_string(), "[(\"_updated\", -1)]".to_string())));
        assert!(sent[0]
            .query
            .contains(&("max_results".to_string(), "1".to_string())));
    }

    #[test]
    fn updated_formats() {
        assert!(parse_updated(UPDATED).is_some());
        assert!(parse_updated("2023-01-10T10:00:00+01:00").is_some());
        assert!(parse_updated("yesterday").is_none());
    }
}
