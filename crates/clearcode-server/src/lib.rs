//! Reference HTTP target for the ClearCode replication endpoint protocol.
//!
//! Serves a fixed set of endpoints (collections), each a keyed set of JSON
//! records:
//!
//! - `GET  /{endpoint}/`        list identity keys (404 for unknown endpoints)
//! - `GET  /{endpoint}/{key}/`  fetch one record
//! - `PUT  /{endpoint}/{key}/`  replace an existing record
//! - `POST /{endpoint}/`        create a record keyed by its identity field
//! - `GET  /health`
//!
//! Records live in a [`FileItemStore`] under path `{endpoint}/{key}`.
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use clearcode_store::{FileItemStore, ItemStore, ListFilter, StoreError};
use percent_encoding::percent_decode_str;
use serde_json::{json, Value};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, error, info};

pub const DEFAULT_IDENTITY_FIELD: &str = "uuid";

/// Result of a create or update against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    Written,
    Missing,
    Conflict,
}

/// Endpoint-scoped record storage.
pub struct EndpointStore {
    items: FileItemStore,
    endpoints: BTreeSet<String>,
    identity_field: String,
    /// Serializes the check-then-write of creates and updates.
    write_lock: Mutex<()>,
}

impl EndpointStore {
    pub fn open<I, S>(data_dir: &Path, endpoints: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            items: FileItemStore::open(data_dir)?,
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            identity_field: DEFAULT_IDENTITY_FIELD.to_owned(),
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn with_identity_field(mut self, field: &str) -> Self {
        field.clone_into(&mut self.identity_field);
        self
    }

    pub fn data_dir(&self) -> &Path {
        self.items.layout().root()
    }

    pub fn has_endpoint(&self, endpoint: &str) -> bool {
        self.endpoints.contains(endpoint)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(String::as_str)
    }

    fn record_path(endpoint: &str, key: &str) -> String {
        format!("{endpoint}/{key}")
    }

    /// Identity of `payload`, as the string used in URLs.
    pub fn identity_of(&self, payload: &Value) -> Option<String> {
        match payload.get(&self.identity_field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) if n.is_u64() || n.is_i64() => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn keys(&self, endpoint: &str) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{endpoint}/");
        let mut keys = Vec::new();
        for item in self.items.list(&ListFilter::all().with_prefix(prefix.as_str()))? {
            let item = item?;
            if let Some(key) = item.path.strip_prefix(&prefix) {
                keys.push(key.to_owned());
            }
        }
        Ok(keys)
    }

    pub fn get(&self, endpoint: &str, key: &str) -> Result<Option<Value>, StoreError> {
        match self.items.get(&Self::record_path(endpoint, key)) {
            Ok(item) => Ok(Some(item.content)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn create(&self, endpoint: &str, key: &str, payload: &Value) -> Result<WriteStatus, StoreError> {
        let path = Self::record_path(endpoint, key);
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.items.exists(&path)? {
            return Ok(WriteStatus::Conflict);
        }
        self.items.put(&path, payload)?;
        Ok(WriteStatus::Written)
    }

    pub fn update(&self, endpoint: &str, key: &str, payload: &Value) -> Result<WriteStatus, StoreError> {
        let path = Self::record_path(endpoint, key);
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.items.exists(&path)? {
            return Ok(WriteStatus::Missing);
        }
        self.items.put(&path, payload)?;
        Ok(WriteStatus::Written)
    }
}

/// A parsed request path.
#[derive(Debug, PartialEq, Eq)]
pub enum Route<'a> {
    Health,
    Collection(&'a str),
    Record(&'a str, Cow<'a, str>),
}

/// Parse `/health`, `/{endpoint}/` or `/{endpoint}/{key}/` (trailing slash optional,
/// query string ignored). The key segment is percent-decoded; keys that decode to
/// invalid UTF-8 or contain '/' do not route.
pub fn parse_route(url: &str) -> Option<Route<'_>> {
    let path = url.split('?').next().unwrap_or_default();
    let path = path.strip_prefix('/')?;
    let path = path.strip_suffix('/').unwrap_or(path);
    if path == "health" {
        return Some(Route::Health);
    }
    let mut parts = path.split('/');
    let endpoint = parts.next().filter(|e| !e.is_empty())?;
    match (parts.next(), parts.next()) {
        (None, _) => Some(Route::Collection(endpoint)),
        (Some(key), None) if !key.is_empty() => {
            let key = percent_decode_str(key).decode_utf8().ok()?;
            (!key.contains('/')).then_some(Route::Record(endpoint, key))
        }
        _ => None,
    }
}

fn respond_json(req: tiny_http::Request, code: u16, body: &Value) {
    let header = Header::from_bytes("Content-Type", "application/json").expect("valid header");
    let _ = req.respond(
        Response::from_string(body.to_string())
            .with_status_code(StatusCode(code))
            .with_header(header),
    );
}

fn respond_err(req: tiny_http::Request, code: u16, msg: &str) {
    respond_json(req, code, &json!({ "detail": msg }));
}

fn read_json(req: &mut tiny_http::Request) -> Result<Value, String> {
    let mut body = Vec::new();
    req.as_reader()
        .read_to_end(&mut body)
        .map_err(|e| format!("read error: {e}"))?;
    serde_json::from_slice(&body).map_err(|e| format!("JSON parse error - {e}"))
}

fn store_failure(req: tiny_http::Request, context: &str, e: &StoreError) {
    error!("{context}: {e}");
    respond_err(req, 500, &format!("storage error: {e}"));
}

fn handle_collection(store: &EndpointStore, mut req: tiny_http::Request, method: &Method, endpoint: &str) {
    match *method {
        Method::Get => match store.keys(endpoint) {
            Ok(keys) => respond_json(req, 200, &json!(keys)),
            Err(e) => store_failure(req, &format!("GET /{endpoint}/"), &e),
        },
        Method::Post => {
            let payload = match read_json(&mut req) {
                Ok(p) => p,
                Err(msg) => return respond_err(req, 400, &msg),
            };
            let Some(key) = store.identity_of(&payload) else {
                return respond_err(req, 400, &format!("'{}' field is required", store.identity_field));
            };
            if key.contains('/') {
                return respond_err(req, 400, "identity must not contain '/'");
            }
            match store.create(endpoint, &key, &payload) {
                Ok(WriteStatus::Written) => {
                    info!("created {endpoint}/{key}");
                    respond_json(req, 201, &payload);
                }
                Ok(_) => respond_err(req, 409, &format!("{endpoint} with this {} already exists", store.identity_field)),
                Err(e) => store_failure(req, &format!("POST /{endpoint}/"), &e),
            }
        }
        _ => respond_err(req, 405, "method not allowed"),
    }
}

fn handle_record(
    store: &EndpointStore,
    mut req: tiny_http::Request,
    method: &Method,
    endpoint: &str,
    key: &str,
) {
    match *method {
        Method::Get => match store.get(endpoint, key) {
            Ok(Some(payload)) => respond_json(req, 200, &payload),
            Ok(None) => respond_err(req, 404, "Not found."),
            Err(e) => store_failure(req, &format!("GET /{endpoint}/{key}/"), &e),
        },
        Method::Put => {
            let payload = match read_json(&mut req) {
                Ok(p) => p,
                Err(msg) => return respond_err(req, 400, &msg),
            };
            if store.identity_of(&payload).is_some_and(|id| id != key) {
                return respond_err(req, 400, &format!("'{}' does not match the URL", store.identity_field));
            }
            match store.update(endpoint, key, &payload) {
                Ok(WriteStatus::Written) => {
                    info!("updated {endpoint}/{key}");
                    respond_json(req, 200, &payload);
                }
                Ok(_) => respond_err(req, 404, "Not found."),
                Err(e) => store_failure(req, &format!("PUT /{endpoint}/{key}/"), &e),
            }
        }
        _ => respond_err(req, 405, "method not allowed"),
    }
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(store: &EndpointStore, req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    match parse_route(&url) {
        Some(Route::Health) if method == Method::Get => {
            respond_json(req, 200, &json!({"status": "ok"}));
        }
        Some(Route::Collection(endpoint)) if store.has_endpoint(endpoint) => {
            handle_collection(store, req, &method, endpoint);
        }
        Some(Route::Record(endpoint, key)) if store.has_endpoint(endpoint) => {
            handle_record(store, req, &method, endpoint, &key);
        }
        _ => respond_err(req, 404, "Not found."),
    }
}

/// Bind `addr` and serve requests, blocking the current thread.
pub fn run_server(
    store: &Arc<EndpointStore>,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let server = Server::http(addr)?;
    for request in server.incoming_requests() {
        handle_request(store, request);
    }
    Ok(())
}

/// A test helper that starts a clearcode-server on a random port in a background thread.
///
/// Dropping the `TestServer` stops the accept loop.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub store: Arc<EndpointStore>,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server serving `cditems`, bound to `127.0.0.1:0`.
    pub fn start(data_dir: PathBuf) -> Self {
        Self::start_with_endpoints(data_dir, &["cditems"])
    }

    pub fn start_with_endpoints(data_dir: PathBuf, endpoints: &[&str]) -> Self {
        fs::create_dir_all(&data_dir).expect("failed to create test data dir");
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let store = Arc::new(
            EndpointStore::open(&data_dir, endpoints.iter().copied())
                .expect("failed to open test store"),
        );
        let srv = Arc::clone(&server);
        let handler_store = Arc::clone(&store);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                handle_request(&handler_store, request);
            }
        });

        Self {
            url,
            port,
            data_dir,
            store,
            server,
            _handle: handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
