//! Cross-instance replication for ClearCode item collections.
//!
//! This crate pushes collections of JSON records ("endpoints", e.g. `cditems`)
//! to a target deployment over a small REST protocol, deciding per record
//! between create and update after an existence probe. Every record gets
//! exactly one outcome; failures are recorded, never raised. It also provides
//! the HTTP transport, remote configuration, and the backup file format used
//! as the replication source.

pub mod backup;
pub mod config;
pub mod http;
pub mod replicate;
pub mod report;

pub use backup::{
    identity_for_path, latest_backup_dir, store_item_payload, write_results, write_store_backup,
    BackupSet, BACKUP_DIR_PREFIX,
};
pub use config::{RemoteConfig, TARGET_URL_ENV};
pub use http::HttpTransport;
pub use replicate::{
    identity_key, BatchRun, CancelHandle, EndpointStatus, Replicator, SkippedEndpoint,
};
pub use report::{
    BatchAggregator, BatchResult, EndpointResult, ErrorDetail, FailedItem, Outcome, OutcomeTag,
};

use serde_json::Value;
use thiserror::Error;

/// Protocol version sent as `X-Clearcode-Protocol` header on all HTTP requests.
pub const PROTOCOL_VERSION: u32 = 1;

/// Logical collections replicated by default.
pub const DEFAULT_ENDPOINTS: &[&str] = &["cditems"];

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("transport timeout: {0}")]
    Timeout(String),
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] clearcode_store::StoreError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("backup error: {0}")]
    Backup(String),
}

/// Methods that carry a JSON body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Put,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Put => write!(f, "PUT"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// Status and raw body of a completed HTTP exchange. Any status, including
/// 4xx/5xx, is a response; only transport-level failures are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Wire client used to reach a target deployment.
pub trait Transport: Send + Sync {
    /// `GET` a URL.
    fn fetch(&self, url: &str) -> Result<Response, RemoteError>;

    /// Send a JSON body with `PUT` or `POST`.
    fn send(&self, url: &str, method: Method, body: &Value) -> Result<Response, RemoteError>;
}
