//! Per-item replication outcomes and the batch result they fold into.
//!
//! The serialized form of [`BatchResult`] is the audit record of a run:
//!
//! ```json
//! {"cditems": {"created": [..], "updated": [..],
//!              "create_errors": [{"data": .., "error": {"status": 400, "body": ..}}],
//!              "update_errors": [..]}}
//! ```
//!
//! Empty buckets are omitted.

use crate::{RemoteError, Response};
use clearcode_store::EndpointName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Why a create or update did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// HTTP status, absent when no response was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Response body (parsed as JSON when possible) or the transport failure message.
    pub body: Value,
}

impl ErrorDetail {
    pub fn from_response(response: &Response) -> Self {
        let body = serde_json::from_str(&response.body)
            .unwrap_or_else(|_| Value::String(response.body.clone()));
        Self {
            status: Some(response.status),
            body,
        }
    }

    pub fn from_error(error: &RemoteError) -> Self {
        Self {
            status: None,
            body: Value::String(error.to_string()),
        }
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(code) => write!(f, "HTTP {code}: {}", self.body),
            None => write!(f, "{}", self.body),
        }
    }
}

/// A payload that failed, together with the failure detail, so it can be retried selectively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub data: Value,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeTag {
    Created,
    Updated,
    CreateError,
    UpdateError,
}

impl std::fmt::Display for OutcomeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeTag::Created => write!(f, "created"),
            OutcomeTag::Updated => write!(f, "updated"),
            OutcomeTag::CreateError => write!(f, "create_error"),
            OutcomeTag::UpdateError => write!(f, "update_error"),
        }
    }
}

/// Disposition of one replicated item.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Created(Value),
    Updated(Value),
    CreateError(FailedItem),
    UpdateError(FailedItem),
}

impl Outcome {
    pub fn tag(&self) -> OutcomeTag {
        match self {
            Outcome::Created(_) => OutcomeTag::Created,
            Outcome::Updated(_) => OutcomeTag::Updated,
            Outcome::CreateError(_) => OutcomeTag::CreateError,
            Outcome::UpdateError(_) => OutcomeTag::UpdateError,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::CreateError(_) | Outcome::UpdateError(_))
    }

    pub fn payload(&self) -> &Value {
        match self {
            Outcome::Created(data) | Outcome::Updated(data) => data,
            Outcome::CreateError(failed) | Outcome::UpdateError(failed) => &failed.data,
        }
    }
}

/// Outcomes of one endpoint, partitioned by tag in processing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create_errors: Vec<FailedItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_errors: Vec<FailedItem>,
}

impl EndpointResult {
    pub fn push(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created(data) => self.created.push(data),
            Outcome::Updated(data) => self.updated.push(data),
            Outcome::CreateError(failed) => self.create_errors.push(failed),
            Outcome::UpdateError(failed) => self.update_errors.push(failed),
        }
    }

    pub fn count(&self, tag: OutcomeTag) -> usize {
        match tag {
            OutcomeTag::Created => self.created.len(),
            OutcomeTag::Updated => self.updated.len(),
            OutcomeTag::CreateError => self.create_errors.len(),
            OutcomeTag::UpdateError => self.update_errors.len(),
        }
    }

    pub fn error_count(&self) -> usize {
        self.create_errors.len() + self.update_errors.len()
    }

    pub fn total(&self) -> usize {
        self.created.len() + self.updated.len() + self.error_count()
    }
}

/// Result of a batch: outcomes per endpoint. Read-only once produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchResult {
    endpoints: BTreeMap<EndpointName, EndpointResult>,
}

impl BatchResult {
    pub fn endpoint(&self, name: &str) -> Option<&EndpointResult> {
        self.endpoints.get(&EndpointName::from(name))
    }

    pub fn endpoints(&self) -> impl Iterator<Item = (&EndpointName, &EndpointResult)> {
        self.endpoints.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.endpoint(name).is_some()
    }

    pub fn total_items(&self) -> usize {
        self.endpoints.values().map(EndpointResult::total).sum()
    }

    pub fn error_count(&self) -> usize {
        self.endpoints.values().map(EndpointResult::error_count).sum()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn to_json_pretty(&self) -> Result<String, RemoteError> {
        serde_json::to_string_pretty(self).map_err(|e| RemoteError::Serialization(e.to_string()))
    }
}

/// Thread-safe accumulator of outcomes. `record` may be called from several
/// workers; [`finalize`](Self::finalize) yields the immutable result.
#[derive(Debug, Default)]
pub struct BatchAggregator {
    endpoints: Mutex<BTreeMap<EndpointName, EndpointResult>>,
}

impl BatchAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint so it appears in the result even if it had no items.
    pub fn begin_endpoint(&self, endpoint: &EndpointName) {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(endpoint.clone())
            .or_default();
    }

    pub fn record(&self, endpoint: &EndpointName, outcome: Outcome) {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(endpoint.clone())
            .or_default()
            .push(outcome);
    }

    pub fn recorded(&self) -> usize {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(EndpointResult::total)
            .sum()
    }

    /// Copy of what has been recorded so far. Not the final result while
    /// items are still in flight.
    pub fn snapshot(&self) -> BatchResult {
        BatchResult {
            endpoints: self
                .endpoints
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    pub fn finalize(self) -> BatchResult {
        BatchResult {
            endpoints: self
                .endpoints
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}
