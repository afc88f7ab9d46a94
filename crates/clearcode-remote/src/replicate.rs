//! Probe-then-create-or-update replication of record collections to a target.
//!
//! For each endpoint the target must first answer `GET {root}/{endpoint}/`
//! with 200, otherwise the endpoint is skipped (older targets may not expose
//! every collection). Each record is then handled on its own:
//!
//! 1. `GET {root}/{endpoint}/{key}/`; exactly 200 means the record exists.
//! 2. Existing records are sent with `PUT` to the same URL; 200 is `updated`.
//! 3. Missing records are sent with `POST {root}/{endpoint}/`; 201 is `created`.
//!
//! Anything else becomes a `create_error`/`update_error` carrying the response.
//! A probe that fails at the transport level counts as "absent" so the record
//! is still attempted. No record's result influences any other record.

use crate::report::{BatchAggregator, BatchResult, ErrorDetail, FailedItem, Outcome};
use crate::{Method, RemoteConfig, Transport, STATUS_CONFLICT, STATUS_CREATED, STATUS_OK};
use clearcode_store::{EndpointName, IdentityKey};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Bytes escaped when an identity key becomes a single URL path segment.
pub const KEY_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Read the identity key of a payload from `field`. Strings and integers are
/// accepted; anything else (or an empty string) means "no identity".
pub fn identity_key(payload: &Value, field: &str) -> Option<IdentityKey> {
    match payload.get(field)? {
        Value::String(s) if !s.is_empty() => Some(IdentityKey::new(s.as_str())),
        Value::Number(n) if n.is_u64() || n.is_i64() => Some(IdentityKey::new(n.to_string())),
        _ => None,
    }
}

/// How an endpoint's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointStatus {
    Completed { processed: usize },
    Unavailable { reason: String },
    Cancelled { processed: usize, remaining: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEndpoint {
    pub endpoint: EndpointName,
    pub reason: String,
}

/// Everything a batch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRun {
    pub result: BatchResult,
    pub skipped: Vec<SkippedEndpoint>,
    /// Items never scheduled because the run was cancelled.
    pub unprocessed: usize,
}

/// Stops a running batch from scheduling further items.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Replicator<'a> {
    transport: &'a dyn Transport,
    root: String,
    identity_field: String,
    workers: usize,
    conflict_retries: u32,
    cancel: CancelHandle,
}

impl<'a> Replicator<'a> {
    pub fn new(transport: &'a dyn Transport, config: &RemoteConfig) -> Self {
        Self {
            transport,
            root: config.url.trim_end_matches('/').to_owned(),
            identity_field: config.identity_field.clone(),
            workers: config.workers.max(1),
            conflict_retries: config.conflict_retries,
            cancel: CancelHandle::default(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}/", self.root)
    }

    /// `{root}/{endpoint}/{key}/` with the key percent-encoded as one segment.
    pub fn item_url(&self, endpoint: &str, key: &IdentityKey) -> String {
        let segment = utf8_percent_encode(key, KEY_SEGMENT);
        format!("{}/{endpoint}/{segment}/", self.root)
    }

    /// Check that the target exposes `endpoint`. `Err` carries the reason it is skipped.
    pub fn probe_endpoint(&self, endpoint: &EndpointName) -> Result<(), String> {
        let url = self.endpoint_url(endpoint);
        match self.transport.fetch(&url) {
            Ok(resp) if resp.status == STATUS_OK => Ok(()),
            Ok(resp) => Err(format!("HTTP {} for GET {url}", resp.status)),
            Err(e) => Err(e.to_string()),
        }
    }

    fn probe_item(&self, endpoint: &EndpointName, key: &IdentityKey) -> bool {
        let url = self.item_url(endpoint, key);
        match self.transport.fetch(&url) {
            Ok(resp) => {
                debug!("GET {url} -> {}", resp.status);
                resp.status == STATUS_OK
            }
            Err(e) => {
                warn!("existence probe failed for {url}, treating as absent: {e}");
                false
            }
        }
    }

    fn update(&self, endpoint: &EndpointName, key: &IdentityKey, payload: &Value) -> Outcome {
        let url = self.item_url(endpoint, key);
        let error = match self.transport.send(&url, Method::Put, payload) {
            Ok(resp) if resp.status == STATUS_OK => return Outcome::Updated(payload.clone()),
            Ok(resp) => ErrorDetail::from_response(&resp),
            Err(e) => ErrorDetail::from_error(&e),
        };
        warn!("update error for {endpoint}/{key}: {error}");
        Outcome::UpdateError(FailedItem {
            data: payload.clone(),
            error,
        })
    }

    fn create(&self, endpoint: &EndpointName, key: Option<&IdentityKey>, payload: &Value) -> Outcome {
        let url = self.endpoint_url(endpoint);
        let mut reprobes = 0;
        let error = loop {
            match self.transport.send(&url, Method::Post, payload) {
                Ok(resp) if resp.status == STATUS_CREATED => {
                    return Outcome::Created(payload.clone());
                }
                // Created concurrently since our probe: re-probe and update instead.
                Ok(resp) if resp.status == STATUS_CONFLICT && reprobes < self.conflict_retries => {
                    let Some(key) = key else {
                        break ErrorDetail::from_response(&resp);
                    };
                    reprobes += 1;
                    debug!("POST {url} conflicted for {key}, re-probing ({reprobes})");
                    if self.probe_item(endpoint, key) {
                        return self.update(endpoint, key, payload);
                    }
                }
                Ok(resp) => break ErrorDetail::from_response(&resp),
                Err(e) => break ErrorDetail::from_error(&e),
            }
        };
        warn!(
            "create error for {endpoint}/{}: {error}",
            key.map_or("<no identity>", IdentityKey::as_str)
        );
        Outcome::CreateError(FailedItem {
            data: payload.clone(),
            error,
        })
    }

    /// Replicate one payload. Always yields exactly one outcome.
    pub fn replicate_item(&self, endpoint: &EndpointName, payload: &Value) -> Outcome {
        let key = identity_key(payload, &self.identity_field);
        match &key {
            Some(key) if self.probe_item(endpoint, key) => self.update(endpoint, key, payload),
            Some(_) => self.create(endpoint, key.as_ref(), payload),
            None => {
                warn!(
                    "{endpoint} payload has no '{}' field, sending as a new record",
                    self.identity_field
                );
                self.create(endpoint, None, payload)
            }
        }
    }

    /// Run every payload, returning outcomes in source order. `None` marks
    /// payloads never scheduled because of cancellation.
    fn run_items(
        &self,
        endpoint: &EndpointName,
        payloads: &[Value],
        progress: &(dyn Fn(&EndpointName, &Outcome) + Sync),
    ) -> Vec<Option<Outcome>> {
        if self.workers <= 1 || payloads.len() <= 1 {
            let mut outcomes = Vec::with_capacity(payloads.len());
            for payload in payloads {
                if self.cancel.is_cancelled() {
                    outcomes.push(None);
                    continue;
                }
                let outcome = self.replicate_item(endpoint, payload);
                progress(endpoint, &outcome);
                outcomes.push(Some(outcome));
            }
            return outcomes;
        }

        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<Outcome>>> = Mutex::new(vec![None; payloads.len()]);
        std::thread::scope(|s| {
            for _ in 0..self.workers.min(payloads.len()) {
                s.spawn(|| loop {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let Some(payload) = payloads.get(idx) else {
                        break;
                    };
                    let outcome = self.replicate_item(endpoint, payload);
                    progress(endpoint, &outcome);
                    slots.lock().unwrap_or_else(PoisonError::into_inner)[idx] = Some(outcome);
                });
            }
        });
        slots.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn replicate_endpoint(
        &self,
        endpoint: &EndpointName,
        payloads: &[Value],
        aggregator: &BatchAggregator,
    ) -> EndpointStatus {
        self.replicate_endpoint_with_progress(endpoint, payloads, aggregator, &|_, _| {})
    }

    /// Replicate one endpoint's payloads into `aggregator`, calling `progress`
    /// after each item. Outcomes are recorded in source order.
    pub fn replicate_endpoint_with_progress(
        &self,
        endpoint: &EndpointName,
        payloads: &[Value],
        aggregator: &BatchAggregator,
        progress: &(dyn Fn(&EndpointName, &Outcome) + Sync),
    ) -> EndpointStatus {
        if let Err(reason) = self.probe_endpoint(endpoint) {
            warn!("{endpoint} endpoint not available on target, skipped: {reason}");
            return EndpointStatus::Unavailable { reason };
        }

        info!("copying {} {endpoint}", payloads.len());
        aggregator.begin_endpoint(endpoint);
        let mut processed = 0;
        let mut remaining = 0;
        for outcome in self.run_items(endpoint, payloads, progress) {
            match outcome {
                Some(outcome) => {
                    aggregator.record(endpoint, outcome);
                    processed += 1;
                }
                None => remaining += 1,
            }
        }

        if remaining > 0 {
            warn!("{endpoint}: cancelled with {remaining} items not scheduled");
            EndpointStatus::Cancelled {
                processed,
                remaining,
            }
        } else {
            info!("{endpoint}: {processed} items processed");
            EndpointStatus::Completed { processed }
        }
    }

    /// Replicate several endpoints in order and produce the batch result.
    pub fn replicate_all<I>(&self, sources: I) -> BatchRun
    where
        I: IntoIterator<Item = (EndpointName, Vec<Value>)>,
    {
        let aggregator = BatchAggregator::new();
        let mut skipped = Vec::new();
        let mut unprocessed = 0;
        for (endpoint, payloads) in sources {
            if self.cancel.is_cancelled() {
                unprocessed += payloads.len();
                continue;
            }
            match self.replicate_endpoint(&endpoint, &payloads, &aggregator) {
                EndpointStatus::Unavailable { reason } => {
                    skipped.push(SkippedEndpoint { endpoint, reason });
                }
                EndpointStatus::Cancelled { remaining, .. } => unprocessed += remaining,
                EndpointStatus::Completed { .. } => {}
            }
        }
        BatchRun {
            result: aggregator.finalize(),
            skipped,
            unprocessed,
        }
    }
}
