//! HTTP client ↔ server end-to-end tests.
//!
//! These start a real `clearcode-server` in-process on a random port and
//! drive it with the real `HttpTransport` and `Replicator`. No mocks.

use clearcode_remote::{
    BackupSet, HttpTransport, RemoteConfig, Replicator, Transport, write_results,
    write_store_backup,
};
use clearcode_server::TestServer;
use clearcode_store::{EndpointName, ItemStore, ListFilter, MemoryItemStore};
use serde_json::{json, Value};

fn start_server() -> (TestServer, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path().to_path_buf());
    (server, dir)
}

fn client(url: &str) -> HttpTransport {
    HttpTransport::new(RemoteConfig::new(url).with_timeout_secs(5))
}

fn item(n: u32) -> Value {
    json!({"uuid": format!("item{n}"), "path": format!("npm/npmjs/-/pkg{n}.json")})
}

fn cditems() -> EndpointName {
    EndpointName::from("cditems")
}

#[test]
fn health_endpoint() {
    let (server, _dir) = start_server();
    let resp = client(&server.url)
        .fetch(&format!("{}/health", server.url))
        .unwrap();
    assert_eq!(resp.status, 200);
    assert!(resp.body.contains("ok"));
}

#[test]
fn first_copy_creates_second_copy_updates() {
    let (server, _dir) = start_server();
    let transport = client(&server.url);
    let config = RemoteConfig::new(&server.url);
    let replicator = Replicator::new(&transport, &config);
    let payloads: Vec<Value> = (1..=3).map(item).collect();

    let first = replicator.replicate_all(vec![(cditems(), payloads.clone())]);
    let r = first.result.endpoint("cditems").unwrap();
    assert_eq!(r.created, payloads);
    assert!(r.updated.is_empty());
    assert!(!first.result.has_errors());

    let second = replicator.replicate_all(vec![(cditems(), payloads.clone())]);
    let r = second.result.endpoint("cditems").unwrap();
    assert_eq!(r.updated, payloads);
    assert!(r.created.is_empty());

    assert_eq!(
        server.store.keys("cditems").unwrap(),
        vec!["item1", "item2", "item3"]
    );
}

#[test]
fn reserved_characters_in_identity_survive_two_copies() {
    let (server, _dir) = start_server();
    let transport = client(&server.url);
    let replicator = Replicator::new(&transport, &RemoteConfig::new(&server.url));
    let payloads: Vec<Value> = ["a?b", "a b", "a#b", "café"]
        .iter()
        .map(|key| json!({"uuid": key, "path": format!("keys/{key}")}))
        .collect();

    let first = replicator.replicate_all(vec![(cditems(), payloads.clone())]);
    let r = first.result.endpoint("cditems").unwrap();
    assert_eq!(r.created, payloads);
    assert!(!first.result.has_errors());

    let second = replicator.replicate_all(vec![(cditems(), payloads.clone())]);
    let r = second.result.endpoint("cditems").unwrap();
    assert_eq!(r.updated, payloads);
    assert!(r.created.is_empty());
    assert!(!second.result.has_errors());

    assert_eq!(server.store.keys("cditems").unwrap().len(), 4);
    assert_eq!(
        server.store.get("cditems", "a?b").unwrap(),
        Some(payloads[0].clone())
    );
}

#[test]
fn update_replaces_target_record() {
    let (server, _dir) = start_server();
    let transport = client(&server.url);
    let replicator = Replicator::new(&transport, &RemoteConfig::new(&server.url));

    replicator.replicate_all(vec![(cditems(), vec![json!({"uuid": "u", "v": 1})])]);
    replicator.replicate_all(vec![(cditems(), vec![json!({"uuid": "u", "v": 2})])]);

    assert_eq!(
        server.store.get("cditems", "u").unwrap(),
        Some(json!({"uuid": "u", "v": 2}))
    );
}

#[test]
fn unknown_endpoint_is_skipped() {
    let (server, _dir) = start_server();
    let transport = client(&server.url);
    let replicator = Replicator::new(&transport, &RemoteConfig::new(&server.url));

    let run = replicator.replicate_all(vec![
        (EndpointName::from("scans"), vec![item(1)]),
        (cditems(), vec![item(2)]),
    ]);
    assert_eq!(run.skipped.len(), 1);
    assert_eq!(run.skipped[0].endpoint, "scans");
    assert!(!run.result.contains("scans"));
    assert_eq!(run.result.endpoint("cditems").unwrap().created, vec![item(2)]);
}

#[test]
fn rejected_payload_is_create_error_with_body() {
    let (server, _dir) = start_server();
    let transport = client(&server.url);
    let replicator = Replicator::new(&transport, &RemoteConfig::new(&server.url));

    let no_identity = json!({"path": "missing/uuid.json"});
    let run = replicator.replicate_all(vec![(cditems(), vec![no_identity.clone(), item(1)])]);
    let r = run.result.endpoint("cditems").unwrap();

    assert_eq!(r.create_errors.len(), 1);
    assert_eq!(r.create_errors[0].data, no_identity);
    assert_eq!(r.create_errors[0].error.status, Some(400));
    assert!(r.create_errors[0].error.body["detail"]
        .as_str()
        .unwrap()
        .contains("uuid"));
    assert_eq!(r.created, vec![item(1)]);
}

#[test]
fn raw_protocol_statuses() {
    let (server, _dir) = start_server();
    let t = client(&server.url);
    let collection = format!("{}/cditems/", server.url);

    assert_eq!(t.fetch(&collection).unwrap().body, "[]");
    assert_eq!(t.fetch(&format!("{}/scans/", server.url)).unwrap().status, 404);
    assert_eq!(
        t.send(&collection, clearcode_remote::Method::Post, &item(1))
            .unwrap()
            .status,
        201
    );
    assert_eq!(
        t.send(&collection, clearcode_remote::Method::Post, &item(1))
            .unwrap()
            .status,
        409
    );
    let missing = format!("{}/cditems/nope/", server.url);
    assert_eq!(
        t.send(&missing, clearcode_remote::Method::Put, &json!({"uuid": "nope"}))
            .unwrap()
            .status,
        404
    );
    let mismatch = format!("{}/cditems/item1/", server.url);
    assert_eq!(
        t.send(&mismatch, clearcode_remote::Method::Put, &json!({"uuid": "other"}))
            .unwrap()
            .status,
        400
    );
}

#[test]
fn parallel_workers_against_real_server() {
    let (server, _dir) = start_server();
    let transport = client(&server.url);
    let config = RemoteConfig::new(&server.url).with_workers(4);
    let replicator = Replicator::new(&transport, &config);
    let payloads: Vec<Value> = (0..24).map(item).collect();

    let run = replicator.replicate_all(vec![(cditems(), payloads.clone())]);
    let r = run.result.endpoint("cditems").unwrap();
    assert_eq!(r.created, payloads);
    assert_eq!(server.store.keys("cditems").unwrap().len(), 24);
}

#[test]
fn store_backup_then_copy_roundtrip() {
    let (server, _dir) = start_server();
    let store = MemoryItemStore::new();
    store.put("npm/npmjs/-/a/1.0.json", &json!({"license": "MIT"})).unwrap();
    store.put("npm/npmjs/-/b/2.0.json", &json!({"license": "BSD"})).unwrap();

    let backup_parent = tempfile::tempdir().unwrap();
    let backup = BackupSet::create_in(backup_parent.path()).unwrap();
    let exported = write_store_backup(&store, &backup, &cditems(), &ListFilter::all()).unwrap();
    assert_eq!(exported, 2);

    let transport = client(&server.url);
    let replicator = Replicator::new(&transport, &RemoteConfig::new(&server.url));
    let payloads = backup.load("cditems").unwrap().unwrap();
    let run = replicator.replicate_all(vec![(cditems(), payloads)]);
    assert_eq!(run.result.endpoint("cditems").unwrap().created.len(), 2);

    let results = write_results(backup_parent.path(), &run.result).unwrap();
    let saved: Value = serde_json::from_str(&std::fs::read_to_string(results).unwrap()).unwrap();
    assert_eq!(saved["cditems"]["created"].as_array().unwrap().len(), 2);
    assert_eq!(server.store.keys("cditems").unwrap().len(), 2);
}
