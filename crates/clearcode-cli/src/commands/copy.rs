use super::{colorize_outcome, json_pretty, progress_bar, EXIT_FAILURE, EXIT_SUCCESS};
use clearcode_remote::{
    latest_backup_dir, write_results, BackupSet, BatchAggregator, CancelHandle, EndpointStatus,
    HttpTransport, OutcomeTag, RemoteConfig, Replicator, DEFAULT_ENDPOINTS,
};
use clearcode_store::EndpointName;
use dialoguer::Confirm;
use serde_json::Value;
use std::io::{stderr, stdin, IsTerminal};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct CopyArgs {
    pub target_url: Option<String>,
    pub backup_dir: Option<PathBuf>,
    pub yes: bool,
    pub endpoints: Vec<String>,
    pub workers: Option<usize>,
    pub timeout: Option<u64>,
    pub results_dir: PathBuf,
}

fn resolve_config(args: &CopyArgs) -> Result<RemoteConfig, String> {
    let mut config = RemoteConfig::resolve(args.target_url.as_deref()).map_err(|e| e.to_string())?;
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(secs) = args.timeout {
        config = config.with_timeout_secs(secs);
    }
    Ok(config)
}

/// The explicit backup directory, or the latest one under `search_dir` once
/// `confirm` accepts it. `Ok(None)` means the user declined.
fn resolve_backup_dir(
    args: &CopyArgs,
    search_dir: &Path,
    json: bool,
    confirm: &dyn Fn(&Path) -> Result<bool, String>,
) -> Result<Option<PathBuf>, String> {
    if let Some(dir) = &args.backup_dir {
        return Ok(Some(dir.clone()));
    }
    let latest = latest_backup_dir(search_dir)
        .map_err(|e| e.to_string())?
        .ok_or("backup directory not found; provide one with --backup-dir")?;
    if !json {
        println!("Latest backup directory found as \"{}\".", latest.display());
    }
    if args.yes {
        return Ok(Some(latest));
    }
    Ok(confirm(&latest)?.then_some(latest))
}

fn confirm_on_terminal(latest: &Path) -> Result<bool, String> {
    if !(stdin().is_terminal() && stderr().is_terminal()) {
        return Err(format!(
            "refusing to use \"{}\" without confirmation (pass --yes)",
            latest.display()
        ));
    }
    Confirm::new()
        .with_prompt("Proceed with this backup directory?")
        .default(false)
        .interact()
        .map_err(|e| format!("prompt failed: {e}"))
}

fn endpoint_names(args: &CopyArgs) -> Vec<EndpointName> {
    if args.endpoints.is_empty() {
        DEFAULT_ENDPOINTS.iter().map(|e| EndpointName::from(*e)).collect()
    } else {
        args.endpoints.iter().map(|e| EndpointName::from(e.as_str())).collect()
    }
}

fn title(endpoint: &str) -> String {
    let mut chars = endpoint.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

pub fn run(args: &CopyArgs, json: bool) -> Result<u8, String> {
    let config = resolve_config(args)?;
    let Some(backup_dir) = resolve_backup_dir(args, Path::new("."), json, &confirm_on_terminal)?
    else {
        println!("copy aborted");
        return Ok(EXIT_SUCCESS);
    };
    let backup = BackupSet::open(&backup_dir).map_err(|e| e.to_string())?;

    if !json {
        println!(
            "Importing objects from {} to {}",
            backup.dir().display(),
            config.url
        );
    }

    let mut sources: Vec<(EndpointName, Vec<Value>)> = Vec::new();
    let mut missing = Vec::new();
    for endpoint in endpoint_names(args) {
        match backup.load(&endpoint).map_err(|e| e.to_string())? {
            Some(payloads) => sources.push((endpoint, payloads)),
            None => {
                if !json {
                    println!("{} backup file is not available, skipped.", title(&endpoint));
                }
                missing.push(endpoint);
            }
        }
    }

    let transport = HttpTransport::new(config.clone());
    let replicator = Replicator::new(&transport, &config);
    install_interrupt_handler(replicator.cancel_handle());
    let aggregator = BatchAggregator::new();
    let run = replicate_sources(&replicator, &sources, &aggregator, json);

    let result = aggregator.finalize();
    std::fs::create_dir_all(&args.results_dir)
        .map_err(|e| format!("cannot create {}: {e}", args.results_dir.display()))?;
    let results_file = write_results(&args.results_dir, &result).map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "backup_dir": backup.dir(),
            "target_url": config.url,
            "results_file": results_file,
            "missing_backups": missing.iter().map(EndpointName::as_str).collect::<Vec<_>>(),
            "unavailable": run.unavailable,
            "cancelled": run.cancelled,
            "unprocessed": run.unprocessed,
            "result": result,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for (endpoint, r) in result.endpoints() {
            let counts: Vec<String> = [
                ("created", OutcomeTag::Created),
                ("updated", OutcomeTag::Updated),
                ("create_errors", OutcomeTag::CreateError),
                ("update_errors", OutcomeTag::UpdateError),
            ]
            .iter()
            .map(|(label, tag)| format!("{} {}", r.count(*tag), colorize_outcome(label)))
            .collect();
            println!("  {endpoint}: {}", counts.join(", "));
        }
        if run.cancelled {
            println!("Copy cancelled, {} items not copied.", run.unprocessed);
        } else {
            println!("Copy completed.");
        }
        println!("Results saved in {}", results_file.display());
    }
    Ok(if run.cancelled { EXIT_FAILURE } else { EXIT_SUCCESS })
}

/// First Ctrl-C stops scheduling new items; a second one exits immediately.
fn install_interrupt_handler(cancel: CancelHandle) {
    let result = ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            std::process::exit(1);
        }
        cancel.cancel();
        eprintln!("\ninterrupt received, finishing items in flight...");
    });
    if let Err(e) = result {
        tracing::warn!("cannot install interrupt handler: {e}");
    }
}

/// What a copy run left undone.
#[derive(Debug, Default, PartialEq)]
struct CopyRun {
    unavailable: Vec<Value>,
    unprocessed: usize,
    cancelled: bool,
}

fn replicate_sources(
    replicator: &Replicator<'_>,
    sources: &[(EndpointName, Vec<Value>)],
    aggregator: &BatchAggregator,
    json: bool,
) -> CopyRun {
    let cancel = replicator.cancel_handle();
    let mut run = CopyRun::default();
    for (endpoint, payloads) in sources {
        if cancel.is_cancelled() {
            run.cancelled = true;
            run.unprocessed += payloads.len();
            continue;
        }
        if !json {
            println!("Copying {} {endpoint}", payloads.len());
        }
        let pb = progress_bar(payloads.len(), json);
        pb.set_message(endpoint.to_string());
        let status = replicator.replicate_endpoint_with_progress(
            endpoint,
            payloads,
            aggregator,
            &|_, _| pb.inc(1),
        );
        pb.finish_and_clear();
        match status {
            EndpointStatus::Unavailable { reason } => {
                if !json {
                    println!("{} endpoint not available on target, skipped.", title(endpoint));
                }
                tracing::debug!("{endpoint} unavailable: {reason}");
                run.unavailable
                    .push(serde_json::json!({"endpoint": endpoint.as_str(), "reason": reason}));
            }
            EndpointStatus::Cancelled { processed, remaining } => {
                if !json {
                    println!("{} copy cancelled after {processed} items.", title(endpoint));
                }
                run.cancelled = true;
                run.unprocessed += remaining;
            }
            EndpointStatus::Completed { .. } => {}
        }
    }
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearcode_remote::{Method, RemoteError, Response, Transport};
    use std::sync::{Mutex, OnceLock};

    /// Target that knows every endpoint, holds no records and accepts every
    /// create. Once `cancel_after` creates were sent it cancels the run.
    #[derive(Default)]
    struct AcceptingTarget {
        cancel_after: usize,
        cancel: OnceLock<CancelHandle>,
        created: Mutex<Vec<Value>>,
    }

    impl Transport for AcceptingTarget {
        fn fetch(&self, url: &str) -> Result<Response, RemoteError> {
            let path = url.trim_start_matches("http://target/api/");
            let is_collection = path.trim_end_matches('/').split('/').count() == 1;
            Ok(Response::new(if is_collection { 200 } else { 404 }, "[]"))
        }

        fn send(&self, _url: &str, _method: Method, body: &Value) -> Result<Response, RemoteError> {
            let mut created = self.created.lock().unwrap();
            created.push(body.clone());
            if created.len() >= self.cancel_after {
                if let Some(cancel) = self.cancel.get() {
                    cancel.cancel();
                }
            }
            Ok(Response::new(201, "{}"))
        }
    }

    fn sources() -> Vec<(EndpointName, Vec<Value>)> {
        vec![
            (
                EndpointName::from("cditems"),
                (0..3).map(|n| serde_json::json!({"uuid": format!("c{n}")})).collect(),
            ),
            (
                EndpointName::from("scans"),
                (0..2).map(|n| serde_json::json!({"uuid": format!("s{n}")})).collect(),
            ),
        ]
    }

    fn config() -> RemoteConfig {
        RemoteConfig::new("http://target/api/").with_workers(1)
    }

    fn args() -> CopyArgs {
        CopyArgs {
            target_url: Some("http://target/api/".to_owned()),
            backup_dir: None,
            yes: false,
            endpoints: Vec::new(),
            workers: None,
            timeout: None,
            results_dir: PathBuf::from("."),
        }
    }

    #[test]
    fn default_endpoints_used_when_none_given() {
        assert_eq!(endpoint_names(&args()), vec![EndpointName::from("cditems")]);
        let mut a = args();
        a.endpoints = vec!["scans".to_owned(), "cditems".to_owned()];
        let names: Vec<String> = endpoint_names(&a).iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["scans", "cditems"]);
    }

    #[test]
    fn config_overrides_apply() {
        let mut a = args();
        a.workers = Some(8);
        a.timeout = Some(5);
        let config = resolve_config(&a).unwrap();
        assert_eq!(config.url, "http://target/api");
        assert_eq!(config.workers, 8);
        assert_eq!(config.timeout_secs, 5);
    }

    #[test]
    fn explicit_backup_dir_needs_no_prompt() {
        let mut a = args();
        a.backup_dir = Some(PathBuf::from("/some/dir"));
        let never = |_: &Path| -> Result<bool, String> { panic!("must not prompt") };
        assert_eq!(
            resolve_backup_dir(&a, Path::new("."), true, &never).unwrap(),
            Some(PathBuf::from("/some/dir"))
        );
    }

    #[test]
    fn declined_prompt_resolves_to_nothing() {
        let parent = tempfile::tempdir().unwrap();
        let backup = BackupSet::create_in(parent.path()).unwrap();

        let decline = |_: &Path| -> Result<bool, String> { Ok(false) };
        assert_eq!(resolve_backup_dir(&args(), parent.path(), true, &decline).unwrap(), None);

        let accept = |_: &Path| -> Result<bool, String> { Ok(true) };
        assert_eq!(
            resolve_backup_dir(&args(), parent.path(), true, &accept).unwrap(),
            Some(backup.dir().to_path_buf())
        );

        let mut a = args();
        a.yes = true;
        assert_eq!(
            resolve_backup_dir(&a, parent.path(), true, &decline).unwrap(),
            Some(backup.dir().to_path_buf())
        );
    }

    #[test]
    fn uncancelled_run_copies_every_endpoint() {
        let target = AcceptingTarget {
            cancel_after: usize::MAX,
            ..Default::default()
        };
        let replicator = Replicator::new(&target, &config());
        let aggregator = BatchAggregator::new();

        let run = replicate_sources(&replicator, &sources(), &aggregator, true);
        assert_eq!(run, CopyRun::default());
        assert_eq!(target.created.lock().unwrap().len(), 5);
    }

    #[test]
    fn interrupt_mid_endpoint_keeps_partial_results() {
        let target = AcceptingTarget {
            cancel_after: 1,
            ..Default::default()
        };
        let replicator = Replicator::new(&target, &config());
        target.cancel.set(replicator.cancel_handle()).unwrap();
        let aggregator = BatchAggregator::new();

        let run = replicate_sources(&replicator, &sources(), &aggregator, true);
        assert!(run.cancelled);
        assert_eq!(run.unprocessed, 4);

        let result = aggregator.finalize();
        let cditems = result.endpoint("cditems").unwrap();
        assert_eq!(cditems.count(OutcomeTag::Created), 1);
        assert!(!result.contains("scans"));

        let dir = tempfile::tempdir().unwrap();
        let file = write_results(dir.path(), &result).unwrap();
        let saved: Value =
            serde_json::from_str(&std::fs::read_to_string(file).unwrap()).unwrap();
        assert_eq!(saved["cditems"]["created"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn interrupt_before_start_copies_nothing() {
        let target = AcceptingTarget::default();
        let replicator = Replicator::new(&target, &config());
        replicator.cancel_handle().cancel();
        let aggregator = BatchAggregator::new();

        let run = replicate_sources(&replicator, &sources(), &aggregator, true);
        assert!(run.cancelled);
        assert_eq!(run.unprocessed, 5);
        assert!(target.created.lock().unwrap().is_empty());
        assert!(aggregator.finalize().endpoints().next().is_none());
    }

    #[test]
    fn title_capitalizes() {
        assert_eq!(title("cditems"), "Cditems");
        assert_eq!(title(""), "");
    }
}
