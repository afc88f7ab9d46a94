use super::{build_filter, json_pretty, open_store, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use clearcode_remote::{write_store_backup, BackupSet};
use clearcode_store::EndpointName;
use std::path::Path;

pub fn run(
    store_path: &Path,
    parent: &Path,
    prefix: Option<String>,
    since: Option<&str>,
    endpoint: &str,
    json: bool,
) -> Result<u8, String> {
    let filter = build_filter(prefix, since)?;
    let store = open_store(store_path)?;
    let backup = BackupSet::create_in(parent).map_err(|e| e.to_string())?;
    let endpoint = EndpointName::from(endpoint);

    let pb = spinner("exporting items…");
    let count = write_store_backup(&store, &backup, &endpoint, &filter).map_err(|e| {
        spin_fail(&pb, "export failed");
        e.to_string()
    })?;
    spin_ok(&pb, "export complete");

    if json {
        let payload = serde_json::json!({
            "backup_dir": backup.dir(),
            "endpoint": endpoint.as_str(),
            "items": count,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "backed up {count} {endpoint} to {}",
            backup.dir().display()
        );
    }
    Ok(EXIT_SUCCESS)
}
