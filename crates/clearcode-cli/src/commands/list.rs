use super::{build_filter, json_pretty, open_store, EXIT_SUCCESS};
use clearcode_store::ItemStore;
use std::path::Path;

pub fn run(
    store_path: &Path,
    prefix: Option<String>,
    since: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let filter = build_filter(prefix, since)?;
    let store = open_store(store_path)?;

    let mut rows = Vec::new();
    for item in store.list(&filter).map_err(|e| format!("store error: {e}"))? {
        let item = item.map_err(|e| format!("store error: {e}"))?;
        rows.push((item.path, item.last_modified));
    }

    if json {
        let payload: Vec<_> = rows
            .iter()
            .map(|(path, modified)| {
                serde_json::json!({"path": path, "last_modified": modified.to_rfc3339()})
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else if rows.is_empty() {
        println!("no items found");
    } else {
        println!("{:<26} PATH", "LAST_MODIFIED");
        for (path, modified) in &rows {
            println!("{:<26} {path}", modified.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }
    Ok(EXIT_SUCCESS)
}
