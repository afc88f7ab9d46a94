use super::{json_pretty, open_store, progress_bar, EXIT_FAILURE, EXIT_SUCCESS};
use clearcode_store::sync_all;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// `*.json` files under `root`, as (relative path with `/` separators, absolute path),
/// sorted by relative path. Hidden entries are skipped.
pub fn collect_json_files(root: &Path) -> Result<Vec<(String, PathBuf)>, String> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries =
            std::fs::read_dir(&dir).map_err(|e| format!("cannot read {}: {e}", dir.display()))?;
        for entry in entries {
            let entry = entry.map_err(|e| format!("cannot read {}: {e}", dir.display()))?;
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                let Ok(rel) = path.strip_prefix(root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((key, path));
            }
        }
    }
    files.sort();
    Ok(files)
}

pub fn run(store_path: &Path, dir: &Path, json: bool) -> Result<u8, String> {
    if !dir.is_dir() {
        return Err(format!("directory \"{}\" does not exist", dir.display()));
    }
    let store = open_store(store_path)?;
    let files = collect_json_files(dir)?;

    let pb = progress_bar(files.len(), json);
    pb.set_message("importing");
    let mut invalid = Vec::new();
    let documents = files.iter().filter_map(|(key, path)| {
        pb.inc(1);
        let parsed = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).map_err(|e| e.to_string()));
        match parsed {
            Ok(content) => Some((key.clone(), content)),
            Err(e) => {
                tracing::warn!("skipping {}: {e}", path.display());
                invalid.push(key.clone());
                None
            }
        }
    });
    let summary = sync_all(&store, documents).map_err(|e| format!("store error: {e}"))?;
    pb.finish_and_clear();

    if json {
        let payload = serde_json::json!({
            "created": summary.created,
            "updated": summary.updated,
            "invalid": invalid,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "imported {} items ({} created, {} updated)",
            summary.total(),
            summary.created,
            summary.updated
        );
        for key in &invalid {
            println!("  skipped invalid JSON: {key}");
        }
    }

    if invalid.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_FAILURE)
    }
}
