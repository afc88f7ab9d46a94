use super::{json_pretty, open_store, EXIT_FAILURE, EXIT_SUCCESS};
use clearcode_store::{ItemStore, StoreError};
use std::path::Path;

pub fn run(store_path: &Path, path: &str, json: bool) -> Result<u8, String> {
    let store = open_store(store_path)?;
    let item = match store.get(path) {
        Ok(item) => item,
        Err(StoreError::NotFound(_)) => {
            eprintln!("no item at '{path}'");
            return Ok(EXIT_FAILURE);
        }
        Err(StoreError::InvalidPath(reason)) => return Err(format!("invalid path: {reason}")),
        Err(e) => return Err(format!("store error: {e}")),
    };

    if json {
        println!("{}", json_pretty(&item)?);
    } else {
        println!("{}", json_pretty(&item.content)?);
    }
    Ok(EXIT_SUCCESS)
}
