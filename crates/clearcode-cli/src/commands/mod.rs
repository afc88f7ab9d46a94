pub mod backup;
pub mod completions;
pub mod copy;
pub mod get;
pub mod import;
pub mod list;

use chrono::{DateTime, NaiveDate, Utc};
use clearcode_store::{FileItemStore, ListFilter};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_STORE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Counted progress bar; hidden when output is JSON.
pub fn progress_bar(len: usize, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template("{msg:10} [{bar:30.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("=> "),
    );
    pb
}

pub fn colorize_outcome(tag: &str) -> String {
    use console::Style;
    match tag {
        "created" => Style::new().green().apply_to(tag).to_string(),
        "updated" => Style::new().cyan().apply_to(tag).to_string(),
        "create_errors" | "update_errors" => Style::new().red().bold().apply_to(tag).to_string(),
        other => other.to_owned(),
    }
}

/// Open (initializing if needed) the store at `path`.
pub fn open_store(path: &Path) -> Result<FileItemStore, String> {
    FileItemStore::open(path).map_err(|e| format!("store error: {e}"))
}

/// Parse `--since`: RFC 3339, or a bare date meaning midnight UTC.
pub fn parse_since(input: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid --since value '{input}': expected RFC 3339 or YYYY-MM-DD"))
}

pub fn build_filter(prefix: Option<String>, since: Option<&str>) -> Result<ListFilter, String> {
    let mut filter = ListFilter::all();
    if let Some(prefix) = prefix {
        filter = filter.with_prefix(prefix);
    }
    if let Some(since) = since {
        filter = filter.modified_since(parse_since(since)?);
    }
    Ok(filter)
}
