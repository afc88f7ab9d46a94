mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_STORE_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "clearcode",
    version,
    about = "Store, back up and replicate ClearCode scan items"
)]
struct Cli {
    /// Path to the ClearCode item store directory.
    #[arg(long, default_value = "~/.local/share/clearcode", global = true)]
    store: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Store every JSON file under a directory, keyed by its relative path.
    Import {
        /// Directory to scan recursively for `*.json` files.
        dir: PathBuf,
    },
    /// List stored items.
    List {
        /// Only items whose path starts with this prefix.
        #[arg(long)]
        prefix: Option<String>,
        /// Only items modified at or after this time (RFC 3339 or YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,
    },
    /// Print the content of one stored item.
    Get {
        /// Item path.
        path: String,
    },
    /// Export stored items into a new timestamped backup directory.
    Backup {
        /// Directory in which the backup directory is created.
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Only items whose path starts with this prefix.
        #[arg(long)]
        prefix: Option<String>,
        /// Only items modified at or after this time (RFC 3339 or YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,
        /// Endpoint name the exported items are written under.
        #[arg(long, default_value = "cditems")]
        endpoint: String,
    },
    /// Copy a backup to a target instance through its REST API.
    Copy {
        /// Target instance API root URL, e.g. https://host/api/v2/.
        #[arg(long)]
        target_url: Option<String>,
        /// Backup directory to copy from (defaults to the latest one here).
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        /// Use the latest backup directory without asking.
        #[arg(short, long, default_value_t = false)]
        yes: bool,
        /// Endpoints to copy (repeatable).
        #[arg(long = "endpoint")]
        endpoints: Vec<String>,
        /// Items of one endpoint sent concurrently.
        #[arg(long)]
        workers: Option<usize>,
        /// Per-request timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Directory the results file is written to.
        #[arg(long, default_value = ".")]
        results_dir: PathBuf,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CLEARCODE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let store_path = expand_tilde(&cli.store);
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Import { dir } => commands::import::run(&store_path, &dir, json_output),
        Commands::List { prefix, since } => {
            commands::list::run(&store_path, prefix, since.as_deref(), json_output)
        }
        Commands::Get { path } => commands::get::run(&store_path, &path, json_output),
        Commands::Backup {
            dir,
            prefix,
            since,
            endpoint,
        } => commands::backup::run(
            &store_path,
            &dir,
            prefix,
            since.as_deref(),
            &endpoint,
            json_output,
        ),
        Commands::Copy {
            target_url,
            backup_dir,
            yes,
            endpoints,
            workers,
            timeout,
            results_dir,
        } => commands::copy::run(
            &commands::copy::CopyArgs {
                target_url,
                backup_dir,
                yes,
                endpoints,
                workers,
                timeout,
                results_dir,
            },
            json_output,
        ),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("store error:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
