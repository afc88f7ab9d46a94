use clap::Parser;
use clearcode_server::EndpointStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "clearcode-server", about = "ClearCode replication target server")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8321)]
    port: u16,

    /// Directory to store records in.
    #[arg(long, default_value = "./clearcode-server-data")]
    data_dir: PathBuf,

    /// Endpoints to serve (repeatable).
    #[arg(long = "endpoint", default_value = "cditems")]
    endpoints: Vec<String>,

    /// Payload field used as the record identity.
    #[arg(long, default_value = clearcode_server::DEFAULT_IDENTITY_FIELD)]
    identity_field: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let store = match EndpointStore::open(&cli.data_dir, cli.endpoints) {
        Ok(store) => store.with_identity_field(&cli.identity_field),
        Err(e) => {
            error!("cannot open data directory {}: {e}", cli.data_dir.display());
            return ExitCode::FAILURE;
        }
    };

    let addr = format!("0.0.0.0:{}", cli.port);
    info!("starting clearcode-server on {addr}");
    info!("data directory: {}", cli.data_dir.display());
    info!(
        "endpoints: {}",
        store.endpoints().collect::<Vec<_>>().join(", ")
    );

    if let Err(e) = clearcode_server::run_server(&Arc::new(store), &addr) {
        error!("server failed: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
