use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use strata_core::{CommandOptions, Session};
use strata_server::AppState;

/// Start a REST server that performs lookups in a strata hierarchy.
/// Responds to key lookups under the /lookup endpoint.
#[derive(Parser)]
#[command(name = "strata-server", author, version, about)]
struct Args {
    /// Engine root directory
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Path to the configuration file, overrides <root>/strata.yaml
    #[arg(long)]
    config: Option<PathBuf>,

    /// YAML or JSON file with scope variables for every lookup (repeatable)
    #[arg(long = "vars")]
    var_paths: Vec<String>,

    /// Scope variable as key:value or key=value for every lookup (repeatable)
    #[arg(long = "var")]
    variables: Vec<String>,

    /// Port number to listen to
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let session = {
        let mut builder = Session::builder().root(&args.root);
        if let Some(config) = &args.config {
            builder = builder.config_path(config);
        }
        match builder.build() {
            Ok(session) => session,
            Err(e) => {
                eprintln!("error: {}", e);
                std::process::exit(1);
            }
        }
    };

    let base_options = CommandOptions {
        var_paths: args.var_paths,
        variables: args.variables,
        ..Default::default()
    };
    let app = strata_server::build_router(AppState::new(session, base_options));

    let bind_addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");

    tracing::info!("strata-server listening on {}", bind_addr);

    axum::serve(listener, app).await.expect("server error");
}
