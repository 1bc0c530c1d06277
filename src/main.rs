use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bucket_console::cli::{self, Cli, Commands};
use bucket_console::console;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bucket_console=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    match cli.command {
        None | Some(Commands::Serve { .. }) => {
            println!(
                "\n    {}\n    Console:  http://{}\n    API:      http://{}/api\n",
                config.title,
                config.addr(),
                config.addr()
            );
            match console::serve(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!("Console stopped: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Some(command) => cli::run_cli(command, config).await,
    }
}
