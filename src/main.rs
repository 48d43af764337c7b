mod cli;

use clap::Parser;
use cli::{Cli, Command};
use magicswap::session;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Swap {
            source,
            target,
            out_dir,
            json,
            tuning,
        } => {
            let config = tuning.to_config();
            if let Err(e) = config.validate() {
                eprintln!("magicswap swap: {e}");
                std::process::exit(2);
            }
            let request = session::SwapRequest {
                source,
                target,
                out_dir,
                json,
            };
            if let Err(e) = session::run_swap(request, config).await {
                tracing::error!(error = %e, "swap failed");
                eprintln!("magicswap swap: {e}");
                std::process::exit(1);
            }
        }
        Command::Validate {
            max_upload_bytes,
            paths,
        } => match session::run_validate(&paths, max_upload_bytes) {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(e) => {
                tracing::error!(error = %e, "validate failed");
                eprintln!("magicswap validate: {e}");
                std::process::exit(1);
            }
        },
    }
}
