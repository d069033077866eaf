mod app;
mod bus;
mod config;
mod index;
mod parser;
mod server;
mod stats;
mod store;
mod util;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use app::App;
use config::Config;

#[derive(Parser, Debug)]
#[command(name = "carbon-writer", about = "Graphite-compatible metric ingestion writer")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(short = 'c', long = "config", default_value = "conf/config.yaml")]
    config: PathBuf,
}

/// `RUST_LOG`, when set, always wins; otherwise the filter falls back to
/// the level named in config.
fn init_logger(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_logger("info");
            log::error!("failed to load config from {}: {e:#}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    init_logger(&config.general.level);

    let app = match App::start(config).await {
        Ok(app) => app,
        Err(e) => {
            log::error!("failed to start: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = app.run_until_shutdown().await {
        log::error!("fatal error while running: {e:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
