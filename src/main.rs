mod assets;
mod config;
mod fetch;
mod router;
mod server;
mod store;
mod sync;
#[cfg(test)]
mod testutil;
mod types;
mod upstream;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "larder")]
#[command(about = "Offline-first caching proxy for the restaurant reviews API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/larder/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Listen address, overriding the config file
  #[arg(short, long)]
  listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("larder=info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override listen address if specified on the command line
  let config = if let Some(listen) = args.listen {
    config::Config { listen, ..config }
  } else {
    config
  };

  server::run(config).await
}
