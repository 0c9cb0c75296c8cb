mod app;
mod config;
mod connectivity;
mod event;
mod net;
mod queue;
mod store;
mod sync;
mod view;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "roadbook")]
#[command(about = "Offline-first client for the roadbook service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/roadbook/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Write logs to stderr instead of the log directory
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Send a call, queueing it if the service is unreachable
  Send {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE)
    method: String,
    /// Endpoint relative to the API URL, e.g. /trips
    endpoint: String,
    /// JSON request body
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Show connectivity, queue size and last sync
  Status,
  /// Deliver queued requests and refresh cached resources
  Sync,
  /// List queued requests
  Queue {
    /// List requests the service refused instead
    #[arg(long)]
    dead: bool,
  },
  /// Show a resource (dashboard, trips, profile or an endpoint)
  Show {
    resource: String,
    /// Read the cached copy only
    #[arg(long)]
    offline: bool,
  },
  /// Keep syncing in the background until Ctrl-C
  Run,
}

fn init_logging(config: &config::Config, to_stderr: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roadbook=info"));

  if to_stderr {
    tracing_subscriber::registry()
      .with(filter)
      .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
      .init();
    return Ok(None);
  }

  let directory = match &config.log.directory {
    Some(dir) => dir.clone(),
    None => config::Config::data_dir()?.join("logs"),
  };
  std::fs::create_dir_all(&directory)?;

  let appender = tracing_appender::rolling::daily(directory, "roadbook.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .init();

  Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Flushes buffered log lines on drop
  let _guard = init_logging(&config, args.log_stderr)?;

  let app = app::App::new(config).await?;

  match args.command {
    Command::Send {
      method,
      endpoint,
      body,
    } => app.send(&method, &endpoint, body.as_deref()).await,
    Command::Status => app.status(),
    Command::Sync => app.sync().await,
    Command::Queue { dead } => app.queue(dead),
    Command::Show { resource, offline } => app.show(&resource, offline).await,
    Command::Run => app.run().await,
  }
}
