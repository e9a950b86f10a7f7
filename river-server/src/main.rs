use anyhow::Result;
use clap::Parser;
use river::{Config, DemoBatch, Mode, River, Work};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "river-server")]
#[command(about = "Keeps the blogger index provisioned and registers stored queries")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "river.toml")]
    config: PathBuf,

    /// Run an embedded node instead of connecting to a cluster
    #[arg(long)]
    standalone: bool,

    /// Cluster host
    #[arg(long, env = "RIVER_HOST")]
    host: Option<String>,

    /// Cluster port
    #[arg(short, long, env = "RIVER_PORT")]
    port: Option<u16>,

    /// Register stored queries through the HTTP/JSON API
    #[arg(long)]
    http: bool,

    /// Register the demonstration queries instead of reading stdin
    #[arg(long)]
    demo: bool,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.observability.log_level.clone()),
    );
    let format =
        std::env::var("LOG_FORMAT").unwrap_or_else(|_| config.observability.log_format.clone());

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Feed `field:value` lines from stdin into the river until EOF
fn spawn_stdin_reader(sender: river::WorkSender) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Some(work) = Work::parse_line(&line) else {
                        continue;
                    };
                    if sender.send(work).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
        tracing::debug!("Stdin closed");
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load_or_create(&args.config)?;
    if args.standalone {
        config.connection.mode = Mode::Standalone;
    }
    if let Some(host) = args.host {
        config.connection.host = host;
    }
    if let Some(port) = args.port {
        config.connection.port = port;
    }
    if args.http {
        config.connection.use_http_protocol = true;
    }

    init_tracing(&config);

    tracing::info!("Config file: {}", args.config.display());
    let settings = config.river_settings(&config.index.name);
    tracing::debug!(?settings, "River settings");

    let river = if args.demo {
        River::new(config, DemoBatch::new())
    } else {
        let (sender, source) = river::channel(64);
        spawn_stdin_reader(sender);
        River::new(config, source)
    };
    river.start()?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, shutting down"),
        _ = river.join() => tracing::info!("Worker finished"),
    }

    river.close();
    Ok(())
}
