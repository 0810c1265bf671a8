mod checkpoint;
mod config;
mod crc32;
mod discovery;
mod error;
mod framer;
mod scheduler;
mod session;
mod sink;
mod transport;

use crate::checkpoint::CheckpointStore;
use crate::config::{Config, SourceConfig};
use crate::discovery::Target;
use crate::error::ConfigError;
use crate::session::TailSession;
use crate::sink::{ChannelSink, Record};
use crate::transport::{HttpTransport, Transport};

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Records buffered between the sessions and the stdout writer.
const RECORD_QUEUE: usize = 4096;

#[derive(Debug, Parser)]
#[command(name = "httptail", version, about = "Tail growing log files over HTTP and ship new lines as JSON records")]
struct Cli {
    /// Config file (default: <config dir>/httptail/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Resource or pattern url to tail, in addition to configured sources
    #[arg(long = "url", value_name = "URL")]
    urls: Vec<String>,

    /// Poll every resource once, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let once = cli.once;
    log::info!("httptail v{} starting...", env!("CARGO_PKG_VERSION"));

    let (tx, rx) = mpsc::channel::<Record>(RECORD_QUEUE);

    // Discovery and the startup probes are blocking HTTP calls.
    let prepared = tokio::task::spawn_blocking(move || prepare(cli, tx)).await;
    let sessions = match prepared {
        Ok(Ok(sessions)) => sessions,
        Ok(Err(e)) => {
            log::error!("{e}");
            std::process::exit(1);
        }
        Err(e) => {
            log::error!("Startup task panicked: {e}");
            std::process::exit(1);
        }
    };

    let writer = tokio::spawn(sink::write_records(rx, tokio::io::stdout()));

    if once {
        scheduler::run_once(sessions).await;
        // every sender is gone now, so the writer drains and returns
        let _ = writer.await;
        return;
    }

    let tasks: Vec<_> = sessions
        .into_iter()
        .map(|session| tokio::spawn(scheduler::run(session)))
        .collect();

    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Shutting down"),
        Err(e) => log::error!("Cannot listen for shutdown signal: {e}"),
    }
    // Queued records may already be covered by a saved checkpoint.
    scheduler::shutdown(tasks, writer).await;
}

/// Load config, discover targets and start one session per target.
/// Every error here is fatal.
fn prepare(cli: Cli, tx: mpsc::Sender<Record>) -> Result<Vec<TailSession>, ConfigError> {
    let mut cfg = Config::load(cli.config.as_deref())?;
    cfg.sources
        .extend(cli.urls.into_iter().map(SourceConfig::from_url));
    cfg.validate()?;

    let settings = cfg.session_settings();
    log::info!(
        "host={} interval={}s max_request_bytes={} checkpoints={}",
        settings.host,
        cfg.interval_s,
        cfg.max_request_bytes,
        cfg.checkpoint_dir().display()
    );

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(cfg.timeout(), &cfg.headers));

    let mut targets: Vec<Target> = Vec::new();
    for source in &cfg.sources {
        let found = discovery::discover(
            transport.as_ref(),
            source,
            cfg.start_position,
            cfg.poll_interval(),
        )?;
        for target in &found {
            log::info!("Found {} (start at {})", target.locator, target.start_position);
        }
        targets.extend(found);
    }
    if targets.is_empty() {
        return Err(ConfigError::Invalid("no resources to tail".into()));
    }

    let store = discovery::checkpoint_store(cfg.checkpoint_dir(), &targets)?;
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(store);

    targets
        .into_iter()
        .map(|target| {
            TailSession::start(
                target.locator,
                target.start_position,
                settings.clone(),
                Arc::clone(&transport),
                Arc::clone(&checkpoints),
                Box::new(ChannelSink::new(tx.clone())),
            )
        })
        .collect()
}
