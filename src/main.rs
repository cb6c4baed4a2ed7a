//! aesdsocket: a line append-and-echo socket server
//!
//! Each client sends one newline-terminated packet. The server appends it
//! to a shared log file and streams the whole log back before closing the
//! connection. A timer appends a timestamp line to the same log every ten
//! seconds.
//!
//! Features:
//! - One task per connection, all appends serialized by a single lock
//! - Graceful shutdown on SIGINT/SIGTERM: in-flight clients are drained
//! - Optional daemon mode
//! - Configuration via CLI arguments or TOML file

mod buffer;
mod config;
mod connection;
mod daemon;
mod error;
mod server;
mod shutdown;
mod storage;
mod timestamp;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen_addr(),
        logfile = %config.logfile.display(),
        daemonize = config.daemonize,
        timestamp_interval_secs = config.timestamp_interval.as_secs(),
        "Starting aesdsocket"
    );

    // Bind before forking so bind errors reach the invoking shell.
    let listener = server::bind(&config.listen_addr())?;

    if config.daemonize {
        daemon::daemonize()?;
    }

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers.filter(|&w| w > 0) {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(server::serve(config, listener))?;
    info!("Exiting");
    Ok(())
}
