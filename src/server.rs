//! TCP acceptor and shutdown coordinator.
//!
//! The acceptor moves through three phases:
//! - `Listening`: accept connections and spawn one handler task each,
//!   reaping handlers as they finish
//! - `Draining`: close the listener, stop the timestamp injector and wait
//!   for every in-flight handler; none of them is cancelled
//! - `Stopped`: release the shared log, removing its backing file
//!
//! Shutdown is requested through a [`Shutdown`] latch (SIGINT/SIGTERM in
//! production). A fatal error from a handler or from the injector also
//! ends `Listening`, and is returned once the drain completes.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::connection::handle_connection;
use crate::error::{Error, Result};
use crate::shutdown::{Phase, Shutdown};
use crate::storage::SharedLog;
use crate::timestamp;

/// Pending-connection queue length for the listening socket.
const LISTEN_BACKLOG: i32 = 16;

/// Bind the listening socket for `addr` (`host:port`).
///
/// Returns a std listener so it can be created before daemonizing and
/// handed to the runtime afterwards.
pub fn bind(addr: &str) -> Result<std::net::TcpListener> {
    let bind_err = |e| Error::Bind(addr.to_string(), e);

    let socket_addr: SocketAddr = addr
        .to_socket_addrs()
        .map_err(bind_err)?
        .next()
        .ok_or_else(|| bind_err(std::io::ErrorKind::AddrNotAvailable.into()))?;

    let socket = Socket::new(
        match socket_addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )
    .map_err(bind_err)?;

    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&socket_addr.into()).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    Ok(socket.into())
}

/// Server instance
pub struct Server {
    config: Config,
    log: Arc<SharedLog>,
    shutdown: Shutdown,
}

impl Server {
    /// Create a server around an already opened shared log.
    ///
    /// The server drains and stops once `shutdown` is triggered.
    pub fn new(config: Config, log: Arc<SharedLog>, shutdown: Shutdown) -> Self {
        Self {
            config,
            log,
            shutdown,
        }
    }

    /// Accept connections until shutdown, then drain and release the log.
    pub async fn run(self, listener: TcpListener) -> Result<()> {
        let mut phase = Phase::Listening;
        // From here on every exit goes through the drain, so nothing may bail out early.
        match listener.local_addr() {
            Ok(address) => info!(
                address = %address,
                logfile = %self.log.path().display(),
                phase = %phase,
                "Server listening"
            ),
            Err(e) => warn!(error = %e, phase = %phase, "Server listening on unknown address"),
        }

        let mut injector = tokio::spawn(timestamp::run(
            Arc::clone(&self.log),
            self.config.timestamp_interval,
            self.shutdown.subscribe(),
        ));
        let mut injector_done = false;

        let mut handlers = JoinSet::new();
        let mut stop = self.shutdown.subscribe();
        let mut fatal: Option<Error> = None;

        loop {
            tokio::select! {
                biased;

                _ = stop.wait() => break,

                res = &mut injector, if !injector_done => {
                    injector_done = true;
                    if let Err(e) = injector_outcome(res) {
                        fatal = Some(e);
                        break;
                    }
                }

                Some(res) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = handler_outcome(res) {
                        fatal = Some(e);
                        break;
                    }
                }

                res = listener.accept() => match res {
                    Ok((stream, peer)) => {
                        handlers.spawn(handle_connection(stream, peer, Arc::clone(&self.log)));
                        trace!(in_flight = handlers.len(), "Spawned connection handler");
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        phase = Phase::Draining;
        info!(phase = %phase, in_flight = handlers.len(), "Stopped accepting connections");
        drop(listener);
        self.shutdown.trigger();

        while let Some(res) = handlers.join_next().await {
            if let Err(e) = handler_outcome(res) {
                fatal.get_or_insert(e);
            }
        }
        if !injector_done {
            if let Err(e) = injector_outcome(injector.await) {
                fatal.get_or_insert(e);
            }
        }

        phase = Phase::Stopped;
        self.log.close().await;
        info!(phase = %phase, "Server stopped");

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Classify a finished connection handler. Only fatal errors are returned.
fn handler_outcome(res: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match res {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) if e.is_fatal() => {
            error!(error = %e, "Shared log failure in connection handler");
            Err(e)
        }
        Ok(Err(e)) => {
            debug!(error = %e, "Connection error");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Connection handler panicked");
            Ok(())
        }
    }
}

fn injector_outcome(res: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match res {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "Timestamp injector failed");
            Err(e)
        }
        Err(e) => {
            error!(error = %e, "Timestamp injector panicked");
            Ok(())
        }
    }
}

/// Open the shared log and run a server on `listener` until SIGINT/SIGTERM.
///
/// Must be called from within the runtime; `listener` comes from [`bind`].
/// The log is opened last, so a failed setup leaves no file behind.
pub async fn serve(config: Config, listener: std::net::TcpListener) -> Result<()> {
    let listener = TcpListener::from_std(listener)?;
    let shutdown = Shutdown::new();
    shutdown.listen_for_signals()?;

    let log = SharedLog::open(&config.logfile).await?;
    Server::new(config, log, shutdown).run(listener).await
}
