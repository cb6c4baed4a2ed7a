//! Shutdown coordination.
//!
//! A [`Shutdown`] is a one-way latch shared by the acceptor, the timestamp
//! injector and the signal listener. Once triggered it stays triggered.
//! Each observer holds a [`ShutdownListener`] and awaits it alongside its
//! normal work; nothing is cancelled by the latch itself.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Phases of the acceptor's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting connections.
    Listening,
    /// Listener closed; waiting for in-flight connections.
    Draining,
    /// All handlers finished; shared log released.
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Listening => write!(f, "listening"),
            Phase::Draining => write!(f, "draining"),
            Phase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Shutdown latch
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Create a listener that resolves once shutdown is requested.
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger this latch on SIGINT or SIGTERM.
    ///
    /// Handlers are registered before this returns, so a signal that arrives
    /// afterwards is never lost. Must be called from within a runtime.
    pub fn listen_for_signals(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let shutdown = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("Caught SIGINT, exiting"),
                _ = sigterm.recv() => info!("Caught SIGTERM, exiting"),
            }
            shutdown.trigger();
        });
        Ok(())
    }
}

/// Receiving side of a [`Shutdown`] latch.
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Wait until shutdown has been requested. Returns immediately if it already was.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                // Every latch handle is gone; nobody is left to trigger.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_listeners() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();

        let waiter = tokio::spawn(async move {
            a.wait().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        shutdown.trigger();
        waiter.await.unwrap();
        b.wait().await;
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();

        let mut late = shutdown.subscribe();
        tokio::time::timeout(Duration::from_secs(1), late.wait())
            .await
            .expect("listener should resolve immediately");
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Listening.to_string(), "listening");
        assert_eq!(Phase::Draining.to_string(), "draining");
        assert_eq!(Phase::Stopped.to_string(), "stopped");
    }
}
