//! Graceful shutdown handling.
//!
//! A [`ShutdownSignal`] is a watch channel flipped once by the OS signal
//! handler. The supervisor checks it between cycles; the in-flight cycle
//! always completes before the process exits.

use tokio::sync::watch;
use tracing::info;

/// Coordinates shutdown between the signal handler and the supervisor.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Receiver half for the supervisor.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Flip the flag.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Install SIGINT/SIGTERM handlers and trigger on the first signal
    /// received. Runs until then.
    #[cfg(unix)]
    pub async fn listen(self) {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }

        self.trigger();
    }

    #[cfg(not(unix))]
    pub async fn listen(self) {
        tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
        info!("received Ctrl+C");
        self.trigger();
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve once the watch flag flips to `true`.
pub async fn triggered(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}
