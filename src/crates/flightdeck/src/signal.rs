//! Cooperative cancellation signal
//!
//! A `CancelSignal` is a one-way latch: once requested it stays requested.
//! Workers poll it at checkpoints; async code can also wait on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Clone)]
pub struct CancelSignal {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("requested", &self.requested.load(Ordering::SeqCst))
            .finish()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Request cancellation. Returns `true` for the first request only.
    pub fn request(&self) -> bool {
        let first = !self.requested.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation has been requested
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a request in between is not missed
            let notified = self.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Request cancellation on the first Ctrl-C (SIGINT) or SIGTERM
    pub fn install_signal_handlers(&self) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal as unix_signal, SignalKind};

                let (mut sigint, mut sigterm) = match (
                    unix_signal(SignalKind::interrupt()),
                    unix_signal(SignalKind::terminate()),
                ) {
                    (Ok(int), Ok(term)) => (int, term),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!(error = %e, "Failed to install signal handlers");
                        return;
                    }
                };

                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT, requesting cancellation"),
                    _ = sigterm.recv() => info!("Received SIGTERM, requesting cancellation"),
                }
                signal.request();
            }

            #[cfg(not(unix))]
            {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Received Ctrl+C, requesting cancellation");
                        signal.request();
                    }
                    Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
                }
            }
        })
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
