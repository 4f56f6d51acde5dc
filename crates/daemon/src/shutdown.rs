use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{
    signal::unix::{SignalKind, signal},
    sync::Notify,
};
use tracing::{info, warn};

#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

struct Inner {
    notified: Notify,
    is_shutdown: AtomicBool,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                notified: Notify::new(),
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Trigger shutdown exactly once. Subsequent calls are no-ops.
    pub fn trigger(&self) {
        if !self.inner.is_shutdown.swap(true, Ordering::SeqCst) {
            self.inner.notified.notify_waiters();
        }
    }

    /// Wait for shutdown. If shutdown already happened, returns immediately.
    pub async fn wait(&self) {
        // initializing the future here avoids race
        let notified = self.inner.notified.notified();

        if self.inner.is_shutdown.load(Ordering::SeqCst) {
            return;
        }

        notified.await;
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::SeqCst)
    }

    /// Triggers on the first SIGINT or SIGTERM. Needs a running runtime.
    pub fn trigger_on_signals(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    warn!("cannot listen for SIGTERM: {e}");
                    return;
                }
            };
            let received = tokio::select! {
                res = tokio::signal::ctrl_c() => res.map(|()| "SIGINT"),
                _ = term.recv() => Ok("SIGTERM"),
            };
            match received {
                Ok(name) => info!("received {name}, shutting down"),
                Err(e) => {
                    warn!("cannot listen for SIGINT: {e}");
                    term.recv().await;
                    info!("received SIGTERM, shutting down");
                }
            }
            this.trigger();
        });
    }
}
