/// Operator stop requests.
///
/// SIGINT (Ctrl-C), SIGTERM, and a STOP file all latch the same request. The
/// supervisor routes it through the normal termination path with reason
/// `manual_interrupt`. A second SIGINT or SIGTERM exits immediately, for when
/// that path is itself stuck.
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    requested: AtomicBool,
    notify: Notify,
}

/// Cloneable handle to the latched stop request.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install SIGINT and SIGTERM listeners that latch the request.
    pub fn install() -> std::io::Result<Self> {
        let handle = Self::new();
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let listener = handle.clone();
        tokio::spawn(async move {
            loop {
                let source = tokio::select! {
                    _ = sigint.recv() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                };
                if !listener.request(source) {
                    tracing::warn!(source, "second interrupt, exiting without a summary");
                    std::process::exit(130);
                }
            }
        });

        Ok(handle)
    }

    /// Latch the request. Returns false if it was already latched.
    pub fn request(&self, source: &str) -> bool {
        let first = !self.inner.requested.swap(true, Ordering::SeqCst);
        if first {
            tracing::info!(source, "received interrupt signal, stopping");
        }
        self.inner.notify.notify_waiters();
        first
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolve once a stop has been requested.
    pub async fn requested(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Honor a STOP file: latch the request and remove the file.
    pub fn check_stop_file(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(error = %e, path = %path.display(), "failed to remove stop file");
        }
        self.request("stop file");
        true
    }
}
