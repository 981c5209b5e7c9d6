use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

/// How often an active client logs its backend's state
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Receiver for diagnostic messages, usually forwarded to the consumer's own logs.
///
/// Implementations must return quickly, they're called inline with position delivery.
pub trait LogListener: Send + Sync {
    fn on_log(&self, tag: &str, message: &str);
}

#[derive(Clone, Default)]
/// Emits diagnostics to the [log] facade and, if one is attached, a [LogListener]
pub struct DiagnosticLog {
    listener: Option<Arc<dyn LogListener>>,
}

impl DiagnosticLog {
    pub fn new(listener: Arc<dyn LogListener>) -> Self {
        Self {
            listener: Some(listener),
        }
    }

    pub fn log(&self, tag: &str, message: impl AsRef<str>) {
        let message = message.as_ref();
        debug!(target: tag, "{message}");
        if let Some(listener) = &self.listener {
            let res = catch_unwind(AssertUnwindSafe(|| listener.on_log(tag, message)));
            if res.is_err() {
                warn!("Log listener panicked while handling a message from {tag}");
            }
        }
    }
}

/// Handle to a background task that runs a pure observability tick on a fixed period.
///
/// The task is cancelled when [DiagnosticProbe::cancel] is called or the handle is dropped.
/// Cancelling never waits for a tick that's already running.
pub struct DiagnosticProbe {
    cancel: CancellationToken,
}

impl DiagnosticProbe {
    /// Start ticking, the first tick happens immediately. Must be called within a tokio
    /// runtime.
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => {
                        break;
                    }

                    _ = interval.tick() => {
                        tick().await;
                    }
                }
            }
        });

        Self { cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for DiagnosticProbe {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
