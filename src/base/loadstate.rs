use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

/// The current state of a forwarding operation.
/// This roughly matches net/base/load_states.h, trimmed to the phases a
/// single HTTP/1.1 exchange moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// The request is idle.
    #[default]
    Idle,

    /// Resolving the host.
    ResolvingHost,

    /// Connecting to the host (TCP handshake).
    Connecting,

    /// Establishing proxy tunnel.
    EstablishingProxyTunnel,

    /// Establishing an SSL connection.
    SslHandshake,

    /// Sending the HTTP request.
    SendingRequest,

    /// Waiting for the server response (TTFB).
    WaitingForResponse,

    /// Reading the response body.
    ReadingResponse,

    /// Answering a 401/407 challenge.
    Authenticating,

    /// Rebuilding the request for a redirect hop.
    Redirecting,
}

impl LoadState {
    /// Whether the operation is still touching the network.
    pub fn is_active(&self) -> bool {
        !matches!(self, LoadState::Idle)
    }
}

/// Publishes [`LoadState`] changes to any number of watchers.
///
/// Cloning shares the channel, so the transaction, the tunnel establisher
/// and the caller all see the same progression.
#[derive(Debug, Clone)]
pub struct LoadStateReporter {
    tx: Arc<watch::Sender<LoadState>>,
}

impl Default for LoadStateReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadStateReporter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LoadState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, state: LoadState) {
        let previous = self.tx.send_replace(state);
        if previous != state {
            trace!(from = ?previous, to = ?state, "load state");
        }
    }

    pub fn current(&self) -> LoadState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reporter_broadcasts() {
        let reporter = LoadStateReporter::new();
        let mut rx = reporter.subscribe();
        assert_eq!(*rx.borrow(), LoadState::Idle);

        reporter.clone().set(LoadState::Connecting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), LoadState::Connecting);
        assert_eq!(reporter.current(), LoadState::Connecting);
        assert!(reporter.current().is_active());
    }
}
