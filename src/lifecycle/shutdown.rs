//! Shutdown broadcast.

use tokio::sync::broadcast;

/// One-shot shutdown signal fanned out to accept loops, sessions and the
/// admin API. Clones share the channel, so a task only misses the signal if
/// it subscribes after [`Shutdown::trigger`].
#[derive(Debug, Clone)]
pub struct Shutdown {
    signal: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (signal, _) = broadcast::channel(1);
        Self { signal }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.signal.subscribe()
    }

    pub fn trigger(&self) {
        let listeners = self.signal.send(()).unwrap_or(0);
        tracing::debug!(listeners, "Shutdown signalled");
    }

    /// Tasks still subscribed.
    pub fn receiver_count(&self) -> usize {
        self.signal.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
