//! First-settler completion for concurrent stream relays.

use crate::error::AgentResult;
use std::future::Future;
use tokio::sync::mpsc;

/// Runs a handful of relay tasks and resolves with the result of the
/// first one to finish.
///
/// Losing relays are abandoned, not cancelled: each keeps running until
/// its own I/O errors out or reaches EOF. This mirrors the per-direction
/// copy discipline of the attach paths and is a known, accepted leak.
pub struct Race {
    tx: mpsc::Sender<AgentResult<()>>,
    rx: mpsc::Receiver<AgentResult<()>>,
}

impl Race {
    pub fn new() -> Self {
        // Capacity covers stdin, output, and resize entrants, so a
        // losing task never blocks on its (discarded) send.
        let (tx, rx) = mpsc::channel(4);
        Self { tx, rx }
    }

    pub fn spawn<F>(&self, relay: F)
    where
        F: Future<Output = AgentResult<()>> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(relay.await).await;
        });
    }

    /// Wait for the first entrant to settle.
    pub async fn first(self) -> AgentResult<()> {
        let Race { tx, mut rx } = self;
        // Without this drop, zero entrants would wait forever.
        drop(tx);
        rx.recv().await.unwrap_or(Ok(()))
    }
}

impl Default for Race {
    fn default() -> Self {
        Self::new()
    }
}
