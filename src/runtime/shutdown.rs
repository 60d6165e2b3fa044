use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Broad "stop everything" signal shared by all actor loops of a net.
///
/// Cloning is cheap; every clone raises the same flag. Raising it more than
/// once has no further effect.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn terminate(&self) {
        let was_stopped = self.tx.send_replace(true);
        if !was_stopped {
            log::info!("terminating PT net simulation");
        }
    }

    pub fn is_terminated(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolves once [`Shutdown::terminate`] has been called.
    pub async fn terminated(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Spawns a timer task that terminates the net after `after`.
    /// Must be called from within a tokio runtime.
    pub fn terminate_after(&self, after: Duration) -> tokio::task::JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => shutdown.terminate(),
                _ = shutdown.terminated() => {}
            }
        })
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
