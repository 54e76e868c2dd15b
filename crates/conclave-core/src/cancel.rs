//! Cooperative cancellation primitive threaded through every suspension
//! point (spec.md §5, §9: "every I/O-bearing operation accepts a
//! cancellation-aware context"). Built on `tokio::sync::watch` rather than
//! a custom flag so waiters can `.await` a transition instead of polling.

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled. Intended for use in a
    /// `tokio::select!` alongside the actual suspension point.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    /// Derive a child token: cancelling the parent cancels the child, but
    /// not vice versa. Used so a workflow-level cancel propagates to every
    /// in-flight step without steps being able to cancel each other.
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        let mut parent_rx = self.rx.clone();
        let child_tx = child.tx.clone();
        if *parent_rx.borrow() {
            let _ = child_tx.send(true);
            return child;
        }
        tokio::spawn(async move {
            if parent_rx.changed().await.is_ok() && *parent_rx.borrow() {
                let _ = child_tx.send(true);
            }
        });
        child
    }
}
