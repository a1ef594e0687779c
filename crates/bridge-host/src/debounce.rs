//! Burst coalescing for host change events.
//!
//! Selection and diagnostics changes arrive in rapid bursts while the
//! user types. The debouncer forwards only the last event of each
//! burst: every push restarts the quiescence timer, and the pending
//! value is replaced rather than queued, so earlier events in the same
//! window are discarded along with their data.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

/// Default quiescence window for change notifications.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// Handle for pushing events into a coalescing task.
///
/// Created by [`Debouncer::new`], which also returns the output side:
/// a receiver that yields exactly one value per quiescence window.
pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawns the coalescing task. Must be called from within a tokio
    /// runtime.
    ///
    /// Dropping the `Debouncer` flushes any pending value to the output
    /// and ends the task; dropping the receiver ends it silently.
    pub fn new(window: Duration) -> (Self, mpsc::UnboundedReceiver<T>) {
        let (in_tx, mut in_rx) = mpsc::unbounded_channel::<T>();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<T>();

        tokio::spawn(async move {
            while let Some(mut latest) = in_rx.recv().await {
                // Keep replacing the pending value until the input has
                // been quiet for a full window.
                loop {
                    tokio::select! {
                        next = in_rx.recv() => match next {
                            Some(value) => {
                                trace!("coalescing event into pending value");
                                latest = value;
                            }
                            None => {
                                let _ = out_tx.send(latest);
                                return;
                            }
                        },
                        _ = tokio::time::sleep(window) => break,
                    }
                }

                if out_tx.send(latest).is_err() {
                    // Receiver gone; nothing left to notify.
                    return;
                }
            }
        });

        (Self { tx: in_tx }, out_rx)
    }

    /// Records one event. Only the last event pushed within a
    /// quiescence window reaches the output.
    pub fn push(&self, value: T) {
        // Send failure means the task ended with the receiver; the
        // event has nowhere to go either way.
        let _ = self.tx.send(value);
    }
}
