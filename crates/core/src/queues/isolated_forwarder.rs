use std::{pin::Pin, sync::Arc};

use tokio::sync::{Notify, mpsc};
use tracing::debug;

pub type DrainTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Drain tasks that must be spawned before the first publish.
pub struct StartupTasks {
    pub tokio: Vec<DrainTask>,
}

/// An inbox whose events must not be lost to eviction. A dedicated drain
/// task moves them into a bounded channel, so the publisher only fails when
/// both the inbox and the channel are full.
pub struct IsolatedForwarder<T> {
    subscriber_id: &'static str,
    inbox_tx: mpsc::Sender<T>,
}

impl<T: Send + 'static> IsolatedForwarder<T> {
    pub fn new(
        subscriber_id: &'static str,
        output_buffer: usize,
        notify_any: Arc<Notify>,
    ) -> (IsolatedForwarder<T>, mpsc::Receiver<T>, DrainTask) {
        let output_buffer = output_buffer.max(1);
        let (inbox_tx, mut inbox_rx) = mpsc::channel::<T>(output_buffer);
        let (out_tx, out_rx) = mpsc::channel::<T>(output_buffer);

        let drain_task = Box::pin(async move {
            while let Some(value) = inbox_rx.recv().await {
                if out_tx.send(value).await.is_err() {
                    break;
                }
                notify_any.notify_one();
            }
            debug!(subscriber = subscriber_id, "isolated inbox closed");
        });

        (
            IsolatedForwarder {
                subscriber_id,
                inbox_tx,
            },
            out_rx,
            drain_task,
        )
    }

    pub fn subscriber_id(&self) -> &'static str {
        self.subscriber_id
    }

    /// Hand `value` to the drain task, or give it back if the inbox is full
    /// or the subscriber is gone.
    pub fn try_send(&self, value: T) -> Result<(), T> {
        self.inbox_tx.try_send(value).map_err(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_in_order() {
        let notify = Arc::new(Notify::new());
        let (fwd, mut out, drain) = IsolatedForwarder::<u32>::new("test", 4, Arc::clone(&notify));
        tokio::spawn(drain);

        fwd.try_send(1).unwrap();
        fwd.try_send(2).unwrap();

        assert_eq!(out.recv().await, Some(1));
        assert_eq!(out.recv().await, Some(2));
    }

    #[tokio::test]
    async fn returns_the_value_when_the_subscriber_is_gone() {
        let (fwd, out, drain) = IsolatedForwarder::<u32>::new("test", 1, Arc::new(Notify::new()));
        drop(out);
        drop(drain);

        assert_eq!(fwd.try_send(7), Err(7));
    }
}
