//! Typed event bus.
//!
//! Every stateful component announces its transitions over one of these.
//! Subscribers are decoupled from the emitter; a subscriber that falls
//! behind misses old events rather than blocking the emitter.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

/// A broadcast bus carrying one component's event type.
///
/// Cloning the bus clones the sending side; all clones feed the same
/// subscribers. Every subscriber sees every event, which doubles as the
/// observability channel.
#[derive(Debug, Clone)]
pub struct Bus<E: Clone + Send + 'static> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> Bus<E> {
    /// Create a bus retaining up to `capacity` undelivered events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Open a persistent subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Emit an event. Delivery is best-effort: no subscribers is not an
    /// error.
    pub fn emit(&self, event: E) {
        let _ = self.tx.send(event);
    }

    /// One-shot wait: resolve with the first event matching `pred` within
    /// `window`, or `None` on expiry. The subscription is dropped either
    /// way, so there is no double resolution and no leaked listener.
    pub async fn wait_for<F>(&self, window: Duration, mut pred: F) -> Option<E>
    where
        F: FnMut(&E) -> bool,
    {
        let mut rx = self.tx.subscribe();
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(event)) if pred(&event) => return Some(event),
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => return None,
            }
        }
    }
}

impl<E: Clone + Send + 'static> Default for Bus<E> {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_all_subscribers() {
        let bus: Bus<u32> = Bus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(7);

        assert_eq!(a.recv().await.unwrap(), 7);
        assert_eq!(b.recv().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_wait_for_filters() {
        let bus: Bus<u32> = Bus::default();
        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.wait_for(Duration::from_secs(5), |e| *e == 2).await })
        };

        // Give the waiter time to subscribe before emitting.
        tokio::task::yield_now().await;
        bus.emit(1);
        bus.emit(2);

        assert_eq!(waiter.await.unwrap(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out() {
        let bus: Bus<u32> = Bus::default();
        let result = bus.wait_for(Duration::from_millis(50), |_| true).await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let bus: Bus<u32> = Bus::default();
        bus.emit(1);
    }
}
