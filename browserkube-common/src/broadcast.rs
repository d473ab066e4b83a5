//! Fan-out event broadcasting.
//!
//! A single task owns the subscriber list; registrations arrive over the same
//! control channel as events, so no lock is ever taken. Subscribers that drop
//! their receiver are pruned on the next delivery attempt.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const INPUT_BUFFER: usize = 64;
const SUBSCRIBER_BUFFER: usize = 64;

enum Control<T> {
    Event(T),
    Register(mpsc::Sender<T>),
}

/// Fan-out broadcaster. Cloning shares the same event loop.
#[derive(Clone)]
pub struct Broadcaster<T> {
    tx: mpsc::Sender<Control<T>>,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Spawns the broadcast loop. It runs until the token is cancelled or
    /// every handle is dropped.
    pub fn new(cancel: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::channel::<Control<T>>(INPUT_BUFFER);
        tokio::spawn(async move {
            let mut subscribers: Vec<mpsc::Sender<T>> = Vec::new();
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };
                match msg {
                    Control::Register(sub) => subscribers.push(sub),
                    Control::Event(ev) => {
                        // A full or closed subscriber channel drops the
                        // subscriber rather than stalling the loop.
                        subscribers.retain(|sub| sub.try_send(ev.clone()).is_ok());
                    }
                }
            }
        });
        Self { tx }
    }

    /// Delivers an event, waiting for loop capacity.
    pub async fn submit(&self, event: T) {
        let _ = self.tx.send(Control::Event(event)).await;
    }

    /// Delivers an event without waiting. Returns false when the loop is
    /// saturated or gone.
    pub fn try_submit(&self, event: T) -> bool {
        self.tx.try_send(Control::Event(event)).is_ok()
    }

    /// Registers a new subscriber. Dropping the receiver deregisters it.
    pub async fn subscribe(&self) -> mpsc::Receiver<T> {
        let (sub_tx, sub_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let _ = self.tx.send(Control::Register(sub_tx)).await;
        sub_rx
    }
}

/// Groups a stream of items into time-window batches. Flushes happen per
/// tick, never per item; empty windows produce no batch.
pub fn batch<T: Send + 'static>(
    mut input: mpsc::Receiver<T>,
    window: std::time::Duration,
) -> mpsc::Receiver<Vec<T>> {
    let (out_tx, out_rx) = mpsc::channel(INPUT_BUFFER);
    tokio::spawn(async move {
        let mut pending: Vec<T> = Vec::new();
        let mut ticker = tokio::time::interval(window);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                item = input.recv() => match item {
                    Some(item) => pending.push(item),
                    None => {
                        if !pending.is_empty() {
                            let _ = out_tx.send(std::mem::take(&mut pending)).await;
                        }
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        let batch = std::mem::take(&mut pending);
                        if out_tx.send(batch).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
    out_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let cancel = CancellationToken::new();
        let bc: Broadcaster<u32> = Broadcaster::new(cancel.clone());
        let mut a = bc.subscribe().await;
        let mut b = bc.subscribe().await;

        bc.submit(7).await;

        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let cancel = CancellationToken::new();
        let bc: Broadcaster<u32> = Broadcaster::new(cancel.clone());
        let mut kept = bc.subscribe().await;
        let gone = bc.subscribe().await;
        drop(gone);

        bc.submit(1).await;
        bc.submit(2).await;

        assert_eq!(kept.recv().await, Some(1));
        assert_eq!(kept.recv().await, Some(2));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_cancellation_stops_delivery() {
        let cancel = CancellationToken::new();
        let bc: Broadcaster<u32> = Broadcaster::new(cancel.clone());
        let mut sub = bc.subscribe().await;

        cancel.cancel();
        // Give the loop a moment to observe the cancellation.
        tokio::time::sleep(Duration::from_millis(20)).await;
        bc.submit(9).await;

        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_batcher_groups_by_window() {
        let (tx, rx) = mpsc::channel(16);
        let mut batches = batch(rx, Duration::from_millis(50));

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        tx.send(3).await.unwrap();
        drop(tx);

        let got = batches.recv().await.unwrap();
        assert_eq!(got, vec![1, 2, 3]);
        assert!(batches.recv().await.is_none());
    }
}
