//! Latest-wins status mailbox
//!
//! Consumers only ever care about the newest [`StatusSnapshot`], so the
//! mailbox never blocks the publisher. A full mailbox has its oldest entry
//! evicted to make room; an unbuffered mailbox (capacity 0) only hands a
//! snapshot over when a receiver is already waiting, and otherwise drops it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_channel::{Receiver, Sender};
use cat_protocol::StatusSnapshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Error returned by [`StatusMailbox::try_send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrySendError {
    /// No slot (or waiting receiver) was available; the snapshot is returned
    Full(StatusSnapshot),
}

/// What happened to a published snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Delivered without evicting anything
    Delivered,
    /// Delivered after evicting this many stale snapshots
    Evicted(usize),
    /// Unbuffered mailbox with nobody waiting; snapshot discarded
    Dropped,
    /// The run was cancelled before delivery
    Cancelled,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    tx: Sender<StatusSnapshot>,
    /// Held by the publisher too, so it can evict and so the channel never closes
    rx: Receiver<StatusSnapshot>,
    /// Receivers parked in `recv()`; only consulted when unbuffered
    waiting: Mutex<usize>,
}

impl Shared {
    fn waiting(&self) -> MutexGuard<'_, usize> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publishing side of the status mailbox
#[derive(Debug, Clone)]
pub struct StatusMailbox {
    shared: Arc<Shared>,
}

/// Receive-only handle to the status mailbox
#[derive(Debug, Clone)]
pub struct StatusReceiver {
    shared: Arc<Shared>,
}

impl StatusMailbox {
    /// Create a mailbox holding at most `capacity` unread snapshots
    pub fn new(capacity: usize) -> Self {
        // bounded(0) is not allowed; an unbuffered mailbox is limited by the
        // number of waiting receivers instead.
        let (tx, rx) = if capacity == 0 {
            async_channel::unbounded()
        } else {
            async_channel::bounded(capacity)
        };
        Self {
            shared: Arc::new(Shared {
                capacity,
                tx,
                rx,
                waiting: Mutex::new(0),
            }),
        }
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of unread snapshots
    pub fn len(&self) -> usize {
        self.shared.rx.len()
    }

    /// Whether there are no unread snapshots
    pub fn is_empty(&self) -> bool {
        self.shared.rx.is_empty()
    }

    /// A receive-only handle for consumers
    pub fn receiver(&self) -> StatusReceiver {
        StatusReceiver {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Offer a snapshot without blocking
    pub fn try_send(&self, snapshot: StatusSnapshot) -> Result<(), TrySendError> {
        if self.shared.capacity == 0 {
            // Hand-off only: one slot per receiver currently parked in recv()
            let waiting = self.shared.waiting();
            if self.shared.rx.len() >= *waiting {
                return Err(TrySendError::Full(snapshot));
            }
            return self
                .shared
                .tx
                .try_send(snapshot)
                .map_err(|e| TrySendError::Full(e.into_inner()));
        }
        self.shared
            .tx
            .try_send(snapshot)
            .map_err(|e| TrySendError::Full(e.into_inner()))
    }

    /// Take the oldest unread snapshot, if any
    pub fn try_recv(&self) -> Option<StatusSnapshot> {
        self.shared.rx.try_recv().ok()
    }

    /// Discard all unread snapshots, returning how many were dropped
    pub fn clear(&self) -> usize {
        std::iter::from_fn(|| self.try_recv()).count()
    }

    /// Publish with latest-wins eviction
    ///
    /// Never blocks. On a full buffered mailbox the oldest snapshot is
    /// evicted and the offer retried until it lands or `cancel` fires.
    pub fn publish(&self, snapshot: StatusSnapshot, cancel: &CancellationToken) -> PublishOutcome {
        self.publish_with(snapshot, cancel, || self.try_recv())
    }

    fn publish_with(
        &self,
        snapshot: StatusSnapshot,
        cancel: &CancellationToken,
        mut evict: impl FnMut() -> Option<StatusSnapshot>,
    ) -> PublishOutcome {
        let mut pending = snapshot;
        let mut evicted = 0;

        loop {
            if cancel.is_cancelled() {
                return PublishOutcome::Cancelled;
            }

            match self.try_send(pending) {
                Ok(()) if evicted == 0 => return PublishOutcome::Delivered,
                Ok(()) => return PublishOutcome::Evicted(evicted),
                Err(TrySendError::Full(snapshot)) => {
                    if self.shared.capacity == 0 {
                        warn!("status mailbox is unbuffered and nobody is waiting, dropping snapshot");
                        return PublishOutcome::Dropped;
                    }
                    pending = snapshot;
                    if evict().is_some() {
                        evicted += 1;
                        debug!("evicted stale status snapshot");
                    }
                    // An empty slot here means a consumer just drained it: retry as is.
                }
            }
        }
    }
}

impl StatusReceiver {
    /// Configured capacity of the underlying mailbox
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Take the oldest unread snapshot without waiting
    pub fn try_recv(&self) -> Option<StatusSnapshot> {
        self.shared.rx.try_recv().ok()
    }

    /// Wait for the next snapshot
    ///
    /// Cancel-safe: dropping the future never loses a snapshot of a buffered
    /// mailbox. On an unbuffered mailbox, a hand-off nobody is left waiting
    /// for is discarded so it cannot shadow newer snapshots. Returns `None`
    /// only if the channel closed, which cannot happen while the mailbox
    /// exists.
    pub async fn recv(&self) -> Option<StatusSnapshot> {
        if let Ok(snapshot) = self.shared.rx.try_recv() {
            return Some(snapshot);
        }
        let _waiting = WaitingGuard::register(&self.shared);
        self.shared.rx.recv().await.ok()
    }
}

struct WaitingGuard<'a>(&'a Shared);

impl<'a> WaitingGuard<'a> {
    fn register(shared: &'a Shared) -> Self {
        *shared.waiting() += 1;
        Self(shared)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let mut waiting = self.0.waiting();
        *waiting = waiting.saturating_sub(1);
        if self.0.capacity == 0 {
            while self.0.rx.len() > *waiting {
                if self.0.rx.try_recv().is_err() {
                    break;
                }
                debug!("discarded status hand-off after its receiver left");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn snap(tag: &str) -> StatusSnapshot {
        [("ID", tag)].into_iter().collect()
    }

    #[test]
    fn test_latest_wins_capacity_one() {
        let mailbox = StatusMailbox::new(1);
        let cancel = CancellationToken::new();

        assert_eq!(mailbox.publish(snap("A"), &cancel), PublishOutcome::Delivered);
        assert_eq!(mailbox.publish(snap("B"), &cancel), PublishOutcome::Evicted(1));

        let rx = mailbox.receiver();
        assert_eq!(rx.try_recv(), Some(snap("B")));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_larger_capacity_keeps_newest() {
        let mailbox = StatusMailbox::new(2);
        let cancel = CancellationToken::new();
        for tag in ["A", "B", "C"] {
            mailbox.publish(snap(tag), &cancel);
        }
        assert_eq!(mailbox.len(), 2);
        assert_eq!(mailbox.try_recv(), Some(snap("B")));
        assert_eq!(mailbox.try_recv(), Some(snap("C")));
    }

    #[test]
    fn test_unbuffered_without_reader_drops() {
        let mailbox = StatusMailbox::new(0);
        let cancel = CancellationToken::new();
        assert_eq!(mailbox.publish(snap("A"), &cancel), PublishOutcome::Dropped);
        assert_eq!(mailbox.publish(snap("B"), &cancel), PublishOutcome::Dropped);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_cancelled_publish() {
        let mailbox = StatusMailbox::new(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(mailbox.publish(snap("A"), &cancel), PublishOutcome::Cancelled);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_clear() {
        let mailbox = StatusMailbox::new(1);
        mailbox.try_send(snap("A")).unwrap();
        assert_eq!(mailbox.clear(), 1);
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let mailbox = StatusMailbox::new(1);
        let rx = mailbox.receiver();
        let handle = tokio::spawn(async move { rx.recv().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        mailbox.publish(snap("A"), &CancellationToken::new());

        let got = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(snap("A")));
    }

    #[tokio::test]
    async fn test_unbuffered_hands_off_to_waiting_reader() {
        let mailbox = StatusMailbox::new(0);
        let rx = mailbox.receiver();
        let handle = tokio::spawn(async move { rx.recv().await });

        // Wait until the reader is parked.
        let cancel = CancellationToken::new();
        let mut outcome = PublishOutcome::Dropped;
        for _ in 0..100 {
            outcome = mailbox.publish(snap("A"), &cancel);
            if outcome == PublishOutcome::Delivered {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(outcome, PublishOutcome::Delivered);

        let got = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(snap("A")));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn keeps_only_the_newest(capacity in 1usize..4, count in 1usize..12) {
                let mailbox = StatusMailbox::new(capacity);
                let cancel = CancellationToken::new();
                for i in 0..count {
                    mailbox.publish(snap(&i.to_string()), &cancel);
                }

                let kept: Vec<_> = std::iter::from_fn(|| mailbox.try_recv()).collect();
                let expected: Vec<_> = (count.saturating_sub(capacity)..count)
                    .map(|i| snap(&i.to_string()))
                    .collect();
                prop_assert_eq!(kept, expected);
            }
        }
    }

    #[tokio::test]
    async fn test_dropped_recv_does_not_leave_waiter() {
        let mailbox = StatusMailbox::new(0);
        let rx = mailbox.receiver();
        let _ = tokio::time::timeout(Duration::from_millis(10), rx.recv()).await;
        assert_eq!(
            mailbox.publish(snap("A"), &CancellationToken::new()),
            PublishOutcome::Dropped
        );
    }

    #[tokio::test]
    async fn test_unbuffered_abandoned_hand_off_is_discarded() {
        let mailbox = StatusMailbox::new(0);
        let cancel = CancellationToken::new();
        let rx = mailbox.receiver();

        // Park a receiver, deliver to it, then drop it before it is polled again.
        let mut parked = Box::pin(rx.recv());
        assert!(tokio::time::timeout(Duration::from_millis(10), &mut parked)
            .await
            .is_err());
        assert_eq!(mailbox.publish(snap("A"), &cancel), PublishOutcome::Delivered);
        drop(parked);

        assert!(mailbox.is_empty());
        assert_eq!(mailbox.publish(snap("B"), &cancel), PublishOutcome::Dropped);
        assert_eq!(rx.try_recv(), None);

        // The next waiting receiver gets a fresh snapshot, never the stale one.
        let reader = mailbox.receiver();
        let handle = tokio::spawn(async move { reader.recv().await });
        let mut outcome = PublishOutcome::Dropped;
        for _ in 0..100 {
            outcome = mailbox.publish(snap("C"), &cancel);
            if outcome == PublishOutcome::Delivered {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(outcome, PublishOutcome::Delivered);
        let got = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(snap("C")));
    }

    #[test]
    fn test_eviction_finding_empty_slot_retries_offer() {
        let mailbox = StatusMailbox::new(1);
        let cancel = CancellationToken::new();
        mailbox.try_send(snap("A")).unwrap();

        // A consumer drains the slot between the failed offer and the eviction.
        let consumer = mailbox.receiver();
        let mut drained = Vec::new();
        let outcome = mailbox.publish_with(snap("B"), &cancel, || {
            drained.extend(consumer.try_recv());
            None
        });

        assert_eq!(outcome, PublishOutcome::Delivered);
        assert_eq!(drained, vec![snap("A")]);
        assert_eq!(mailbox.try_recv(), Some(snap("B")));
    }

    #[tokio::test]
    async fn test_buffered_recv_is_cancel_safe() {
        let mailbox = StatusMailbox::new(1);
        let rx = mailbox.receiver();
        let mut parked = Box::pin(rx.recv());
        assert!(tokio::time::timeout(Duration::from_millis(10), &mut parked)
            .await
            .is_err());
        mailbox.publish(snap("A"), &CancellationToken::new());
        drop(parked);
        assert_eq!(rx.try_recv(), Some(snap("A")));
    }
}
