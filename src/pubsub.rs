//! Subscribers should be used to receive sync status updates.

/// Max size of subscriber backlog.
const SUBSCRIPTION_BUFFER_LEN: usize = 256;

use std::{
    future::Future,
    pin::Pin,
    sync::{Mutex, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use indexmap::IndexMap;
use log::debug;
use thiserror::Error;
use tokio::{
    sync::mpsc::{channel, error::TryRecvError, error::TrySendError, Receiver, Sender},
    time::error::Elapsed,
};

use crate::sync::SyncStatus;

/// A means of receiving status updates as sync cycles progress. Subscribers
/// are handed out by the indexer's `subscribe` method.
pub struct Subscriber(Receiver<SyncStatus>);

impl Subscriber {
    pub(crate) fn new(receiver: Receiver<SyncStatus>) -> Subscriber {
        Subscriber(receiver)
    }

    /// Waits for a status update.
    ///
    /// Returns `None` if the channel is closed.
    pub async fn recv(&mut self) -> Option<SyncStatus> {
        self.0.recv().await
    }

    /// Blocks while waiting for a status update.
    ///
    /// Returns `None` if the channel is closed.
    ///
    /// # Panics
    ///
    /// This function panics if called within an asynchronous execution
    /// context.
    pub fn blocking_recv(&mut self) -> Option<SyncStatus> {
        self.0.blocking_recv()
    }

    /// Attempts to retrieve a status update without blocking. Returns
    /// immediately if no update is available.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed or if there is no update.
    pub fn try_recv(&mut self) -> Result<SyncStatus, SubscriberError> {
        Ok(self.0.try_recv()?)
    }

    /// Attempts to wait for a status update, returning an error if no update
    /// arrives within the provided `Duration`. Returns `None` if the channel
    /// is closed.
    ///
    /// # Errors
    ///
    /// Returns an error if no update is received in time.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<SyncStatus>, SubscriberError> {
        Ok(tokio::time::timeout(timeout, self.0.recv()).await?)
    }
}

impl Future for Subscriber {
    type Output = Option<SyncStatus>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.poll_recv(cx)
    }
}

/// Holds the latest status snapshot and fans updates out to subscribers.
///
/// Publishing never blocks: subscribers that have fallen behind miss
/// intermediate updates, and subscribers that have been dropped are removed
/// on the next publish.
pub(crate) struct Publisher {
    latest: Mutex<SyncStatus>,
    subscribers: Mutex<IndexMap<SenderId, Sender<SyncStatus>>>,
}

impl Publisher {
    pub(crate) fn new() -> Publisher {
        Publisher {
            latest: Mutex::new(SyncStatus::default()),
            subscribers: Mutex::new(IndexMap::new()),
        }
    }

    /// The most recently published status. Always a consistent snapshot.
    pub(crate) fn latest(&self) -> SyncStatus {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn subscribe(&self) -> Subscriber {
        let (tx, rx) = channel(SUBSCRIPTION_BUFFER_LEN);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(SenderId::new(), tx);
        Subscriber::new(rx)
    }

    pub(crate) fn publish(&self, status: SyncStatus) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = status.clone();

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut closed = Vec::new();
        for (&id, sender) in subscribers.iter() {
            match sender.try_send(status.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("Status subscriber backlog full; dropping update");
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }
        for id in closed {
            subscribers.shift_remove(&id);
        }
    }
}

#[derive(Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
struct SenderId(u128);

impl SenderId {
    fn new() -> SenderId {
        SenderId(rand::random())
    }
}

/// An error occurring while receiving status updates.
#[derive(Error, Debug)]
pub enum SubscriberError {
    /// Timed out before receiving update.
    #[error("subscriber recv timeout: {0}")]
    RecvTimeout(#[from] Elapsed),
    /// Subscriber is empty or disconnected.
    #[error("subscriber try recv failed: {0}")]
    TryRecv(#[from] TryRecvError),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::Publisher;
    use crate::sync::SyncStatus;

    #[tokio::test]
    async fn subscribers_receive_published_updates() {
        let publisher = Publisher::new();
        let mut subscriber = publisher.subscribe();

        let status = SyncStatus {
            current_height: 42,
            ..SyncStatus::default()
        };
        publisher.publish(status.clone());

        assert_eq!(subscriber.recv().await, Some(status));
    }

    #[tokio::test]
    async fn latest_reflects_last_publish() {
        let publisher = Publisher::new();
        assert_eq!(publisher.latest(), SyncStatus::default());

        publisher.publish(SyncStatus {
            current_height: 7,
            ..SyncStatus::default()
        });
        publisher.publish(SyncStatus {
            current_height: 8,
            ..SyncStatus::default()
        });
        assert_eq!(publisher.latest().current_height, 8);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_cleaned_up() {
        let publisher = Publisher::new();
        let subscriber = publisher.subscribe();
        drop(subscriber);

        publisher.publish(SyncStatus::default());
        publisher.publish(SyncStatus::default());
        assert_eq!(
            publisher
                .subscribers
                .lock()
                .unwrap()
                .len(),
            0
        );
    }
}
