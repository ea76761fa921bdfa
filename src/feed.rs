//! Hand-off queue between the Drainer and the Redriver.
//!
//! Holds at most [`FEED_CAPACITY`] item. `push` waits while the slot is taken
//! and `pop` waits while it is empty, so the Drainer can never get ahead of
//! the Redriver by more than one message.

use tokio::sync::mpsc;

use crate::models::redrive::RedriveItem;

pub const FEED_CAPACITY: usize = 1;

pub struct FeedSender<D> {
    inner: mpsc::Sender<RedriveItem<D>>,
}

pub struct FeedReceiver<D> {
    inner: mpsc::Receiver<RedriveItem<D>>,
}

pub struct FeedSlot<'a, D> {
    permit: mpsc::Permit<'a, RedriveItem<D>>,
}

impl<D> FeedSlot<'_, D> {
    pub fn fill(self, item: RedriveItem<D>) {
        self.permit.send(item);
    }
}

/// The Redriver side is gone; the item comes back unresolved.
#[derive(Debug)]
pub struct FeedClosed<D>(pub RedriveItem<D>);

pub fn bounded<D>() -> (FeedSender<D>, FeedReceiver<D>) {
    let (tx, rx) = mpsc::channel(FEED_CAPACITY);
    (FeedSender { inner: tx }, FeedReceiver { inner: rx })
}

impl<D> FeedSender<D> {
    pub async fn push(&self, item: RedriveItem<D>) -> Result<(), FeedClosed<D>> {
        match self.inner.reserve().await {
            Ok(permit) => {
                permit.send(item);
                Ok(())
            }
            Err(_) => Err(FeedClosed(item)),
        }
    }

    /// Waits for a free slot without giving up the item yet.
    /// Returns `None` once the Redriver side has closed.
    pub async fn reserve(&self) -> Option<FeedSlot<'_, D>> {
        self.inner.reserve().await.ok().map(|permit| FeedSlot { permit })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl<D> FeedReceiver<D> {
    /// Returns `None` once every sender is dropped and the feed is empty.
    pub async fn pop(&mut self) -> Option<RedriveItem<D>> {
        self.inner.recv().await
    }

    /// Stops accepting pushes. Items already queued can still be popped.
    pub fn close(&mut self) {
        self.inner.close();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
