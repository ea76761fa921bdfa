use anyhow::Error;
use async_trait::async_trait;
use lapin::types::FieldTable;

/// A message parked in the dead-letter queue, owned until it is resolved.
///
/// Both resolution methods take `self`, so a handle can be acknowledged or
/// rejected at most once.
#[async_trait]
pub trait DeadLetter: Send + Sync + 'static {
    fn delivery_tag(&self) -> u64;

    fn body(&self) -> &[u8];

    fn headers(&self) -> Option<&FieldTable>;

    async fn acknowledge(self) -> Result<(), Error>;

    async fn reject(self, requeue: bool) -> Result<(), Error>;
}

/// An accepted dead letter on its way back to where it was first published.
#[derive(Debug)]
pub struct RedriveItem<D> {
    pub message: D,
    pub target_exchange: String,
    pub target_routing_key: String,
}
