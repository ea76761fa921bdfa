/// What the Drainer did with one dead-lettered delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainDecision {
    /// Handed to the Redriver, which now owns its resolution.
    Accepted,
    /// Original routing key is not allow-listed; rejected without requeue.
    Filtered,
    /// `x-death` metadata could not be decoded; rejected without requeue.
    Undecodable,
    /// Shutdown arrived before the item could be handed off; rejected with
    /// requeue so the broker redelivers it.
    Requeued,
}

/// Terminal state of a redriven item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedriveOutcome {
    Acked,
    Requeued,
}
