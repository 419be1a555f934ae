//! Per-message delivery state machine
//!
//! ```text
//!              ┌──► Acked         handler Ok
//! Delivered ───┼──► Redelivering  timeout / transient failure
//!              └──► Terminated    parse failure / permanent failure
//! ```
//!
//! `Redelivering` is only observed through the broker delivering the same
//! message again with a higher attempt count.

use crate::error::ProcessingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Delivered,
    Acked,
    Redelivering,
    /// Moved to the dead-letter sink, either directly or after exhausting redelivery
    Terminated,
}

/// Acknowledgement sent back to the durable log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Nak,
    Term(String),
}

/// Map a processing outcome to the acknowledgement sent to the log
pub fn decide(outcome: &Result<(), ProcessingError>) -> AckDecision {
    match outcome {
        Ok(()) => AckDecision::Ack,
        Err(e) if e.is_retryable() => AckDecision::Nak,
        Err(e) => AckDecision::Term(e.to_string()),
    }
}
