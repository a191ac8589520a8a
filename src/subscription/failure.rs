//! Failure strategy for events whose handler pipeline failed.
//!
//! The strategy only picks the disposition; the delivery loop sends the
//! single negative acknowledgement itself.

use crate::error::HandlerError;
use crate::event::ReceivedEvent;
use crate::transport::NackAction;

/// Decides what the server should do with an event that failed processing.
pub trait FailureHandler: Send + Sync {
    fn on_failure(&self, event: &ReceivedEvent, error: &HandlerError) -> NackAction;
}

impl<F> FailureHandler for F
where
    F: Fn(&ReceivedEvent, &HandlerError) -> NackAction + Send + Sync,
{
    fn on_failure(&self, event: &ReceivedEvent, error: &HandlerError) -> NackAction {
        self(event, error)
    }
}

/// Always ask for redelivery.
///
/// This is the default. A handler that fails permanently makes the server
/// redeliver the same event indefinitely; production subscriptions usually
/// want [`ParkOnFailure`] or a policy of their own.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryOnFailure;

impl FailureHandler for RetryOnFailure {
    fn on_failure(&self, _event: &ReceivedEvent, _error: &HandlerError) -> NackAction {
        NackAction::Retry
    }
}

/// Move failed events to the parked (dead-letter) stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParkOnFailure;

impl FailureHandler for ParkOnFailure {
    fn on_failure(&self, _event: &ReceivedEvent, _error: &HandlerError) -> NackAction {
        NackAction::Park
    }
}

/// Drop failed events.
#[derive(Clone, Copy, Debug, Default)]
pub struct SkipOnFailure;

impl FailureHandler for SkipOnFailure {
    fn on_failure(&self, _event: &ReceivedEvent, _error: &HandlerError) -> NackAction {
        NackAction::Skip
    }
}

/// Retry a limited number of times, then park.
#[derive(Clone, Copy, Debug)]
pub struct RetryThenPark {
    pub max_retries: u32,
}

impl FailureHandler for RetryThenPark {
    fn on_failure(&self, event: &ReceivedEvent, _error: &HandlerError) -> NackAction {
        if event.retry_count < self.max_retries {
            NackAction::Retry
        } else {
            NackAction::Park
        }
    }
}
