//! Durable subscription engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              PersistentSubscription::start()                 │
//! │  lifecycle: attach ─NotFound─▶ create ─▶ attach (once)       │
//! └─────────────────────────────────────────────────────────────┘
//!                            │ SubscriptionHandle
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      driver task                             │
//! │  inbound event ─▶ delivery task (≤ buffer_size in flight)    │
//! │  drop          ─▶ recovery state machine                     │
//! │  stop          ─▶ cancel lifetime, close connection once     │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  delivery: map ─▶ HandlerPipeline ─▶ ack | nack(strategy)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod delivery;
mod engine;
mod failure;
mod handle;
pub mod lifecycle;
mod options;
mod recovery;

pub use engine::PersistentSubscription;
pub use failure::{FailureHandler, ParkOnFailure, RetryOnFailure, RetryThenPark, SkipOnFailure};
pub use handle::SubscriptionHandle;
pub use options::{
    CreateSettings, Credentials, StartPosition, StreamSelector, SubscriptionOptions,
    DEFAULT_BUFFER_SIZE,
};
pub use recovery::{FixedRetry, NoRetry, RetryPolicy, SubscriptionExit, SubscriptionState};
