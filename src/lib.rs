mod checkpoint;
mod error;
mod event;
mod handler;
mod observe;
mod position;
pub mod serialization;
mod subscription;
mod transport;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore, NoOpCheckpointStore};
pub use error::{
    AttachError, BoxError, HandlerError, SerializationError, SubscriptionError, TransportError,
};
pub use event::{EventRef, ReceivedEvent, RecordedEvent, WireEvent};
pub use handler::{
    DeliveryOutcome, EventHandler, HandlerPipeline, HandlingStatus, PipelineBuilder,
    TypedHandler,
};
pub use observe::{
    DropReport, FatalReport, NullObserver, StatsSnapshot, SubscriptionObserver,
    SubscriptionStats, TracingObserver,
};
pub use position::{GapMeasure, GapTracker, TipReader};
pub use subscription::lifecycle;
pub use subscription::{
    CreateSettings, Credentials, FailureHandler, FixedRetry, NoRetry, ParkOnFailure,
    PersistentSubscription, RetryOnFailure, RetryPolicy, RetryThenPark, SkipOnFailure,
    StartPosition, StreamSelector, SubscriptionExit, SubscriptionHandle, SubscriptionOptions,
    SubscriptionState, DEFAULT_BUFFER_SIZE,
};
pub use transport::{
    event_channel, ConnectionEvent, DropReason, EventSink, EventSource, LiveConnection,
    NackAction, PersistentSubscriptionClient,
};

#[cfg(feature = "in-memory")]
pub use transport::{InMemoryPersistentStore, SubscriptionGroupInfo, LINK_EVENT_TYPE};

// Re-exported so handlers can be written without a direct dependency.
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
