use std::error::Error;

use thiserror::Error;

/// Boxed error type carried by handler and transport failures.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Errors reported by a store transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The named persistent subscription does not exist on the server.
    #[error("subscription not found: {0}")]
    NotFound(String),
    /// The named persistent subscription already exists.
    #[error("subscription already exists: {0}")]
    AlreadyExists(String),
    /// The server could not be reached (after the transport's own retries).
    #[error("server unavailable: {0}")]
    Unavailable(String),
    /// The supplied credentials were rejected.
    #[error("access denied: {0}")]
    AccessDenied(String),
    /// The connection was already closed.
    #[error("connection closed")]
    Closed,
    /// Other error.
    #[error("transport error: {0}")]
    Other(BoxError),
}

/// Fatal error while attaching a subscription to its server-side cursor.
#[derive(Debug, Error)]
pub enum AttachError {
    /// Creating the missing cursor failed.
    #[error("failed to create subscription {subscription_id}: {source}")]
    Create {
        subscription_id: String,
        #[source]
        source: TransportError,
    },
    /// Attaching to the cursor failed.
    #[error("failed to attach subscription {subscription_id}: {source}")]
    Attach {
        subscription_id: String,
        #[source]
        source: TransportError,
    },
    /// The options supplied at start are not usable.
    #[error("invalid subscription options: {0}")]
    InvalidOptions(String),
    /// The subscription was stopped before it attached.
    #[error("subscription {0} stopped before attaching")]
    Cancelled(String),
}

impl AttachError {
    /// The transport error behind this attach failure, if any.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            AttachError::Create { source, .. } | AttachError::Attach { source, .. } => {
                Some(source)
            }
            AttachError::InvalidOptions(_) | AttachError::Cancelled(_) => None,
        }
    }
}

/// Error raised by an event handler. Local to one event.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Business logic rejected the event.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The subscription was stopped while the handler chain was running.
    #[error("handling cancelled")]
    Cancelled,
    /// Other error.
    #[error("{0}")]
    Other(BoxError),
}

impl HandlerError {
    /// Wrap any error as a handler error.
    pub fn other<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        HandlerError::Other(err.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Other(Box::new(err))
    }
}

/// Payload could not be decoded.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("json decode failed for {event_type}: {source}")]
    Json {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("bitcode decode failed for {event_type}: {source}")]
    Bitcode {
        event_type: String,
        #[source]
        source: bitcode::Error,
    },
    #[error("decoded {event_type} does not match the requested type")]
    TypeMismatch { event_type: String },
}

/// Subscription-level fatal error, surfaced once to whoever owns the lifetime.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error(
        "resubscribe of {subscription_id} failed after {attempts} attempt(s) \
         (last position {last_position:?}): {source}"
    )]
    Resubscribe {
        subscription_id: String,
        attempts: u32,
        last_position: Option<u64>,
        #[source]
        source: AttachError,
    },
    #[error("subscription driver of {subscription_id} aborted")]
    DriverAborted { subscription_id: String },
}
