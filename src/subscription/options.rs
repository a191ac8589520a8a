//! Subscription configuration.
//!
//! One immutable value, fixed when the subscription starts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AttachError;

/// Which part of the log the subscription consumes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSelector {
    /// A single stream.
    Stream(String),
    /// The whole log.
    All,
}

impl StreamSelector {
    pub fn stream(stream_id: impl Into<String>) -> Self {
        StreamSelector::Stream(stream_id.into())
    }

    /// Check whether an event from `stream_id` belongs to this selection.
    pub fn matches(&self, stream_id: &str) -> bool {
        match self {
            StreamSelector::Stream(s) => s == stream_id,
            StreamSelector::All => true,
        }
    }
}

impl fmt::Display for StreamSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSelector::Stream(s) => f.write_str(s),
            StreamSelector::All => f.write_str("$all"),
        }
    }
}

/// Where a newly created cursor starts reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    #[default]
    Beginning,
    End,
    /// Global position (for `$all`) or stream position (for a stream).
    Position(u64),
}

/// Settings used when the server-side cursor has to be created.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateSettings {
    /// Deliver the target of link events instead of the link itself.
    pub resolve_link_tos: bool,
    pub start_from: StartPosition,
}

/// Store credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Default number of unacknowledged events in flight.
pub const DEFAULT_BUFFER_SIZE: usize = 10;

/// Options for one persistent subscription.
///
/// Defaults: buffer size 10, manual acknowledgement, no link resolution,
/// start from the beginning, no credentials.
///
/// ## Example
///
/// ```
/// use sourced_subscriptions::SubscriptionOptions;
///
/// let json = r#"{ "buffer_size": 32, "auto_ack": false }"#;
/// let options = SubscriptionOptions::from_json(json).unwrap();
/// assert_eq!(options.buffer_size, 32);
/// assert!(!options.create.resolve_link_tos);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionOptions {
    pub create: CreateSettings,
    /// The transport acknowledges implicitly; the engine never sends acks.
    pub auto_ack: bool,
    /// Bounds how many unacknowledged events may be outstanding.
    pub buffer_size: usize,
    pub credentials: Option<Credentials>,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            create: CreateSettings::default(),
            auto_ack: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            credentials: None,
        }
    }
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    pub fn with_resolve_link_tos(mut self, resolve: bool) -> Self {
        self.create.resolve_link_tos = resolve;
        self
    }

    pub fn with_start_from(mut self, start_from: StartPosition) -> Self {
        self.create.start_from = start_from;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), AttachError> {
        if self.buffer_size == 0 {
            return Err(AttachError::InvalidOptions(
                "buffer_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
