//! Attach to a server-side cursor, creating it on demand.

use std::sync::Arc;

use crate::error::{AttachError, TransportError};
use crate::subscription::{StreamSelector, SubscriptionOptions};
use crate::transport::{event_channel, EventSource, LiveConnection, PersistentSubscriptionClient};

/// One live attachment: the connection plus the channel it feeds.
pub struct Attachment {
    pub connection: Arc<dyn LiveConnection>,
    pub source: EventSource,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment").finish_non_exhaustive()
    }
}

/// Attach to `subscription_id`.
///
/// A missing cursor is created with the option's settings and the attach is
/// retried exactly once. Any other failure is returned as is.
pub async fn attach(
    client: &dyn PersistentSubscriptionClient,
    subscription_id: &str,
    selector: &StreamSelector,
    options: &SubscriptionOptions,
) -> Result<Attachment, AttachError> {
    match subscribe_once(client, subscription_id, selector, options).await {
        Ok(attachment) => Ok(attachment),
        Err(TransportError::NotFound(_)) => {
            tracing::info!(
                subscription_id,
                stream = %selector,
                "persistent subscription not found, creating"
            );
            create(client, subscription_id, selector, options).await?;
            subscribe_once(client, subscription_id, selector, options)
                .await
                .map_err(|source| AttachError::Attach {
                    subscription_id: subscription_id.to_string(),
                    source,
                })
        }
        Err(source) => Err(AttachError::Attach {
            subscription_id: subscription_id.to_string(),
            source,
        }),
    }
}

/// Create the cursor. Losing a creation race to another client is success.
pub async fn create(
    client: &dyn PersistentSubscriptionClient,
    subscription_id: &str,
    selector: &StreamSelector,
    options: &SubscriptionOptions,
) -> Result<(), AttachError> {
    match client
        .create(
            subscription_id,
            selector,
            &options.create,
            options.credentials.as_ref(),
        )
        .await
    {
        Ok(()) => Ok(()),
        Err(TransportError::AlreadyExists(_)) => {
            tracing::debug!(subscription_id, "persistent subscription already exists");
            Ok(())
        }
        Err(source) => Err(AttachError::Create {
            subscription_id: subscription_id.to_string(),
            source,
        }),
    }
}

async fn subscribe_once(
    client: &dyn PersistentSubscriptionClient,
    subscription_id: &str,
    selector: &StreamSelector,
    options: &SubscriptionOptions,
) -> Result<Attachment, TransportError> {
    let (sink, source) = event_channel(options.buffer_size);
    let connection = client
        .subscribe(
            subscription_id,
            selector,
            options.buffer_size,
            options.auto_ack,
            options.credentials.as_ref(),
            sink,
        )
        .await?;
    Ok(Attachment { connection, source })
}
