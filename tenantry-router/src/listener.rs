//! PostgreSQL LISTEN/NOTIFY listener for tenant directory changes.
//!
//! Writers of the tenant directory emit
//! `NOTIFY tenantry_tenant_changes, '{"tenant": "acme", "revision": 6}'`
//! after committing. The listener forwards each notification to an
//! [`InvalidationChannel`], which fans it out to every attached cache.
//!
//! Notifications sent while the listener is disconnected are lost, so every
//! reconnect publishes [`Invalidation::All`](tenantry_storage::Invalidation)
//! to clear the caches.

use futures_util::{stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tenantry_core::{ConfigError, Revision, SchemaName, TenantId};
use tenantry_storage::{InvalidationChannel, InvalidationEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, NoTls, Notification};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default NOTIFY channel for tenant directory changes.
pub const DEFAULT_NOTIFY_CHANNEL: &str = "tenantry_tenant_changes";

/// Delay before reconnecting after a listener failure.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const NOTIFICATION_BUFFER: usize = 256;

// ============================================================================
// PAYLOAD
// ============================================================================

#[derive(Debug, Deserialize)]
struct NotifyPayload {
    tenant: String,
    #[serde(default)]
    revision: Option<i64>,
}

/// Parse a NOTIFY payload into an invalidation event.
pub fn parse_payload(payload: &str) -> Result<InvalidationEvent, ListenerError> {
    let parsed: NotifyPayload =
        serde_json::from_str(payload).map_err(|e| ListenerError::Payload(e.to_string()))?;
    let tenant =
        TenantId::parse(&parsed.tenant).map_err(|e| ListenerError::Payload(e.to_string()))?;

    match parsed.revision {
        Some(raw) => {
            let revision =
                Revision::from_db(raw).map_err(|e| ListenerError::Payload(e.to_string()))?;
            Ok(InvalidationEvent::at(tenant, revision))
        }
        None => Ok(InvalidationEvent::tenant(tenant)),
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that end one listening session.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Invalid notification payload: {0}")]
    Payload(String),

    #[error("Notification connection closed")]
    Closed,
}

// ============================================================================
// LISTENER
// ============================================================================

/// Forwards tenant change notifications to an invalidation channel.
pub struct PgInvalidationListener {
    pg_config: tokio_postgres::Config,
    channel: InvalidationChannel,
    notify_channel: String,
    reconnect_delay: Duration,
}

impl PgInvalidationListener {
    pub fn new(pg_config: tokio_postgres::Config, channel: InvalidationChannel) -> Self {
        Self {
            pg_config,
            channel,
            notify_channel: DEFAULT_NOTIFY_CHANNEL.to_string(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    /// Listen on a different NOTIFY channel.
    pub fn with_notify_channel(mut self, name: &str) -> Result<Self, ConfigError> {
        let name = SchemaName::parse(name).map_err(|e| ConfigError::InvalidValue {
            field: "notify_channel".to_string(),
            value: name.to_string(),
            reason: e.to_string(),
        })?;
        self.notify_channel = name.into();
        Ok(self)
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn notify_channel(&self) -> &str {
        &self.notify_channel
    }

    /// Start listening in the background.
    ///
    /// The task reconnects after every failure and runs until aborted.
    pub fn start(self) -> JoinHandle<()> {
        tracing::info!(channel = %self.notify_channel, "Starting tenant change listener");

        tokio::spawn(async move {
            loop {
                let e = match self.listen().await {
                    Ok(never) => match never {},
                    Err(e) => e,
                };
                tracing::error!(
                    error = %e,
                    delay_secs = self.reconnect_delay.as_secs(),
                    "Tenant change listener error, reconnecting"
                );
                tokio::time::sleep(self.reconnect_delay).await;
            }
        })
    }

    async fn listen(&self) -> Result<Infallible, ListenerError> {
        let (client, mut connection) = self.pg_config.connect(NoTls).await?;

        // The connection only makes progress while polled, so drive it on its
        // own task and hand notifications back over a channel.
        let (tx, mut rx) = mpsc::channel::<Notification>(NOTIFICATION_BUFFER);
        let driver = tokio::spawn(async move {
            let mut messages = stream::poll_fn(move |cx| connection.poll_message(cx));
            while let Some(message) = messages.next().await {
                match message? {
                    AsyncMessage::Notification(n) => {
                        if tx.send(n).await.is_err() {
                            break;
                        }
                    }
                    AsyncMessage::Notice(notice) => {
                        tracing::debug!(notice = %notice, "Listener connection notice");
                    }
                    _ => {}
                }
            }
            Ok::<(), tokio_postgres::Error>(())
        });

        client
            .batch_execute(&format!("LISTEN \"{}\"", self.notify_channel))
            .await?;
        tracing::info!(channel = %self.notify_channel, "Listening for tenant changes");

        self.resync();

        while let Some(notification) = rx.recv().await {
            self.forward(notification.payload());
        }

        match driver.await {
            Ok(Err(e)) => Err(ListenerError::Database(e)),
            _ => Err(ListenerError::Closed),
        }
    }

    /// Clear every attached cache. Changes committed before `LISTEN` took
    /// effect were never notified, whether this is the first connection or a
    /// reconnect.
    fn resync(&self) -> usize {
        let receivers = self.channel.publish_all();
        tracing::warn!(receivers, "Listener connected, clearing tenant caches");
        receivers
    }

    fn forward(&self, payload: &str) {
        tracing::debug!(payload = %payload, "Received tenant NOTIFY");
        match parse_payload(payload) {
            Ok(event) => {
                tracing::info!(
                    tenant = %event.tenant_id,
                    revision = ?event.revision,
                    "Tenant changed"
                );
                if self.channel.publish(event) == 0 {
                    tracing::warn!("Tenant change dropped, no cache subscribed");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, payload = %payload, "Failed to parse tenant NOTIFY payload");
            }
        }
    }
}
