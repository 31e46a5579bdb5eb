//! Downstream notifications for stored content.
//!
//! Every successful persist produces a `feed` and an `enrich` notification.
//! Delivery is best-effort: the pipeline spawns it and never waits on it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use refscout_shared::Result;
use refscout_storage::Storage;
use serde::Serialize;
use tracing::info;

/// Which downstream consumer a notification is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Feed,
    Enrich,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 2] = [Self::Feed, Self::Enrich];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Enrich => "enrich",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, content_id: &str, url: &str, kind: NotificationKind) -> Result<()>;
}

/// Writes notifications to the durable outbox table.
pub struct OutboxNotifier {
    storage: Arc<Storage>,
}

impl OutboxNotifier {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn notify(&self, content_id: &str, url: &str, kind: NotificationKind) -> Result<()> {
        self.storage
            .insert_notification(content_id, kind.as_str(), url)
            .await
    }
}

/// Only logs; for dry runs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, content_id: &str, url: &str, kind: NotificationKind) -> Result<()> {
        info!(content_id, url, %kind, "notification");
        Ok(())
    }
}
