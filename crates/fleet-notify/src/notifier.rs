//! Notifier contract and the log-only notifier.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),

    #[error("notification rejected: {0}")]
    Rejected(String),

    #[error("notification timed out")]
    Timeout,
}

/// Resolves to a delivery id on success.
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<String, NotifyError>> + Send + 'a>>;

/// Publishes a human-readable message to an external channel.
pub trait Notifier: Send + Sync {
    fn publish<'a>(&'a self, subject: &'a str, body: &'a str) -> NotifyFuture<'a>;
}

/// Writes notifications to the log. Used when no channel is configured.
#[derive(Debug, Default)]
pub struct LogNotifier {
    sent: AtomicU64,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notifier for LogNotifier {
    fn publish<'a>(&'a self, subject: &'a str, body: &'a str) -> NotifyFuture<'a> {
        Box::pin(async move {
            let seq = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
            info!(%subject, %body, seq, "notification");
            Ok(format!("log-{seq}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_numbers_deliveries() {
        let n = LogNotifier::new();
        assert_eq!(n.publish("s", "b").await.unwrap(), "log-1");
        assert_eq!(n.publish("s", "b").await.unwrap(), "log-2");
    }
}
