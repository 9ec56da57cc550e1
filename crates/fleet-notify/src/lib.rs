//! fleet-notify: publishing fleet change summaries.
//!
//! Notifications are best effort: the control loop logs a
//! [`NotifyError`] and carries on.

pub mod notifier;
pub mod webhook;

pub use notifier::{LogNotifier, NotifyError, NotifyFuture, Notifier};
pub use webhook::WebhookNotifier;
