//! Notifier port: tells interested parties a command changed status.

use std::future::Future;
use std::sync::Arc;

use growdash_domain::command::Command;
use growdash_domain::error::GrowdashError;

/// Broadcasts command status changes (dashboards, logs, push channels).
///
/// Delivery is best-effort: callers log a failure and carry on.
pub trait CommandNotifier {
    /// Announce the command's current status.
    fn command_status_changed(
        &self,
        command: &Command,
    ) -> impl Future<Output = Result<(), GrowdashError>> + Send;
}

impl<T: CommandNotifier + Send + Sync> CommandNotifier for Arc<T> {
    fn command_status_changed(
        &self,
        command: &Command,
    ) -> impl Future<Output = Result<(), GrowdashError>> + Send {
        (**self).command_status_changed(command)
    }
}
