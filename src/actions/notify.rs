//! Notifications

use log::info;

use super::ActionError;

/// Delivers `notification` step messages.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str) -> Result<(), ActionError>;
}

/// Logs the message and prints it to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, message: &str) -> Result<(), ActionError> {
        info!("Sending notification: {}", message);
        println!("Notification Sent: {}", message);
        Ok(())
    }
}
