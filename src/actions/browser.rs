//! Browser Automation
//!
//! Each `browser_action` step opens a fresh session, performs one command
//! and closes the session again. Sessions are never reused across steps.

use std::time::Duration;

use log::{debug, warn};

use super::ActionError;

/// One browser operation with its resolved arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserCommand {
    Navigate { url: String },
    Click { selector: String },
    Fill { selector: String, text: String },
    WaitFor { selector: String, timeout: Duration },
}

/// Creates browser sessions.
pub trait BrowserDriver: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn BrowserSession>, ActionError>;
}

/// A live browser session.
pub trait BrowserSession {
    fn navigate(&mut self, url: &str) -> Result<(), ActionError>;
    fn click(&mut self, selector: &str) -> Result<(), ActionError>;
    fn fill(&mut self, selector: &str, text: &str) -> Result<(), ActionError>;
    fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), ActionError>;
    fn close(self: Box<Self>) -> Result<(), ActionError>;
}

impl BrowserCommand {
    /// Runs this command in a session of its own.
    ///
    /// The session is closed even when the command fails; the command's
    /// error takes precedence over a close error.
    pub fn perform(&self, driver: &dyn BrowserDriver) -> Result<(), ActionError> {
        let mut session = driver.open_session()?;

        let result = match self {
            Self::Navigate { url } => session.navigate(url),
            Self::Click { selector } => session.click(selector),
            Self::Fill { selector, text } => session.fill(selector, text),
            Self::WaitFor { selector, timeout } => session.wait_for(selector, *timeout),
        };

        match (result, session.close()) {
            (Err(e), close) => {
                if let Err(close_error) = close {
                    warn!("Failed to close browser session: {}", close_error);
                }
                Err(e)
            }
            (Ok(()), close) => {
                debug!("Browser session closed");
                close
            }
        }
    }
}

/// Driver used when no browser backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableBrowser;

impl BrowserDriver for UnavailableBrowser {
    fn open_session(&self) -> Result<Box<dyn BrowserSession>, ActionError> {
        Err(ActionError::Unavailable("browser driver"))
    }
}
