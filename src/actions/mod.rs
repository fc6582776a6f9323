//! Action Handlers
//!
//! Capability interfaces the interpreter calls to touch the outside world.
//! Every trait is `Send + Sync` so handlers can be shared with parallel
//! branches.
//!
//! - [`shell`]: [`ShellRunner`] and the bash-backed default
//! - [`browser`]: [`BrowserDriver`] / [`BrowserSession`]
//! - [`completion`]: [`TextCompletion`] for `ai_analyze` steps
//! - [`notify`]: [`Notifier`] for `notification` steps

pub mod browser;
pub mod completion;
pub mod notify;
pub mod shell;

use std::sync::Arc;

use thiserror::Error;

pub use browser::{BrowserCommand, BrowserDriver, BrowserSession, UnavailableBrowser};
pub use completion::{TextCompletion, UnavailableCompletion};
pub use notify::{ConsoleNotifier, Notifier};
pub use shell::{BashRunner, ShellOutput, ShellRequest, ShellRunner};

/// Failure reported by an action handler.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no {0} is configured")]
    Unavailable(&'static str),

    #[error("command failed with exit code {code:?}")]
    Process { code: Option<i32> },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("service error: {0}")]
    Service(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The set of handlers a run uses.
#[derive(Clone)]
pub struct Actions {
    pub shell: Arc<dyn ShellRunner>,
    pub browser: Arc<dyn BrowserDriver>,
    pub completion: Arc<dyn TextCompletion>,
    pub notifier: Arc<dyn Notifier>,
}

impl Actions {
    /// Replaces the shell runner.
    pub fn with_shell(mut self, shell: impl ShellRunner + 'static) -> Self {
        self.shell = Arc::new(shell);
        self
    }

    /// Replaces the browser driver.
    pub fn with_browser(mut self, browser: impl BrowserDriver + 'static) -> Self {
        self.browser = Arc::new(browser);
        self
    }

    /// Replaces the text-completion service.
    pub fn with_completion(mut self, completion: impl TextCompletion + 'static) -> Self {
        self.completion = Arc::new(completion);
        self
    }

    /// Replaces the notifier.
    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }
}

impl Default for Actions {
    fn default() -> Self {
        Self {
            shell: Arc::new(BashRunner),
            browser: Arc::new(UnavailableBrowser),
            completion: Arc::new(UnavailableCompletion),
            notifier: Arc::new(ConsoleNotifier),
        }
    }
}

impl std::fmt::Debug for Actions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actions").finish_non_exhaustive()
    }
}
