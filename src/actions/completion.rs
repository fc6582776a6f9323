//! Text Generation
//!
//! `ai_analyze` steps hand `"<prompt> <input>"` to a [`TextCompletion`]
//! service and publish the generated text.

use super::ActionError;

/// Generates text from a prompt.
pub trait TextCompletion: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, ActionError>;
}

/// Service used when no text-generation backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableCompletion;

impl TextCompletion for UnavailableCompletion {
    fn complete(&self, _prompt: &str) -> Result<String, ActionError> {
        Err(ActionError::Unavailable("text completion service"))
    }
}

/// Joins a prompt and its input payload with a single space.
pub fn compose_prompt(prompt: &str, input: &str) -> String {
    format!("{} {}", prompt, input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_prompt() {
        assert_eq!(compose_prompt("Summarize:", "the text"), "Summarize: the text");
        assert_eq!(compose_prompt("Summarize:", ""), "Summarize: ");
    }

    #[test]
    fn test_unavailable_completion() {
        assert!(matches!(
            UnavailableCompletion.complete("hi"),
            Err(ActionError::Unavailable(_))
        ));
    }
}
