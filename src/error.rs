use serde::{Deserialize, Serialize};

/// A struct that represents an error with a context and possibly the propagated source error.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ContextError {
    pub context: String,
    pub source_error: Option<String>,
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source_error {
            Some(source_error) => write!(
                formatter,
                "{}: {}",
                self.context,
                minimize_first_letter(source_error.to_string()),
            ),
            None => write!(formatter, "{}", self.context),
        }
    }
}

impl std::error::Error for ContextError {}

impl ContextError {
    /// Create a new `ContextError` with the given context.
    pub fn with_context<S: Into<String>>(context: S) -> ContextError {
        ContextError {
            context: context.into(),
            source_error: None,
        }
    }

    /// Create a new `ContextError` with the given context and source error.
    pub fn with_error<S: Into<String>>(context: S, error: &dyn std::error::Error) -> ContextError {
        ContextError {
            context: context.into(),
            source_error: Some(error.to_string()),
        }
    }
}

/// The failure categories a user-triggered operation can end in. Every fault raised while
/// handling an event is folded into one of these variants and surfaced to the user as a
/// reply message, it never propagates out of the event handler.
#[derive(Debug, Clone)]
pub enum FlowError {
    /// The input did not match what the current session expects, for example a document
    /// with an unsupported extension. The session is terminated.
    InputRejected(String),
    /// The external converter was not found, failed, or did not produce the expected
    /// output file.
    Conversion(ContextError),
    /// The layout or render step failed, for example on corrupt image bytes.
    Render(ContextError),
    /// The finished result could not be handed over to the messaging gateway.
    Delivery(ContextError),
}

impl FlowError {
    /// The message shown to the user when the operation ends in this error.
    pub fn user_message(&self) -> String {
        match self {
            FlowError::InputRejected(message) => message.clone(),
            FlowError::Conversion(_) => "Could not convert the file".into(),
            FlowError::Render(_) => "Something went wrong while creating the PDF".into(),
            FlowError::Delivery(_) => "Could not send the finished document".into(),
        }
    }
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowError::InputRejected(message) => write!(formatter, "Input rejected: {}", message),
            FlowError::Conversion(error) => write!(formatter, "Conversion failed: {}", error),
            FlowError::Render(error) => write!(formatter, "Render failed: {}", error),
            FlowError::Delivery(error) => write!(formatter, "Delivery failed: {}", error),
        }
    }
}

impl std::error::Error for FlowError {}

/// Minimizes the first letter of a string, it is used for standardizing the error message.
fn minimize_first_letter(string: String) -> String {
    let mut characters = string.chars();
    match characters.next() {
        None => String::new(),
        Some(character) => character.to_lowercase().chain(characters).collect(),
    }
}
