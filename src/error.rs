use thiserror::Error;

/// Bad user input to a profile or PIN operation. Always recoverable and
/// never accompanied by a state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Name cannot be empty")]
    EmptyName,
    #[error("Name is the same")]
    SameName,
    #[error("Profile not found")]
    NotFound,
    #[error("Profile already exists")]
    AlreadyExists,
    #[error("At least one profile required")]
    LastProfile,
    #[error("PIN must be at least {min} digits")]
    PinTooShort { min: usize },
    #[error("PIN cannot be changed while locked")]
    PinChangeWhileLocked,
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Incorrect PIN")]
    Auth,
    #[error("platform failure: {0:#}")]
    Platform(anyhow::Error),
    #[error("shell coordinator is not running")]
    Closed,
}

impl ShellError {
    /// Message surfaced to the lock or profile UI.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

pub type ShellResult<T> = std::result::Result<T, ShellError>;

#[cfg(test)]
mod tests {
    use super::{ShellError, ValidationError};

    #[test]
    fn validation_messages_match_profile_ui_copy() {
        assert_eq!(
            ValidationError::AlreadyExists.to_string(),
            "Profile already exists"
        );
        assert_eq!(
            ValidationError::PinTooShort { min: 4 }.to_string(),
            "PIN must be at least 4 digits"
        );
        let err: ShellError = ValidationError::LastProfile.into();
        assert_eq!(err.user_message(), "At least one profile required");
    }

    #[test]
    fn platform_errors_keep_context_chain() {
        let err = ShellError::Platform(
            anyhow::anyhow!("renderer crashed").context("failed to create content surface"),
        );
        let message = err.to_string();
        assert!(message.contains("failed to create content surface"));
        assert!(message.contains("renderer crashed"));
    }
}
