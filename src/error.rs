//! Error types shared by the store, the notification surface and the
//! reminder service.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReminderError {
    /// Empty name, malformed time and similar entry mistakes. The user is
    /// expected to correct the input and try again.
    #[error("Invalid input: {0}")]
    InputValidation(String),

    /// Reading or writing a record file failed.
    #[error("Record store unavailable: {0}")]
    StoreUnavailable(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The desktop notification, chime or speech synthesizer could not be
    /// reached.
    #[error("Notification surface failed: {0}")]
    NotificationSurface(String),

    #[error("Medicine not found: {0}")]
    NotFound(String),

    #[error("Medicine already exists: {0}")]
    Duplicate(String),

    #[error("Reminder service is not running")]
    ServiceStopped,
}

pub type Result<T> = std::result::Result<T, ReminderError>;

impl ReminderError {
    /// True for errors the user can fix by re-entering data.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InputValidation(_) | Self::NotFound(_) | Self::Duplicate(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_store_unavailable() {
        let err: ReminderError = std::io::Error::other("disk gone").into();
        assert!(matches!(err, ReminderError::StoreUnavailable(_)));
        assert!(!err.is_input_error());
        assert_eq!(err.to_string(), "Record store unavailable: disk gone");
    }

    #[test]
    fn input_errors_are_flagged() {
        assert!(ReminderError::InputValidation("empty".into()).is_input_error());
        assert!(ReminderError::Duplicate("Aspirin".into()).is_input_error());
        assert!(!ReminderError::ServiceStopped.is_input_error());
    }
}
