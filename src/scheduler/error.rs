//! Error types for scheduled actions and the services built on them

use crate::platform::ActionOutcome;
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by [`DelayedTask`](super::DelayedTask)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The target time is not in the future
    #[error("Time has passed: {0}")]
    PastTime(DateTime<Utc>),

    /// `cancel` was called with nothing running
    #[error("No execution is running")]
    NoActiveExecution,

    /// `schedule` was called on a task that already has an execution
    #[error("Execution is already running")]
    AlreadyRunning,
}

/// Result type for scheduling operations
pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Errors surfaced by the mute, temporary ban and reminder services
#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("Mute role not set up in this server")]
    NoMuteRole,

    #[error("User is not muted, unable to remove duration")]
    NotMuted,

    #[error("User is not temporarily banned, unable to remove duration")]
    NotTempBanned,

    #[error("Can not find the reminder: {0}")]
    ReminderNotFound(u64),

    /// Discord refused an action the command depends on
    #[error("Discord refused the action: {0}")]
    Refused(ActionOutcome),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ScheduleError::NoActiveExecution;
        assert_eq!(error.to_string(), "No execution is running");

        let error = ModerationError::from(ScheduleError::AlreadyRunning);
        assert_eq!(error.to_string(), "Execution is already running");

        let error = ModerationError::Refused(ActionOutcome::PermissionDenied);
        assert_eq!(error.to_string(), "Discord refused the action: permission denied");
    }
}
