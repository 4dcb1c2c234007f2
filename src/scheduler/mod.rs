//! Scheduled one-shot actions
//!
//! [`DelayedTask`] runs a [`ScheduledAction`] once at a target time and
//! guarantees its cleanup runs exactly once, whether the action fires or is
//! cancelled. Mutes, temporary bans and reminders are built on top of it; each
//! service owns the live timers of its kind and rebuilds them from the store
//! at startup.

mod delayed;
mod error;
mod mute;
mod reminder;
mod temp_ban;

pub use delayed::{DelayedTask, ScheduledAction};
pub use error::{ModerationError, ModerationResult, ScheduleError, ScheduleResult};
pub use mute::{MuteOutcome, MuteService, MuteTimer, UnmuteOutcome};
pub use reminder::{MAX_REMINDERS_PER_USER, ReminderService, ReminderTimer};
pub use temp_ban::{TempBanOutcome, TempBanService, TempBanTimer};

/// Summary of a startup recovery sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Records rescheduled as live timers
    pub scheduled: usize,
    /// Overdue records whose action was run immediately
    pub late: usize,
    /// Records dropped because their guild, role or user is gone
    pub purged: usize,
}
