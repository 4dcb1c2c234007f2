//! Join-flood detection
//!
//! Each guild with an anti-raid setup owns a [`RaidGuard`]. New members wait
//! in a holding cell for a probation interval; enough of them at once flips
//! the guild into raid mode, which flags everyone held and every later joiner
//! until the guild has been quiet for the configured timeout.

mod error;
mod guard;
mod notifier;
mod service;

pub use error::{RaidError, RaidResult};
pub use guard::{
    JoinOutcome, JoinedMember, MassActionReport, RaidGuard, RaidPhase, RaidSettings, RaidStatus,
};
pub use notifier::{MENTIONS_PER_PAGE, RaidNotifier, mention_pages};
pub use service::AntiRaidService;
