//! Persisted record types
//!
//! These are the documents written to the store. Timers and guards are rebuilt
//! from them at startup.

use super::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A timed mute of one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteRecord {
    /// Guild where the member is muted
    pub guild_id: u64,
    /// The muted member
    pub user_id: u64,
    /// When the mute expires
    pub end: DateTime<Utc>,
    /// Reason given by the moderator
    pub reason: String,
}

impl Record for MuteRecord {
    const COLLECTION: &'static str = "mute_time";

    fn guild_id(&self) -> Option<u64> {
        Some(self.guild_id)
    }

    fn user_id(&self) -> Option<u64> {
        Some(self.user_id)
    }
}

/// The mute role configured for a guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteRoleRecord {
    pub guild_id: u64,
    pub role_id: u64,
}

impl Record for MuteRoleRecord {
    const COLLECTION: &'static str = "mute_role";

    fn guild_id(&self) -> Option<u64> {
        Some(self.guild_id)
    }
}

/// A temporary ban
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempBanRecord {
    /// ID of the request that issued the ban
    pub id: u64,
    pub guild_id: u64,
    pub user_id: u64,
    /// When the ban is lifted
    pub end: DateTime<Utc>,
    /// Audit log reason, reused for the unban
    pub reason: String,
}

impl Record for TempBanRecord {
    const COLLECTION: &'static str = "temp_ban";

    fn id(&self) -> Option<u64> {
        Some(self.id)
    }

    fn guild_id(&self) -> Option<u64> {
        Some(self.guild_id)
    }

    fn user_id(&self) -> Option<u64> {
        Some(self.user_id)
    }
}

/// A reminder to be delivered by direct message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRecord {
    /// ID of the request that created the reminder
    pub id: u64,
    pub user_id: u64,
    /// What to remind the user of
    pub details: String,
    pub end: DateTime<Utc>,
}

impl Record for ReminderRecord {
    const COLLECTION: &'static str = "reminders";

    fn id(&self) -> Option<u64> {
        Some(self.id)
    }

    fn user_id(&self) -> Option<u64> {
        Some(self.user_id)
    }
}

/// Anti-raid settings of a guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidConfigRecord {
    pub guild_id: u64,
    /// Role given to suspected raiders
    pub role_id: u64,
    /// Master switch, joins are ignored while off
    pub enabled: bool,
    /// Joins held at once that trigger raid mode
    pub threshold: usize,
    /// Seconds a new member stays in the holding cell
    pub hold_interval: u64,
    /// Seconds without joins before raid mode lifts itself
    pub quiet_timeout: u64,
}

impl RaidConfigRecord {
    pub const DEFAULT_THRESHOLD: usize = 3;
    pub const DEFAULT_HOLD_INTERVAL: u64 = 5;
    pub const DEFAULT_QUIET_TIMEOUT: u64 = 60;

    /// Settings for a freshly created anti-raid guard
    #[must_use]
    pub fn new(guild_id: u64, role_id: u64) -> Self {
        Self {
            guild_id,
            role_id,
            enabled: true,
            threshold: Self::DEFAULT_THRESHOLD,
            hold_interval: Self::DEFAULT_HOLD_INTERVAL,
            quiet_timeout: Self::DEFAULT_QUIET_TIMEOUT,
        }
    }
}

impl Record for RaidConfigRecord {
    const COLLECTION: &'static str = "anti_raid";

    fn guild_id(&self) -> Option<u64> {
        Some(self.guild_id)
    }
}

/// A channel that receives anti-raid notices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeChannelRecord {
    pub channel_id: u64,
    pub guild_id: u64,
    /// Whether raid alerts go to this channel
    pub raid: bool,
}

impl Record for NoticeChannelRecord {
    const COLLECTION: &'static str = "raid_channels";

    fn id(&self) -> Option<u64> {
        Some(self.channel_id)
    }

    fn guild_id(&self) -> Option<u64> {
        Some(self.guild_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raid_config_defaults() {
        let config = RaidConfigRecord::new(1, 2);
        assert!(config.enabled);
        assert_eq!(config.threshold, 3);
        assert_eq!(config.hold_interval, 5);
        assert_eq!(config.quiet_timeout, 60);
    }

    #[test]
    fn test_temp_ban_serialization() {
        let record = TempBanRecord {
            id: 555,
            guild_id: 11111,
            user_id: 12345,
            end: "2023-01-02T00:00:00Z".parse().unwrap(),
            reason: "Temporary ban until later".to_string(),
        };

        let serialized = serde_yaml::to_string(&record).expect("Failed to serialize");
        assert!(serialized.contains("id: 555"));
        assert!(serialized.contains("guild_id: 11111"));

        let deserialized: TempBanRecord =
            serde_yaml::from_str(&serialized).expect("Failed to deserialize");
        assert_eq!(deserialized, record);
    }
}
