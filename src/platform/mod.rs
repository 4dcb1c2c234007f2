//! Chat platform seam
//!
//! Everything the timers and the anti-raid guard need from Discord goes
//! through [`Platform`]. Calls never return the raw API error; they report an
//! [`ActionOutcome`] so that every call site decides explicitly whether a
//! failure matters. Lookups report a [`Presence`] for the same reason.

mod discord;
mod notice;

pub use discord::SerenityPlatform;
pub use notice::{Notice, NoticeField};

use poise::serenity_prelude::{ChannelId, GuildId, RoleId, UserId};

/// Result of a best-effort platform action
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ActionOutcome {
    #[display("success")]
    Success,
    /// The member, user or guild no longer exists or cannot be reached
    #[display("target unreachable")]
    TargetUnreachable,
    /// The bot lacks the permission or role hierarchy to act
    #[display("permission denied")]
    PermissionDenied,
    /// Any other API failure
    #[display("request failed: {_0}")]
    Failed(String),
}

impl ActionOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Result of checking whether a guild, role or user still exists
///
/// Only [`Presence::Gone`] justifies dropping stored data; a failed lookup
/// says nothing about the target.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum Presence {
    #[display("present")]
    Present,
    /// The platform confirmed the target no longer exists
    #[display("gone")]
    Gone,
    /// The lookup itself failed
    #[display("unknown ({_0})")]
    Unknown(String),
}

/// Permissions a mute role loses in a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// No sending messages, no reactions
    Text,
    /// No speaking, no connecting
    Voice,
}

/// Operations the bot performs against the chat platform
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Platform: Send + Sync {
    async fn guild_presence(&self, guild_id: GuildId) -> Presence;

    async fn role_presence(&self, guild_id: GuildId, role_id: RoleId) -> Presence;

    /// Whether the member holds the role, `None` if the user is not a member
    async fn member_has_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Option<bool>;

    /// Members currently holding the role
    async fn members_with_role(&self, guild_id: GuildId, role_id: RoleId) -> Vec<UserId>;

    async fn user_presence(&self, user_id: UserId) -> Presence;

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ActionOutcome;

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ActionOutcome;

    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ActionOutcome;

    async fn unban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ActionOutcome;

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ActionOutcome;

    async fn direct_message(&self, user_id: UserId, notice: &Notice) -> ActionOutcome;

    async fn send_notice(&self, channel_id: ChannelId, notice: &Notice) -> ActionOutcome;

    /// Deny the role the permissions of `kind` in the channel
    async fn deny_in_channel(
        &self,
        channel_id: ChannelId,
        role_id: RoleId,
        kind: ChannelKind,
    ) -> ActionOutcome;
}

/// Presence of a role, [`Presence::Gone`] as well when its guild is gone
pub async fn guild_role_presence(
    platform: &dyn Platform,
    guild_id: GuildId,
    role_id: RoleId,
) -> Presence {
    match platform.guild_presence(guild_id).await {
        Presence::Present => platform.role_presence(guild_id, role_id).await,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        assert_eq!(ActionOutcome::Success.to_string(), "success");
        assert_eq!(
            ActionOutcome::Failed("502 Bad Gateway".to_string()).to_string(),
            "request failed: 502 Bad Gateway"
        );
        assert!(ActionOutcome::Success.is_success());
        assert!(!ActionOutcome::PermissionDenied.is_success());
    }

    #[tokio::test]
    async fn test_guild_role_presence() {
        let mut platform = MockPlatform::new();
        platform
            .expect_guild_presence()
            .returning(|guild_id| match guild_id.get() {
                1 => Presence::Present,
                2 => Presence::Gone,
                _ => Presence::Unknown("503 Service Unavailable".to_string()),
            });
        platform
            .expect_role_presence()
            .times(1)
            .return_const(Presence::Gone);

        let role_id = RoleId::new(9);
        assert_eq!(
            guild_role_presence(&platform, GuildId::new(1), role_id).await,
            Presence::Gone
        );
        assert_eq!(
            guild_role_presence(&platform, GuildId::new(2), role_id).await,
            Presence::Gone
        );
        assert!(matches!(
            guild_role_presence(&platform, GuildId::new(3), role_id).await,
            Presence::Unknown(_)
        ));
    }
}
