use super::JoinedMember;
use crate::RAID_TARGET;
use crate::platform::{Notice, Platform};
use crate::store::{Collection, Filter, NoticeChannelRecord};
use chrono::Utc;
use poise::serenity_prelude::{ChannelId, GuildId, UserId};
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

/// Mentions listed on one page of a raid or holding cell listing
pub const MENTIONS_PER_PAGE: usize = 20;

const RAIDER_COLOUR: u32 = 0xe056fd;
const CLEAR_COLOUR: u32 = 0x55efc4;

/// Split users into numbered mention pages
#[must_use]
pub fn mention_pages(users: &[UserId]) -> Vec<String> {
    users
        .chunks(MENTIONS_PER_PAGE)
        .enumerate()
        .map(|(page, chunk)| {
            chunk
                .iter()
                .enumerate()
                .fold(String::new(), |mut text, (index, user_id)| {
                    let number = page * MENTIONS_PER_PAGE + index + 1;
                    let _ = writeln!(text, "{number}. \t<@{user_id}>");
                    text
                })
        })
        .collect()
}

/// Sends anti-raid notices to a guild's raid channels
#[derive(Clone)]
pub struct RaidNotifier {
    guild_id: GuildId,
    platform: Arc<dyn Platform>,
    channels: Arc<Collection<NoticeChannelRecord>>,
}

impl RaidNotifier {
    pub fn new(
        guild_id: GuildId,
        platform: Arc<dyn Platform>,
        channels: Arc<Collection<NoticeChannelRecord>>,
    ) -> Self {
        Self {
            guild_id,
            platform,
            channels,
        }
    }

    /// One "Potential Raider" notice per member
    pub async fn raiders(&self, members: &[JoinedMember]) {
        for member in members {
            let notice = Notice::new("Potential Raider", RAIDER_COLOUR)
                .field("Mention", format!("<@{}>", member.user_id), true)
                .field("ID", member.user_id.to_string(), true)
                .footer("Joined")
                .timestamp(member.joined_at);
            self.send(&notice).await;
        }
    }

    /// Raid mode is over
    pub async fn coast_clear(&self, quiet_timeout: Option<u64>) {
        let description = match quiet_timeout {
            Some(seconds) => {
                format!("No new joins within {seconds} seconds, system back to green.")
            }
            None => "System back to green, raid alert stopped manually.".to_string(),
        };
        let notice = Notice::new("Coast is Clear", CLEAR_COLOUR)
            .description(description)
            .footer("Lockdown lifted @")
            .timestamp(Utc::now());
        self.send(&notice).await;
    }

    async fn send(&self, notice: &Notice) {
        let channels = self
            .channels
            .find(&Filter::guild(self.guild_id.get()))
            .await;
        for channel in channels.into_iter().filter(|channel| channel.raid) {
            let outcome = self
                .platform
                .send_notice(ChannelId::new(channel.channel_id), notice)
                .await;
            debug!(
                target: RAID_TARGET,
                guild_id = %self.guild_id,
                channel_id = channel.channel_id,
                %outcome,
                "Sent {}",
                notice.title
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ActionOutcome, MockPlatform};

    #[test]
    fn test_mention_pages() {
        let users: Vec<UserId> = (1..=45).map(UserId::new).collect();
        let pages = mention_pages(&users);

        assert_eq!(pages.len(), 3);
        assert!(pages[0].starts_with("1. \t<@1>\n2. \t<@2>\n"));
        assert_eq!(pages[0].lines().count(), 20);
        assert!(pages[1].starts_with("21. \t<@21>\n"));
        assert_eq!(pages[2], "41. \t<@41>\n42. \t<@42>\n43. \t<@43>\n44. \t<@44>\n45. \t<@45>\n");
        assert!(mention_pages(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_only_raid_channels_of_the_guild_are_notified() {
        let mut platform = MockPlatform::new();
        platform
            .expect_send_notice()
            .withf(|channel_id, notice| {
                *channel_id == ChannelId::new(100)
                    && notice.description.as_deref()
                        == Some("System back to green, raid alert stopped manually.")
            })
            .times(1)
            .return_const(ActionOutcome::Success);

        let channels = Collection::in_memory();
        for (channel_id, guild_id, raid) in [(100, 1, true), (101, 1, false), (102, 2, true)] {
            channels
                .insert(NoticeChannelRecord {
                    channel_id,
                    guild_id,
                    raid,
                })
                .await
                .unwrap();
        }

        let notifier = RaidNotifier::new(GuildId::new(1), Arc::new(platform), Arc::new(channels));
        notifier.coast_clear(None).await;
    }
}
