use super::{JoinOutcome, JoinedMember, RaidError, RaidGuard, RaidNotifier, RaidResult, RaidSettings};
use crate::RAID_TARGET;
use crate::platform::{Platform, Presence, guild_role_presence};
use crate::store::{Collection, Filter, NoticeChannelRecord, RaidConfigRecord};
use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, GuildId, RoleId};
use std::sync::Arc;
use tracing::{info, warn};

struct AntiRaidShared {
    platform: Arc<dyn Platform>,
    configs: Collection<RaidConfigRecord>,
    channels: Arc<Collection<NoticeChannelRecord>>,
    guards: DashMap<u64, RaidGuard>,
}

/// Registry of the anti-raid guards of every guild
#[derive(Clone)]
pub struct AntiRaidService(Arc<AntiRaidShared>);

impl AntiRaidService {
    pub fn new(
        platform: Arc<dyn Platform>,
        configs: Collection<RaidConfigRecord>,
        channels: Collection<NoticeChannelRecord>,
    ) -> Self {
        Self(Arc::new(AntiRaidShared {
            platform,
            configs,
            channels: Arc::new(channels),
            guards: DashMap::new(),
        }))
    }

    /// Rebuild the guards from stored settings
    ///
    /// Setups whose guild or raider role is confirmed gone are deleted.
    /// Members already holding the raider role start out in the raid cell.
    pub async fn restore(&self) -> RaidResult<usize> {
        self.0.guards.clear();
        for config in self.0.configs.find(&Filter::all()).await {
            let guild_id = GuildId::new(config.guild_id);
            let role_id = RoleId::new(config.role_id);
            match guild_role_presence(&*self.0.platform, guild_id, role_id).await {
                Presence::Gone => {
                    warn!(target: RAID_TARGET, %guild_id, "Dropping anti-raid setup of missing guild or role");
                    self.0.configs.delete_one(&Filter::guild(config.guild_id)).await?;
                    continue;
                }
                Presence::Unknown(e) => {
                    warn!(target: RAID_TARGET, %guild_id, "Keeping anti-raid setup that could not be checked: {e}");
                }
                Presence::Present => {}
            }
            self.build_guard(&config).await;
        }

        let restored = self.0.guards.len();
        info!(target: RAID_TARGET, restored, "Restored anti-raid guards");
        Ok(restored)
    }

    /// Set up anti-raid for a guild with default settings
    pub async fn create(&self, guild_id: GuildId, role_id: RoleId) -> RaidResult<RaidGuard> {
        if self.0.guards.contains_key(&guild_id.get()) {
            return Err(RaidError::AlreadyConfigured);
        }
        let config = RaidConfigRecord::new(guild_id.get(), role_id.get());
        self.0.configs.insert(config.clone()).await?;
        info!(target: RAID_TARGET, %guild_id, %role_id, "Anti-raid created");
        Ok(self.build_guard(&config).await)
    }

    /// The guard of a guild
    pub fn guard(&self, guild_id: GuildId) -> RaidResult<RaidGuard> {
        self.0
            .guards
            .get(&guild_id.get())
            .map(|guard| guard.clone())
            .ok_or(RaidError::NotConfigured)
    }

    /// Forward a join to the guild's guard, if it has one
    pub async fn on_member_join(
        &self,
        guild_id: GuildId,
        member: JoinedMember,
    ) -> Option<JoinOutcome> {
        let guard = self.guard(guild_id).ok()?;
        Some(guard.on_member_join(member).await)
    }

    pub async fn toggle(&self, guild_id: GuildId) -> RaidResult<bool> {
        let guard = self.guard(guild_id)?;
        let enabled = guard.toggle();
        self.persist(&guard).await?;
        Ok(enabled)
    }

    pub async fn set_threshold(&self, guild_id: GuildId, threshold: usize) -> RaidResult<()> {
        let guard = self.guard(guild_id)?;
        guard.set_threshold(threshold)?;
        self.persist(&guard).await
    }

    pub async fn set_hold_interval(&self, guild_id: GuildId, seconds: u64) -> RaidResult<()> {
        let guard = self.guard(guild_id)?;
        guard.set_hold_interval(seconds)?;
        self.persist(&guard).await
    }

    pub async fn set_quiet_timeout(&self, guild_id: GuildId, seconds: u64) -> RaidResult<()> {
        let guard = self.guard(guild_id)?;
        guard.set_quiet_timeout(seconds)?;
        self.persist(&guard).await
    }

    /// Switch the raider role, moving flagged members over
    pub async fn set_raider_role(&self, guild_id: GuildId, role_id: RoleId) -> RaidResult<()> {
        let guard = self.guard(guild_id)?;
        guard.update_raider_role(role_id).await;
        self.persist(&guard).await
    }

    /// Send raid notices of the guild to `channel_id`, returning false if it already gets them
    pub async fn notify(&self, guild_id: GuildId, channel_id: ChannelId) -> RaidResult<bool> {
        let filter = Filter::id(channel_id.get());
        match self.0.channels.find_one(&filter).await {
            Some(channel) if channel.raid => Ok(false),
            Some(_) => {
                self.0
                    .channels
                    .update_one(&filter, |channel| channel.raid = true)
                    .await?;
                Ok(true)
            }
            None => {
                self.0
                    .channels
                    .insert(NoticeChannelRecord {
                        channel_id: channel_id.get(),
                        guild_id: guild_id.get(),
                        raid: true,
                    })
                    .await?;
                Ok(true)
            }
        }
    }

    /// Stop sending raid notices to `channel_id`, returning whether it got them
    pub async fn unnotify(&self, channel_id: ChannelId) -> RaidResult<bool> {
        Ok(self
            .0
            .channels
            .delete_one(&Filter::id(channel_id.get()))
            .await?)
    }

    /// Channels of a guild that receive raid notices
    pub async fn notice_channels(&self, guild_id: GuildId) -> Vec<ChannelId> {
        self.0
            .channels
            .find(&Filter::guild(guild_id.get()))
            .await
            .into_iter()
            .filter(|channel| channel.raid)
            .map(|channel| ChannelId::new(channel.channel_id))
            .collect()
    }

    async fn build_guard(&self, config: &RaidConfigRecord) -> RaidGuard {
        let guild_id = GuildId::new(config.guild_id);
        let settings = RaidSettings::from(config);
        let flagged = self
            .0
            .platform
            .members_with_role(guild_id, settings.raider_role)
            .await;
        let notifier = RaidNotifier::new(
            guild_id,
            Arc::clone(&self.0.platform),
            Arc::clone(&self.0.channels),
        );
        let guard = RaidGuard::new(
            guild_id,
            Arc::clone(&self.0.platform),
            notifier,
            settings,
            flagged,
        );
        self.0.guards.insert(config.guild_id, guard.clone());
        guard
    }

    async fn persist(&self, guard: &RaidGuard) -> RaidResult<()> {
        let settings = guard.settings();
        self.0
            .configs
            .update_one(&Filter::guild(guard.guild_id().get()), |config| {
                config.role_id = settings.raider_role.get();
                config.enabled = settings.enabled;
                config.threshold = settings.threshold;
                config.hold_interval = settings.hold_interval.as_secs();
                config.quiet_timeout = settings.quiet_timeout.as_secs();
            })
            .await?;
        Ok(())
    }

    #[must_use]
    pub fn configs(&self) -> &Collection<RaidConfigRecord> {
        &self.0.configs
    }
}
