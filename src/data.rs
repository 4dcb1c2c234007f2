use std::{ops::Deref, sync::Arc};

use crate::antiraid::AntiRaidService;
use crate::config::BotConfig;
use crate::platform::Platform;
use crate::scheduler::{MuteService, ReminderService, TempBanService};
use crate::store::{Collection, StoreResult};
use crate::{CONSOLE_TARGET, Error};
use poise::serenity_prelude::prelude::TypeMapKey;
use tracing::info;

/// Services shared by commands and gateway events
pub struct DataInner {
    pub config: BotConfig,
    pub mutes: MuteService,
    pub temp_bans: TempBanService,
    pub reminders: ReminderService,
    pub anti_raid: AntiRaidService,
}

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Stored in serenity's data map so the event handler can reach it
impl TypeMapKey for Data {
    type Value = Data;
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("config", &self.config.data_dir)
            .finish_non_exhaustive()
    }
}

impl Data {
    /// Open every collection under the configured data directory
    ///
    /// # Errors
    /// Returns an error if an existing collection file cannot be read.
    pub async fn load(config: BotConfig, platform: Arc<dyn Platform>) -> StoreResult<Self> {
        let dir = config.data_dir.clone();
        let mutes = MuteService::new(
            Arc::clone(&platform),
            Collection::open(&dir).await?,
            Collection::open(&dir).await?,
        );
        let temp_bans = TempBanService::new(Arc::clone(&platform), Collection::open(&dir).await?);
        let reminders = ReminderService::new(Arc::clone(&platform), Collection::open(&dir).await?);
        let anti_raid = AntiRaidService::new(
            platform,
            Collection::open(&dir).await?,
            Collection::open(&dir).await?,
        );

        Ok(Self(Arc::new(DataInner {
            config,
            mutes,
            temp_bans,
            reminders,
            anti_raid,
        })))
    }

    /// Data that never touches the disk
    #[must_use]
    pub fn in_memory(config: BotConfig, platform: Arc<dyn Platform>) -> Self {
        Self(Arc::new(DataInner {
            config,
            mutes: MuteService::new(
                Arc::clone(&platform),
                Collection::in_memory(),
                Collection::in_memory(),
            ),
            temp_bans: TempBanService::new(Arc::clone(&platform), Collection::in_memory()),
            reminders: ReminderService::new(Arc::clone(&platform), Collection::in_memory()),
            anti_raid: AntiRaidService::new(
                platform,
                Collection::in_memory(),
                Collection::in_memory(),
            ),
        }))
    }

    /// Reschedule everything that was pending when the bot stopped
    ///
    /// # Errors
    /// Returns the first store or scheduling error hit by a subsystem.
    pub async fn restore(&self) -> Result<(), Error> {
        let mutes = self.mutes.restore().await?;
        let temp_bans = self.temp_bans.restore().await?;
        let reminders = self.reminders.restore().await?;
        let guards = self.anti_raid.restore().await?;

        info!(
            target: CONSOLE_TARGET,
            mutes = mutes.scheduled,
            late_mutes = mutes.late,
            temp_bans = temp_bans.scheduled,
            late_temp_bans = temp_bans.late,
            reminders = reminders.scheduled,
            late_reminders = reminders.late,
            guards,
            "Restored pending work"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;
    use crate::store::{Filter, ReminderRecord};
    use chrono::{Duration, Utc};
    use poise::serenity_prelude::UserId;
    use std::path::PathBuf;

    fn config(data_dir: PathBuf) -> BotConfig {
        BotConfig {
            token: "token".to_string(),
            data_dir,
            prefix: "!".to_string(),
        }
    }

    #[tokio::test]
    async fn test_restore_empty_data() {
        let data = Data::in_memory(config(PathBuf::from("unused")), Arc::new(MockPlatform::new()));
        data.restore().await.unwrap();
        assert!(data.mutes.list(poise::serenity_prelude::GuildId::new(1)).is_empty());
        assert_eq!(data.reminders.count(UserId::new(1)), 0);
    }

    #[tokio::test]
    async fn test_load_reads_persisted_collections() {
        let dir = std::env::temp_dir().join(format!("mangopi-{}", uuid::Uuid::new_v4()));
        let reminders = Collection::<ReminderRecord>::open(&dir).await.unwrap();
        reminders
            .insert(ReminderRecord {
                id: 5,
                user_id: 9,
                details: "feed the cat".to_string(),
                end: Utc::now() + Duration::days(1),
            })
            .await
            .unwrap();

        let data = Data::load(config(dir.clone()), Arc::new(MockPlatform::new()))
            .await
            .unwrap();
        data.restore().await.unwrap();
        assert_eq!(data.reminders.count(UserId::new(9)), 1);
        assert_eq!(data.reminders.records().find(&Filter::user(9)).await.len(), 1);

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }
}
