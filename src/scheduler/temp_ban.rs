//! Temporary bans

use super::{
    DelayedTask, ModerationError, ModerationResult, RestoreReport, ScheduleError,
    ScheduledAction,
};
use crate::TIMER_TARGET;
use crate::duration::display_time;
use crate::platform::{Platform, Presence};
use crate::store::{Collection, Filter, TempBanRecord};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::{GuildId, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LATE_SUFFIX: &str = "\nWarning: Late unban due to downtime";
const RECALCULATED_SUFFIX: &str = "\nUnbanned after time re-calculation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempBanOutcome {
    Banned { end: DateTime<Utc> },
    Extended { end: DateTime<Utc> },
    /// The recalculated end time had already passed, so the ban was lifted
    Lifted,
}

/// Deferred unban of one user
pub struct TempBanTimer {
    token: Uuid,
    record: TempBanRecord,
    service: TempBanService,
}

impl TempBanTimer {
    pub fn from_request(
        service: TempBanService,
        id: u64,
        guild_id: GuildId,
        user_id: UserId,
        end: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self::from_persisted(
            service,
            TempBanRecord {
                id,
                guild_id: guild_id.get(),
                user_id: user_id.get(),
                end,
                reason: reason.into(),
            },
        )
    }

    pub fn from_persisted(service: TempBanService, record: TempBanRecord) -> Self {
        Self {
            token: Uuid::new_v4(),
            record,
            service,
        }
    }

    #[must_use]
    pub fn record(&self) -> &TempBanRecord {
        &self.record
    }
}

#[async_trait::async_trait]
impl ScheduledAction for TempBanTimer {
    async fn task(&self) {
        self.service.lift(&self.record, &self.record.reason).await;
    }

    async fn on_exit(&self) {
        let key = (self.record.guild_id, self.record.user_id);
        self.service
            .0
            .timers
            .remove_if(&key, |_, timer| timer.action().token == self.token);

        if let Err(e) = self
            .service
            .0
            .records
            .delete_one(&Filter::id(self.record.id))
            .await
        {
            warn!(target: TIMER_TARGET, id = self.record.id, "Failed to delete temporary ban record: {e}");
        }
    }
}

struct TempBanShared {
    platform: Arc<dyn Platform>,
    records: Collection<TempBanRecord>,
    timers: DashMap<(u64, u64), DelayedTask<TempBanTimer>>,
}

/// Owner of live temporary ban timers
#[derive(Clone)]
pub struct TempBanService(Arc<TempBanShared>);

impl TempBanService {
    pub fn new(platform: Arc<dyn Platform>, records: Collection<TempBanRecord>) -> Self {
        Self(Arc::new(TempBanShared {
            platform,
            records,
            timers: DashMap::new(),
        }))
    }

    /// Reschedule stored bans, lifting overdue ones right away
    pub async fn restore(&self) -> ModerationResult<RestoreReport> {
        let mut report = RestoreReport::default();
        self.0.timers.clear();

        for record in self.0.records.find(&Filter::all()).await {
            let key = (record.guild_id, record.user_id);
            let end = record.end;
            match DelayedTask::start(TempBanTimer::from_persisted(self.clone(), record.clone()), end) {
                Ok(timer) => {
                    self.0.timers.insert(key, timer);
                    report.scheduled += 1;
                }
                Err(ScheduleError::PastTime(_)) => {
                    self.0.records.delete_one(&Filter::id(record.id)).await?;
                    let service = self.clone();
                    tokio::spawn(async move {
                        let reason = format!("{}{LATE_SUFFIX}", record.reason);
                        service.lift(&record, &reason).await;
                    });
                    report.late += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            target: TIMER_TARGET,
            scheduled = report.scheduled,
            late = report.late,
            "Restored temporary bans"
        );
        Ok(report)
    }

    /// Ban a user until `now + offset`, or move an existing ban's end by `offset`
    ///
    /// `id` identifies the request and becomes the record key.
    ///
    /// # Errors
    /// [`ModerationError::NotTempBanned`] for a negative offset on a user
    /// without a temporary ban, [`ModerationError::Refused`] if the ban is
    /// rejected.
    pub async fn temp_ban(
        &self,
        id: u64,
        guild_id: GuildId,
        user_id: UserId,
        offset: chrono::Duration,
        reason: &str,
    ) -> ModerationResult<TempBanOutcome> {
        let key = (guild_id.get(), user_id.get());

        if let Some((_, mut old)) = self.0.timers.remove(&key) {
            let end = old.end() + offset;
            if let Err(e) = old.cancel().await {
                debug!(target: TIMER_TARGET, %user_id, "Replaced ban timer was not running: {e}");
            }

            let reason = audit_reason(end, reason);
            return match DelayedTask::start(
                TempBanTimer::from_request(self.clone(), id, guild_id, user_id, end, &reason),
                end,
            ) {
                Ok(timer) => {
                    let record = timer.action().record().clone();
                    self.0.timers.insert(key, timer);
                    self.0.records.insert(record).await?;
                    info!(target: TIMER_TARGET, %guild_id, %user_id, %end, "Temporary ban changed");
                    Ok(TempBanOutcome::Extended { end })
                }
                Err(ScheduleError::PastTime(_)) => {
                    let record = old.action().record();
                    self.lift(record, &format!("{reason}{RECALCULATED_SUFFIX}"))
                        .await;
                    Ok(TempBanOutcome::Lifted)
                }
                Err(e) => Err(e.into()),
            };
        }

        if offset < chrono::Duration::zero() {
            return Err(ModerationError::NotTempBanned);
        }

        let end = Utc::now() + offset;
        let reason = audit_reason(end, reason);
        let mut timer = DelayedTask::start(
            TempBanTimer::from_request(self.clone(), id, guild_id, user_id, end, &reason),
            end,
        )?;

        let outcome = self.0.platform.ban(guild_id, user_id, &reason).await;
        if !outcome.is_success() {
            let _ = timer.cancel().await;
            return Err(ModerationError::Refused(outcome));
        }

        let record = timer.action().record().clone();
        self.0.timers.insert(key, timer);
        self.0.records.insert(record).await?;
        info!(target: TIMER_TARGET, %guild_id, %user_id, %end, "Temporarily banned");
        Ok(TempBanOutcome::Banned { end })
    }

    /// Lift a ban by hand, dropping any timer for it
    pub async fn unban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> ModerationResult<bool> {
        let outcome = self.0.platform.unban(guild_id, user_id, reason).await;
        if !outcome.is_success() {
            return Err(ModerationError::Refused(outcome));
        }
        Ok(self.cancel(guild_id, user_id).await)
    }

    /// Someone lifted a ban, drop the matching timer
    pub async fn on_unbanned(&self, guild_id: GuildId, user_id: UserId) {
        if self.cancel(guild_id, user_id).await {
            info!(target: TIMER_TARGET, %guild_id, %user_id, "Ban lifted externally, timer cancelled");
        }
    }

    /// Live temporary bans of a guild, soonest expiry first
    #[must_use]
    pub fn list(&self, guild_id: GuildId) -> Vec<TempBanRecord> {
        let mut bans: Vec<TempBanRecord> = self
            .0
            .timers
            .iter()
            .filter(|entry| entry.key().0 == guild_id.get())
            .map(|entry| entry.value().action().record().clone())
            .collect();
        bans.sort_by_key(|record| record.end);
        bans
    }

    #[must_use]
    pub fn is_banned(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.0.timers.contains_key(&(guild_id.get(), user_id.get()))
    }

    async fn cancel(&self, guild_id: GuildId, user_id: UserId) -> bool {
        let Some((_, mut timer)) = self.0.timers.remove(&(guild_id.get(), user_id.get())) else {
            return false;
        };
        timer.cancel().await.is_ok()
    }

    /// Unban the user of `record`
    ///
    /// A guild that is gone purges every ban of that guild; a user that is
    /// gone only loses this record. When either cannot be checked the unban is
    /// attempted anyway.
    async fn lift(&self, record: &TempBanRecord, reason: &str) {
        let guild_id = GuildId::new(record.guild_id);
        let user_id = UserId::new(record.user_id);
        let platform = &self.0.platform;

        match platform.guild_presence(guild_id).await {
            Presence::Gone => {
                self.purge_guild(guild_id, user_id).await;
                return;
            }
            Presence::Unknown(e) => {
                warn!(target: TIMER_TARGET, %guild_id, "Could not check guild before unban: {e}");
            }
            Presence::Present => {}
        }

        match platform.user_presence(user_id).await {
            Presence::Gone => {
                self.0
                    .timers
                    .remove_if(&(record.guild_id, record.user_id), |_, timer| {
                        timer.action().record().id == record.id
                    });
                if let Err(e) = self.0.records.delete_one(&Filter::id(record.id)).await {
                    warn!(target: TIMER_TARGET, id = record.id, "Failed to delete ban record: {e}");
                }
                return;
            }
            Presence::Unknown(e) => {
                warn!(target: TIMER_TARGET, %user_id, "Could not check user before unban: {e}");
            }
            Presence::Present => {}
        }

        let outcome = platform.unban(guild_id, user_id, reason).await;
        info!(target: TIMER_TARGET, %guild_id, %user_id, %outcome, "Temporary ban over");
    }

    /// Cancel and delete every ban of a guild
    ///
    /// The timer of `expiring` is left to its own task, which is the caller.
    async fn purge_guild(&self, guild_id: GuildId, expiring: UserId) {
        let guild = guild_id.get();
        let keys: Vec<(u64, u64)> = self
            .0
            .timers
            .iter()
            .map(|entry| *entry.key())
            .filter(|key| key.0 == guild && key.1 != expiring.get())
            .collect();
        for key in keys {
            if let Some((_, mut timer)) = self.0.timers.remove(&key) {
                let _ = timer.cancel().await;
            }
        }

        match self.0.records.delete_many(&Filter::guild(guild)).await {
            Ok(removed) => {
                warn!(target: TIMER_TARGET, %guild_id, removed, "Purged bans of unreachable guild");
            }
            Err(e) => warn!(target: TIMER_TARGET, %guild_id, "Failed to purge bans: {e}"),
        }
    }

    #[must_use]
    pub fn records(&self) -> &Collection<TempBanRecord> {
        &self.0.records
    }
}

fn audit_reason(end: DateTime<Utc>, reason: &str) -> String {
    format!("Temporary ban until {} for:\n **{reason}**", display_time(end))
}
