//! Timed mutes
//!
//! A mute is a guild role plus a [`MuteTimer`] that strips it again. The
//! service keeps the per-guild mute role mapping, the live timers keyed by
//! `(guild, user)` and both persisted collections.

use super::{
    DelayedTask, ModerationError, ModerationResult, RestoreReport, ScheduleError,
    ScheduledAction,
};
use crate::TIMER_TARGET;
use crate::duration::display_time;
use crate::platform::{ChannelKind, Notice, Platform, Presence, guild_role_presence};
use crate::store::{Collection, Filter, MuteRecord, MuteRoleRecord};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, GuildId, RoleId, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EXPIRED_REASON: &str = "Mute time expired";
const LATE_REASON: &str = "Late mute removal due to downtime";
const RECALCULATED_REASON: &str = "Mute removal after time recalculation";
const REJOIN_REASON: &str = "Left during a mute, time has not expired yet.";
const TELL_COLOUR: u32 = 0x636e72;

/// Result of a mute request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteOutcome {
    /// New mute, expiring at `end`
    Muted { end: DateTime<Utc> },
    /// Existing mute moved to a new end time
    Extended { end: DateTime<Utc> },
    /// The recalculated end time had already passed, so the mute was lifted
    Lifted,
}

/// Result of a manual unmute
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum UnmuteOutcome {
    #[display("Member unmuted")]
    Unmuted,
    #[display("Mute role removed, but the member had no mute timer")]
    RoleRemovedWithoutTimer,
    #[display("Member currently doesn't have the mute role")]
    NotMuted,
}

/// Deferred removal of one member's mute role
pub struct MuteTimer {
    token: Uuid,
    record: MuteRecord,
    service: MuteService,
}

impl MuteTimer {
    pub fn from_request(
        service: MuteService,
        guild_id: GuildId,
        user_id: UserId,
        end: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self::from_persisted(
            service,
            MuteRecord {
                guild_id: guild_id.get(),
                user_id: user_id.get(),
                end,
                reason: reason.into(),
            },
        )
    }

    pub fn from_persisted(service: MuteService, record: MuteRecord) -> Self {
        Self {
            token: Uuid::new_v4(),
            record,
            service,
        }
    }

    #[must_use]
    pub fn record(&self) -> &MuteRecord {
        &self.record
    }
}

#[async_trait::async_trait]
impl ScheduledAction for MuteTimer {
    async fn task(&self) {
        self.service
            .expire(
                GuildId::new(self.record.guild_id),
                UserId::new(self.record.user_id),
                EXPIRED_REASON,
            )
            .await;
    }

    async fn on_exit(&self) {
        let key = (self.record.guild_id, self.record.user_id);
        self.service
            .0
            .timers
            .remove_if(&key, |_, timer| timer.action().token == self.token);

        let filter = Filter::member(self.record.guild_id, self.record.user_id);
        if let Err(e) = self.service.0.records.delete_one(&filter).await {
            warn!(target: TIMER_TARGET, guild_id = self.record.guild_id, user_id = self.record.user_id, "Failed to delete mute record: {e}");
        }
    }
}

struct MuteShared {
    platform: Arc<dyn Platform>,
    records: Collection<MuteRecord>,
    role_records: Collection<MuteRoleRecord>,
    roles: DashMap<u64, u64>,
    timers: DashMap<(u64, u64), DelayedTask<MuteTimer>>,
}

/// Owner of mute roles and live mute timers
#[derive(Clone)]
pub struct MuteService(Arc<MuteShared>);

impl MuteService {
    pub fn new(
        platform: Arc<dyn Platform>,
        records: Collection<MuteRecord>,
        role_records: Collection<MuteRoleRecord>,
    ) -> Self {
        Self(Arc::new(MuteShared {
            platform,
            records,
            role_records,
            roles: DashMap::new(),
            timers: DashMap::new(),
        }))
    }

    /// Rebuild the role mapping and the timers from the store
    ///
    /// Mappings whose guild or role is confirmed gone are dropped, mutes of
    /// guilds without a mapping are purged and overdue mutes are lifted right
    /// away.
    pub async fn restore(&self) -> ModerationResult<RestoreReport> {
        let mut report = RestoreReport::default();

        self.0.roles.clear();
        for mapping in self.0.role_records.find(&Filter::all()).await {
            let guild_id = GuildId::new(mapping.guild_id);
            let role_id = RoleId::new(mapping.role_id);
            match guild_role_presence(&*self.0.platform, guild_id, role_id).await {
                Presence::Gone => {
                    self.0
                        .role_records
                        .delete_one(&Filter::guild(mapping.guild_id))
                        .await?;
                }
                presence => {
                    if let Presence::Unknown(e) = presence {
                        warn!(target: TIMER_TARGET, %guild_id, "Keeping mute role that could not be checked: {e}");
                    }
                    self.0.roles.insert(mapping.guild_id, mapping.role_id);
                }
            }
        }

        self.0.timers.clear();
        let mut orphaned = Vec::new();
        for record in self.0.records.find(&Filter::all()).await {
            if !self.0.roles.contains_key(&record.guild_id) {
                if !orphaned.contains(&record.guild_id) {
                    orphaned.push(record.guild_id);
                }
                continue;
            }

            let key = (record.guild_id, record.user_id);
            match DelayedTask::start(MuteTimer::from_persisted(self.clone(), record.clone()), record.end) {
                Ok(timer) => {
                    self.0.timers.insert(key, timer);
                    report.scheduled += 1;
                }
                Err(ScheduleError::PastTime(_)) => {
                    self.0
                        .records
                        .delete_one(&Filter::member(key.0, key.1))
                        .await?;
                    let service = self.clone();
                    tokio::spawn(async move {
                        service
                            .expire(GuildId::new(key.0), UserId::new(key.1), LATE_REASON)
                            .await;
                    });
                    report.late += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        for guild_id in orphaned {
            report.purged += self.0.records.delete_many(&Filter::guild(guild_id)).await?;
            self.0.role_records.delete_many(&Filter::guild(guild_id)).await?;
        }

        info!(
            target: TIMER_TARGET,
            scheduled = report.scheduled,
            late = report.late,
            purged = report.purged,
            "Restored mute timers"
        );
        Ok(report)
    }

    /// The configured mute role of a guild
    #[must_use]
    pub fn role(&self, guild_id: GuildId) -> Option<RoleId> {
        self.0
            .roles
            .get(&guild_id.get())
            .map(|role| RoleId::new(*role))
    }

    /// Set the mute role, returning the previous one
    ///
    /// Every member with a live mute timer is moved from the old role to the
    /// new one on a best-effort basis.
    pub async fn set_role(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
    ) -> ModerationResult<Option<RoleId>> {
        let Some(old) = self.0.roles.insert(guild_id.get(), role_id.get()) else {
            self.0
                .role_records
                .insert(MuteRoleRecord {
                    guild_id: guild_id.get(),
                    role_id: role_id.get(),
                })
                .await?;
            return Ok(None);
        };

        let old = RoleId::new(old);
        if old == role_id {
            return Ok(Some(old));
        }

        self.0
            .role_records
            .update_one(&Filter::guild(guild_id.get()), |mapping| {
                mapping.role_id = role_id.get();
            })
            .await?;

        for user_id in self.muted_users(guild_id) {
            let platform = &self.0.platform;
            let added = platform
                .add_role(guild_id, user_id, role_id, "Updated mute role - added new role")
                .await;
            let removed = platform
                .remove_role(guild_id, user_id, old, "Updated mute role - removed old role")
                .await;
            debug!(target: TIMER_TARGET, %user_id, %added, %removed, "Migrated mute role");
        }

        Ok(Some(old))
    }

    /// Mute a member, or move the end of an existing mute by `offset`
    ///
    /// # Errors
    /// [`ModerationError::NoMuteRole`] without a configured role,
    /// [`ModerationError::NotMuted`] for a negative offset on a member that is
    /// not muted, [`ModerationError::Refused`] if the role cannot be applied.
    pub async fn mute(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        offset: chrono::Duration,
        reason: &str,
    ) -> ModerationResult<MuteOutcome> {
        let role_id = self.role(guild_id).ok_or(ModerationError::NoMuteRole)?;
        let key = (guild_id.get(), user_id.get());

        if let Some((_, mut old)) = self.0.timers.remove(&key) {
            let end = old.end() + offset;
            if let Err(e) = old.cancel().await {
                debug!(target: TIMER_TARGET, %user_id, "Replaced mute timer was not running: {e}");
            }

            return match DelayedTask::start(
                MuteTimer::from_request(self.clone(), guild_id, user_id, end, reason),
                end,
            ) {
                Ok(timer) => {
                    let record = timer.action().record().clone();
                    self.0.timers.insert(key, timer);
                    self.0.records.insert(record).await?;
                    info!(target: TIMER_TARGET, %guild_id, %user_id, %end, "Mute time changed");
                    Ok(MuteOutcome::Extended { end })
                }
                Err(ScheduleError::PastTime(_)) => {
                    let outcome = self
                        .0
                        .platform
                        .remove_role(guild_id, user_id, role_id, RECALCULATED_REASON)
                        .await;
                    info!(target: TIMER_TARGET, %guild_id, %user_id, %outcome, "Mute lifted after recalculation");
                    Ok(MuteOutcome::Lifted)
                }
                Err(e) => Err(e.into()),
            };
        }

        let has_role = self
            .0
            .platform
            .member_has_role(guild_id, user_id, role_id)
            .await
            .unwrap_or(false);
        if offset < chrono::Duration::zero() && !has_role {
            return Err(ModerationError::NotMuted);
        }

        let end = Utc::now() + offset;
        let mut timer = DelayedTask::start(
            MuteTimer::from_request(self.clone(), guild_id, user_id, end, reason),
            end,
        )?;

        if !has_role {
            let audit = format!("Muted until {} for: \n{reason}.", display_time(end));
            let outcome = self
                .0
                .platform
                .add_role(guild_id, user_id, role_id, &audit)
                .await;
            if !outcome.is_success() {
                let _ = timer.cancel().await;
                return Err(ModerationError::Refused(outcome));
            }
        }

        let record = timer.action().record().clone();
        self.0.timers.insert(key, timer);
        self.0.records.insert(record).await?;
        info!(target: TIMER_TARGET, %guild_id, %user_id, %end, "Muted");
        Ok(MuteOutcome::Muted { end })
    }

    /// Direct message a member about their new or changed mute
    ///
    /// Best effort; a lifted mute or an empty reason sends nothing.
    pub async fn tell(
        &self,
        user_id: UserId,
        guild_name: &str,
        outcome: MuteOutcome,
        reason: &str,
    ) {
        let Some(notice) = tell_notice(guild_name, outcome, reason) else {
            return;
        };
        let outcome = self.0.platform.direct_message(user_id, &notice).await;
        debug!(target: TIMER_TARGET, %user_id, %outcome, "Told member about mute");
    }

    /// Remove the mute role and cancel the member's timer
    pub async fn unmute(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> ModerationResult<UnmuteOutcome> {
        let role_id = self.role(guild_id).ok_or(ModerationError::NoMuteRole)?;
        let platform = &self.0.platform;

        let has_role = platform
            .member_has_role(guild_id, user_id, role_id)
            .await
            .unwrap_or(false);
        if has_role {
            let audit = format!("Manual mute removal with reason: \n{reason}");
            let outcome = platform.remove_role(guild_id, user_id, role_id, &audit).await;
            if !outcome.is_success() {
                return Err(ModerationError::Refused(outcome));
            }
        }

        Ok(match (self.cancel(guild_id, user_id).await, has_role) {
            (true, _) => UnmuteOutcome::Unmuted,
            (false, true) => UnmuteOutcome::RoleRemovedWithoutTimer,
            (false, false) => UnmuteOutcome::NotMuted,
        })
    }

    /// Live mutes of a guild, soonest expiry first
    #[must_use]
    pub fn list(&self, guild_id: GuildId) -> Vec<MuteRecord> {
        let mut mutes: Vec<MuteRecord> = self
            .0
            .timers
            .iter()
            .filter(|entry| entry.key().0 == guild_id.get())
            .map(|entry| entry.value().action().record().clone())
            .collect();
        mutes.sort_by_key(|record| record.end);
        mutes
    }

    #[must_use]
    pub fn is_muted(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.0.timers.contains_key(&(guild_id.get(), user_id.get()))
    }

    /// Cancel a member's mute timer, returning whether one was running
    pub async fn cancel(&self, guild_id: GuildId, user_id: UserId) -> bool {
        let Some((_, mut timer)) = self.0.timers.remove(&(guild_id.get(), user_id.get())) else {
            return false;
        };
        timer.cancel().await.is_ok()
    }

    /// A muted member came back, give the role back to them
    pub async fn on_member_join(&self, guild_id: GuildId, user_id: UserId) {
        if !self.is_muted(guild_id, user_id) {
            return;
        }
        let Some(role_id) = self.role(guild_id) else {
            return;
        };
        let outcome = self
            .0
            .platform
            .add_role(guild_id, user_id, role_id, REJOIN_REASON)
            .await;
        debug!(target: TIMER_TARGET, %guild_id, %user_id, %outcome, "Reapplied mute role");
    }

    /// Someone removed the mute role by hand, drop the timer
    pub async fn on_member_roles_changed(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        roles: &[RoleId],
    ) {
        let Some(role_id) = self.role(guild_id) else {
            return;
        };
        if !roles.contains(&role_id) && self.cancel(guild_id, user_id).await {
            info!(target: TIMER_TARGET, %guild_id, %user_id, "Mute role removed manually, timer cancelled");
        }
    }

    /// The mute role was deleted, forget every mute in the guild
    pub async fn on_role_deleted(&self, guild_id: GuildId, role_id: RoleId) {
        if self.role(guild_id) != Some(role_id) {
            return;
        }
        self.purge_guild(guild_id, None).await;
    }

    /// Keep the mute role effective in a channel created after setup
    pub async fn on_channel_created(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        kind: ChannelKind,
    ) {
        let Some(role_id) = self.role(guild_id) else {
            return;
        };
        let outcome = self
            .0
            .platform
            .deny_in_channel(channel_id, role_id, kind)
            .await;
        debug!(target: TIMER_TARGET, %guild_id, %channel_id, ?kind, %outcome, "Synced new channel with mute role");
    }

    /// Lift a mute, falling back to a guild purge if the guild or role is gone
    ///
    /// A guild or role that cannot be checked is not purged; the role removal
    /// is attempted anyway.
    pub async fn expire(&self, guild_id: GuildId, user_id: UserId, reason: &str) {
        let platform = &self.0.platform;
        let Some(role_id) = self.role(guild_id) else {
            self.purge_guild(guild_id, Some(user_id)).await;
            return;
        };

        let checked = match guild_role_presence(&**platform, guild_id, role_id).await {
            Presence::Present => true,
            Presence::Gone => {
                self.purge_guild(guild_id, Some(user_id)).await;
                return;
            }
            Presence::Unknown(e) => {
                warn!(target: TIMER_TARGET, %guild_id, %user_id, "Could not check mute role before lifting: {e}");
                false
            }
        };

        if !checked || platform.member_has_role(guild_id, user_id, role_id).await == Some(true) {
            let outcome = platform.remove_role(guild_id, user_id, role_id, reason).await;
            info!(target: TIMER_TARGET, %guild_id, %user_id, %outcome, "{reason}");
        } else {
            debug!(target: TIMER_TARGET, %guild_id, %user_id, "Expired mute had nothing to remove");
        }
    }

    /// Drop every mute and the role mapping of a guild
    ///
    /// Live timers are cancelled, except the one of `expiring`, whose own
    /// task is the caller and cleans up after itself.
    async fn purge_guild(&self, guild_id: GuildId, expiring: Option<UserId>) {
        let guild = guild_id.get();
        self.0.roles.remove(&guild);
        for user_id in self.muted_users(guild_id) {
            if Some(user_id) != expiring {
                self.cancel(guild_id, user_id).await;
            }
        }

        let removed = self.0.records.delete_many(&Filter::guild(guild)).await;
        let unmapped = self.0.role_records.delete_many(&Filter::guild(guild)).await;
        match (removed, unmapped) {
            (Ok(removed), Ok(_)) => {
                warn!(target: TIMER_TARGET, %guild_id, removed, "Purged mutes of guild");
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(target: TIMER_TARGET, %guild_id, "Failed to purge mutes: {e}");
            }
        }
    }

    fn muted_users(&self, guild_id: GuildId) -> Vec<UserId> {
        self.0
            .timers
            .iter()
            .filter(|entry| entry.key().0 == guild_id.get())
            .map(|entry| UserId::new(entry.key().1))
            .collect()
    }

    #[must_use]
    pub fn records(&self) -> &Collection<MuteRecord> {
        &self.0.records
    }

    #[must_use]
    pub fn role_records(&self) -> &Collection<MuteRoleRecord> {
        &self.0.role_records
    }
}

/// Direct message for a muted member, `None` when there is nothing to tell
fn tell_notice(guild_name: &str, outcome: MuteOutcome, reason: &str) -> Option<Notice> {
    let (title, end) = match outcome {
        MuteOutcome::Muted { end } => ("🔇 You have been muted 🔇", end),
        MuteOutcome::Extended { end } => ("➕ Mute Time Changed", end),
        MuteOutcome::Lifted => return None,
    };
    if reason.is_empty() {
        return None;
    }
    Some(
        Notice::new(title, TELL_COLOUR)
            .field("End", display_time(end), false)
            .field("Reason", reason, false)
            .footer(guild_name)
            .timestamp(Utc::now()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ActionOutcome, MockPlatform, Presence};
    use mockall::predicate::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const GUILD: GuildId = GuildId::new(1);
    const USER: UserId = UserId::new(2);
    const ROLE: RoleId = RoleId::new(5);

    fn service(platform: MockPlatform) -> MuteService {
        MuteService::new(
            Arc::new(platform),
            Collection::in_memory(),
            Collection::in_memory(),
        )
    }

    async fn with_role(platform: MockPlatform) -> MuteService {
        let service = service(platform);
        service.set_role(GUILD, ROLE).await.unwrap();
        service
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_expires_and_removes_role() {
        let mut platform = MockPlatform::new();
        let muted = Arc::new(AtomicBool::new(false));
        let state = Arc::clone(&muted);
        platform
            .expect_member_has_role()
            .returning(move |_, _, _| Some(state.load(Ordering::SeqCst)));
        let state = Arc::clone(&muted);
        platform
            .expect_add_role()
            .with(eq(GUILD), eq(USER), eq(ROLE), always())
            .times(1)
            .returning(move |_, _, _, _| {
                state.store(true, Ordering::SeqCst);
                ActionOutcome::Success
            });
        platform.expect_guild_presence().return_const(Presence::Present);
        platform.expect_role_presence().return_const(Presence::Present);
        let state = Arc::clone(&muted);
        platform
            .expect_remove_role()
            .with(eq(GUILD), eq(USER), eq(ROLE), eq(EXPIRED_REASON))
            .times(1)
            .returning(move |_, _, _, _| {
                state.store(false, Ordering::SeqCst);
                ActionOutcome::Success
            });

        let service = with_role(platform).await;
        let outcome = service
            .mute(GUILD, USER, chrono::Duration::seconds(2), "test")
            .await
            .unwrap();
        assert!(matches!(outcome, MuteOutcome::Muted { .. }));
        assert_eq!(service.records().len().await, 1);
        assert!(service.is_muted(GUILD, USER));

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(!muted.load(Ordering::SeqCst));
        assert!(service.records().is_empty().await);
        assert!(!service.is_muted(GUILD, USER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_replaces_timer() {
        let mut platform = MockPlatform::new();
        platform.expect_member_has_role().return_const(Some(false));
        platform
            .expect_add_role()
            .times(1)
            .return_const(ActionOutcome::Success);

        let service = with_role(platform).await;
        let MuteOutcome::Muted { end } = service
            .mute(GUILD, USER, chrono::Duration::minutes(10), "spam")
            .await
            .unwrap()
        else {
            panic!("expected a new mute");
        };

        let outcome = service
            .mute(GUILD, USER, chrono::Duration::minutes(5), "more spam")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            MuteOutcome::Extended {
                end: end + chrono::Duration::minutes(5)
            }
        );

        let mutes = service.list(GUILD);
        assert_eq!(mutes.len(), 1);
        assert_eq!(mutes[0].reason, "more spam");
        let stored = service.records().find(&Filter::all()).await;
        assert_eq!(stored, mutes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_renewal_lifts_mute() {
        let mut platform = MockPlatform::new();
        platform.expect_member_has_role().return_const(Some(false));
        platform
            .expect_add_role()
            .return_const(ActionOutcome::Success);
        platform
            .expect_remove_role()
            .with(always(), always(), always(), eq(RECALCULATED_REASON))
            .times(1)
            .return_const(ActionOutcome::Success);

        let service = with_role(platform).await;
        service
            .mute(GUILD, USER, chrono::Duration::minutes(10), "spam")
            .await
            .unwrap();
        let outcome = service
            .mute(GUILD, USER, chrono::Duration::minutes(-20), "")
            .await
            .unwrap();

        assert_eq!(outcome, MuteOutcome::Lifted);
        assert!(!service.is_muted(GUILD, USER));
        assert!(service.records().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_offset_requires_mute() {
        let mut platform = MockPlatform::new();
        platform.expect_member_has_role().return_const(Some(false));

        let service = with_role(platform).await;
        let result = service
            .mute(GUILD, USER, chrono::Duration::minutes(-5), "")
            .await;
        assert!(matches!(result, Err(ModerationError::NotMuted)));

        let result = service
            .mute(GuildId::new(9), USER, chrono::Duration::minutes(5), "")
            .await;
        assert!(matches!(result, Err(ModerationError::NoMuteRole)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_guild_purges_all_guild_mutes() {
        let mut platform = MockPlatform::new();
        let gone = Arc::new(AtomicBool::new(false));
        let state = Arc::clone(&gone);
        platform
            .expect_guild_presence()
            .returning(move |_| {
                if state.load(Ordering::SeqCst) {
                    Presence::Gone
                } else {
                    Presence::Present
                }
            });
        platform.expect_role_presence().return_const(Presence::Present);
        platform.expect_member_has_role().return_const(Some(false));
        platform
            .expect_add_role()
            .return_const(ActionOutcome::Success);
        platform.expect_remove_role().never();

        let service = with_role(platform).await;
        service
            .mute(GUILD, USER, chrono::Duration::seconds(2), "")
            .await
            .unwrap();
        service
            .mute(GUILD, UserId::new(3), chrono::Duration::hours(1), "")
            .await
            .unwrap();
        service
            .records()
            .insert(MuteRecord {
                guild_id: 7,
                user_id: 2,
                end: Utc::now() + chrono::Duration::hours(1),
                reason: String::new(),
            })
            .await
            .unwrap();

        gone.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3)).await;

        let left = service.records().find(&Filter::all()).await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].guild_id, 7);
        assert!(service.role_records().is_empty().await);
        assert_eq!(service.role(GUILD), None);
        assert!(service.list(GUILD).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_runs_overdue_mutes_late() {
        let mut platform = MockPlatform::new();
        platform.expect_guild_presence().return_const(Presence::Present);
        platform.expect_role_presence().return_const(Presence::Present);
        platform.expect_member_has_role().return_const(Some(true));
        platform
            .expect_remove_role()
            .with(eq(GUILD), eq(USER), eq(ROLE), eq(LATE_REASON))
            .times(1)
            .return_const(ActionOutcome::Success);

        let service = service(platform);
        service
            .role_records()
            .insert(MuteRoleRecord {
                guild_id: GUILD.get(),
                role_id: ROLE.get(),
            })
            .await
            .unwrap();
        let now = Utc::now();
        for (guild_id, user_id, end) in [
            (1, 2, now - chrono::Duration::minutes(1)),
            (1, 3, now + chrono::Duration::hours(1)),
            (8, 2, now + chrono::Duration::hours(1)),
        ] {
            service
                .records()
                .insert(MuteRecord {
                    guild_id,
                    user_id,
                    end,
                    reason: String::new(),
                })
                .await
                .unwrap();
        }

        let report = service.restore().await.unwrap();
        assert_eq!(
            report,
            RestoreReport {
                scheduled: 1,
                late: 1,
                purged: 1
            }
        );
        assert!(service.is_muted(GUILD, UserId::new(3)));
        assert!(!service.is_muted(GUILD, USER));

        tokio::time::sleep(Duration::from_millis(1)).await;
        let left = service.records().find(&Filter::all()).await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].user_id, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmute_and_role_events() {
        let mut platform = MockPlatform::new();
        platform.expect_member_has_role().return_const(Some(false));
        platform
            .expect_add_role()
            .return_const(ActionOutcome::Success);

        let service = with_role(platform).await;
        service
            .mute(GUILD, USER, chrono::Duration::hours(1), "")
            .await
            .unwrap();

        service.on_member_roles_changed(GUILD, USER, &[ROLE]).await;
        assert!(service.is_muted(GUILD, USER));
        service.on_member_roles_changed(GUILD, USER, &[]).await;
        assert!(!service.is_muted(GUILD, USER));
        assert!(service.records().is_empty().await);

        let outcome = service.unmute(GUILD, USER, "").await.unwrap();
        assert_eq!(outcome, UnmuteOutcome::NotMuted);

        service
            .mute(GUILD, USER, chrono::Duration::hours(1), "")
            .await
            .unwrap();
        service.on_role_deleted(GUILD, RoleId::new(99)).await;
        assert!(service.is_muted(GUILD, USER));
        service.on_role_deleted(GUILD, ROLE).await;
        assert!(!service.is_muted(GUILD, USER));
        assert!(service.role_records().is_empty().await);
        assert_eq!(service.role(GUILD), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purged_timers_cannot_touch_a_later_mute() {
        let mut platform = MockPlatform::new();
        let gone = Arc::new(AtomicBool::new(false));
        let state = Arc::clone(&gone);
        platform
            .expect_guild_presence()
            .returning(move |_| {
                if state.load(Ordering::SeqCst) {
                    Presence::Gone
                } else {
                    Presence::Present
                }
            });
        platform.expect_role_presence().return_const(Presence::Present);
        platform.expect_member_has_role().return_const(Some(false));
        platform
            .expect_add_role()
            .return_const(ActionOutcome::Success);
        platform.expect_remove_role().never();

        let other = UserId::new(3);
        let service = with_role(platform).await;
        service
            .mute(GUILD, USER, chrono::Duration::seconds(2), "")
            .await
            .unwrap();
        service
            .mute(GUILD, other, chrono::Duration::hours(1), "")
            .await
            .unwrap();

        gone.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(service.records().is_empty().await);

        gone.store(false, Ordering::SeqCst);
        service.set_role(GUILD, ROLE).await.unwrap();
        let MuteOutcome::Muted { end } = service
            .mute(GUILD, other, chrono::Duration::hours(2), "again")
            .await
            .unwrap()
        else {
            panic!("expected a new mute");
        };

        // the purged one hour timer would have fired by now
        tokio::time::sleep(Duration::from_secs(3700)).await;
        assert!(service.is_muted(GUILD, other));
        let left = service.records().find(&Filter::all()).await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].end, end);
        assert_eq!(left[0].reason, "again");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_guild_check_keeps_mutes() {
        let mut platform = MockPlatform::new();
        platform
            .expect_guild_presence()
            .return_const(Presence::Unknown("502 Bad Gateway".to_string()));
        platform.expect_member_has_role().return_const(Some(false));
        platform
            .expect_add_role()
            .return_const(ActionOutcome::Success);
        platform
            .expect_remove_role()
            .with(eq(GUILD), eq(USER), eq(ROLE), eq(EXPIRED_REASON))
            .times(1)
            .return_const(ActionOutcome::Success);

        let service = with_role(platform).await;
        service
            .mute(GUILD, USER, chrono::Duration::seconds(2), "")
            .await
            .unwrap();
        service
            .mute(GUILD, UserId::new(3), chrono::Duration::hours(1), "")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(service.role(GUILD), Some(ROLE));
        assert!(service.is_muted(GUILD, UserId::new(3)));
        assert_eq!(service.records().len().await, 1);
        assert_eq!(service.role_records().len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_keeps_mappings_that_could_not_be_checked() {
        let mut platform = MockPlatform::new();
        platform
            .expect_guild_presence()
            .returning(|guild_id| match guild_id.get() {
                1 => Presence::Unknown("429 Too Many Requests".to_string()),
                _ => Presence::Gone,
            });

        let service = service(platform);
        for guild_id in [1, 4] {
            service
                .role_records()
                .insert(MuteRoleRecord {
                    guild_id,
                    role_id: ROLE.get(),
                })
                .await
                .unwrap();
            service
                .records()
                .insert(MuteRecord {
                    guild_id,
                    user_id: USER.get(),
                    end: Utc::now() + chrono::Duration::hours(1),
                    reason: String::new(),
                })
                .await
                .unwrap();
        }

        let report = service.restore().await.unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.purged, 1);
        assert_eq!(service.role(GUILD), Some(ROLE));
        assert_eq!(service.role(GuildId::new(4)), None);
        assert!(service.is_muted(GUILD, USER));
    }

    #[tokio::test]
    async fn test_tell_direct_messages_the_member() {
        let mut platform = MockPlatform::new();
        platform
            .expect_direct_message()
            .withf(|user_id, notice| {
                *user_id == USER
                    && notice.title == "🔇 You have been muted 🔇"
                    && notice.fields[1].value == "spam"
                    && notice.footer.as_deref() == Some("Mango Grove")
            })
            .times(1)
            .return_const(ActionOutcome::Success);

        let service = service(platform);
        let end = Utc::now() + chrono::Duration::hours(1);
        service
            .tell(USER, "Mango Grove", MuteOutcome::Muted { end }, "spam")
            .await;
        service
            .tell(USER, "Mango Grove", MuteOutcome::Lifted, "spam")
            .await;

        let changed = tell_notice("Mango Grove", MuteOutcome::Extended { end }, "more");
        assert_eq!(changed.map(|notice| notice.title), Some("➕ Mute Time Changed".to_string()));
        assert!(tell_notice("Mango Grove", MuteOutcome::Muted { end }, "").is_none());
    }

    #[tokio::test]
    async fn test_new_channels_deny_the_mute_role() {
        let mut platform = MockPlatform::new();
        platform
            .expect_deny_in_channel()
            .with(eq(ChannelId::new(70)), eq(ROLE), eq(ChannelKind::Voice))
            .times(1)
            .return_const(ActionOutcome::Success);

        let service = with_role(platform).await;
        service
            .on_channel_created(GUILD, ChannelId::new(70), ChannelKind::Voice)
            .await;
        service
            .on_channel_created(GuildId::new(9), ChannelId::new(71), ChannelKind::Text)
            .await;
    }
}
