use super::{RaidError, RaidNotifier, RaidResult, mention_pages};
use crate::RAID_TARGET;
use crate::platform::{ActionOutcome, Platform};
use crate::store::RaidConfigRecord;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{GuildId, RoleId, UserId};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A member as seen by the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinedMember {
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
}

impl JoinedMember {
    #[must_use]
    pub fn new(user_id: UserId, joined_at: DateTime<Utc>) -> Self {
        Self { user_id, joined_at }
    }
}

/// What a join did to the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The guard is switched off
    Ignored,
    /// A flagged member rejoined and got the raider role back
    Reflagged,
    /// Raid mode is on, the member went straight to the raid cell
    Flagged,
    /// The member is on probation in the holding cell
    Held,
    /// The join reached the threshold and started raid mode
    Triggered { flagged: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum RaidPhase {
    #[display("Clear")]
    Calm,
    /// Raid mode that lifts itself after the quiet timeout
    #[display("Raid")]
    Timed,
    /// Raid mode that stays on until cleared by hand
    #[display("Raid (indefinite)")]
    Indefinite,
}

/// Tunable settings of a guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaidSettings {
    pub enabled: bool,
    pub threshold: usize,
    pub hold_interval: Duration,
    pub quiet_timeout: Duration,
    pub raider_role: RoleId,
}

impl From<&RaidConfigRecord> for RaidSettings {
    fn from(record: &RaidConfigRecord) -> Self {
        Self {
            enabled: record.enabled,
            threshold: record.threshold,
            hold_interval: Duration::from_secs(record.hold_interval),
            quiet_timeout: Duration::from_secs(record.quiet_timeout),
            raider_role: RoleId::new(record.role_id),
        }
    }
}

/// Snapshot for the status command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidStatus {
    pub phase: RaidPhase,
    pub settings: RaidSettings,
    /// Mention pages of the raid cell
    pub flagged: Vec<String>,
    /// Mention pages of the holding cell
    pub holding: Vec<String>,
}

/// Result of banning or kicking the whole raid cell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MassActionReport {
    /// Mention pages of everyone that was in the raid cell
    pub pages: Vec<String>,
    /// Members the action failed for
    pub skipped: Vec<UserId>,
}

struct RaidInner {
    holding: Vec<JoinedMember>,
    flagged: Vec<JoinedMember>,
    raid_active: bool,
    countdown_running: bool,
    trigger_time: Option<Instant>,
    settings: RaidSettings,
}

impl RaidInner {
    fn is_flagged(&self, user_id: UserId) -> bool {
        self.flagged.iter().any(|member| member.user_id == user_id)
    }

    fn take_flagged(&mut self, stop: bool) -> Vec<JoinedMember> {
        self.raid_active = !stop;
        if stop {
            self.trigger_time = None;
        }
        std::mem::take(&mut self.flagged)
    }
}

/// How the countdown ended
enum CountdownExit {
    /// Quiet for the whole timeout, raid mode lifted
    Quiet(u64),
    /// Raid mode was cleared while counting down
    Manual,
    /// Switched to indefinite raid mode
    Silent,
}

struct RaidShared {
    guild_id: GuildId,
    platform: Arc<dyn Platform>,
    notifier: RaidNotifier,
    state: Mutex<RaidInner>,
    wake: Notify,
}

/// Anti-raid state machine of one guild
#[derive(Clone)]
pub struct RaidGuard(Arc<RaidShared>);

impl RaidGuard {
    /// Build a guard; `flagged` seeds the raid cell with members already
    /// holding the raider role
    pub fn new(
        guild_id: GuildId,
        platform: Arc<dyn Platform>,
        notifier: RaidNotifier,
        settings: RaidSettings,
        flagged: Vec<UserId>,
    ) -> Self {
        let now = Utc::now();
        let flagged = flagged
            .into_iter()
            .map(|user_id| JoinedMember::new(user_id, now))
            .collect();

        Self(Arc::new(RaidShared {
            guild_id,
            platform,
            notifier,
            state: Mutex::new(RaidInner {
                holding: Vec::new(),
                flagged,
                raid_active: false,
                countdown_running: false,
                trigger_time: None,
                settings,
            }),
            wake: Notify::new(),
        }))
    }

    fn state(&self) -> MutexGuard<'_, RaidInner> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn guild_id(&self) -> GuildId {
        self.0.guild_id
    }

    #[must_use]
    pub fn settings(&self) -> RaidSettings {
        self.state().settings
    }

    #[must_use]
    pub fn phase(&self) -> RaidPhase {
        let state = self.state();
        match (state.raid_active, state.trigger_time) {
            (false, _) => RaidPhase::Calm,
            (true, Some(_)) => RaidPhase::Timed,
            (true, None) => RaidPhase::Indefinite,
        }
    }

    #[must_use]
    pub fn holding(&self) -> Vec<UserId> {
        self.state().holding.iter().map(|m| m.user_id).collect()
    }

    #[must_use]
    pub fn flagged(&self) -> Vec<UserId> {
        self.state().flagged.iter().map(|m| m.user_id).collect()
    }

    /// Feed a new member into the guard
    pub async fn on_member_join(&self, member: JoinedMember) -> JoinOutcome {
        enum Step {
            Ignore,
            Reflag(RoleId),
            Flag(RoleId),
            Hold(Duration),
            Trigger,
        }

        let step = {
            let mut state = self.state();
            let role = state.settings.raider_role;
            if !state.settings.enabled {
                Step::Ignore
            } else if state.is_flagged(member.user_id) {
                Step::Reflag(role)
            } else if state.raid_active {
                state.flagged.push(member);
                if state.trigger_time.is_some() {
                    state.trigger_time = Some(Instant::now());
                }
                Step::Flag(role)
            } else {
                state.holding.retain(|held| held.user_id != member.user_id);
                state.holding.push(member);
                if state.holding.len() >= state.settings.threshold {
                    Step::Trigger
                } else {
                    Step::Hold(state.settings.hold_interval)
                }
            }
        };

        match step {
            Step::Ignore => JoinOutcome::Ignored,
            Step::Reflag(role) => {
                self.give_role(member.user_id, role, "Marked raider rejoined")
                    .await;
                JoinOutcome::Reflagged
            }
            Step::Flag(role) => {
                self.0.wake.notify_one();
                self.give_role(member.user_id, role, "Potential raider").await;
                self.0.notifier.raiders(&[member]).await;
                JoinOutcome::Flagged
            }
            Step::Hold(interval) => {
                let guard = self.clone();
                tokio::spawn(async move { guard.probation(member, interval).await });
                JoinOutcome::Held
            }
            Step::Trigger => JoinOutcome::Triggered {
                flagged: self.trigger(false).await,
            },
        }
    }

    /// Release a held member once their probation runs out, unless a raid started
    async fn probation(&self, member: JoinedMember, interval: Duration) {
        tokio::time::sleep(interval).await;
        let mut state = self.state();
        if !state.raid_active {
            state.holding.retain(|held| *held != member);
        }
    }

    /// Enter raid mode, moving the holding cell into the raid cell
    ///
    /// A timed raid starts the quiet-timeout countdown; an indefinite one
    /// stays on until cleared. Returns how many members were flagged.
    pub async fn trigger(&self, indefinite: bool) -> usize {
        let (drained, role) = {
            let mut state = self.state();
            state.raid_active = true;
            state.trigger_time = (!indefinite).then(Instant::now);
            let drained = std::mem::take(&mut state.holding);
            state.flagged.extend(drained.iter().copied());
            (drained, state.settings.raider_role)
        };
        self.0.wake.notify_one();
        info!(
            target: RAID_TARGET,
            guild_id = %self.0.guild_id,
            flagged = drained.len(),
            indefinite,
            "Raid mode triggered"
        );

        for member in &drained {
            let outcome = self
                .give_role(member.user_id, role, "Potential Raider")
                .await;
            if outcome == ActionOutcome::TargetUnreachable {
                self.state()
                    .flagged
                    .retain(|flagged| flagged.user_id != member.user_id);
            }
        }
        if !drained.is_empty() {
            self.0.notifier.raiders(&drained).await;
        }

        self.ensure_countdown();
        drained.len()
    }

    /// Spawn the quiet-timeout countdown unless one is running or not needed
    fn ensure_countdown(&self) {
        {
            let mut state = self.state();
            let needed = state.raid_active
                && state.trigger_time.is_some()
                && state.settings.enabled
                && !state.countdown_running;
            if !needed {
                return;
            }
            state.countdown_running = true;
        }
        let guard = self.clone();
        tokio::spawn(async move { guard.countdown().await });
    }

    /// Lift raid mode once no member joined for the quiet timeout
    ///
    /// Sleeps until `trigger_time + quiet_timeout` and re-arms whenever the
    /// guard is woken by a join, a manual clear or a settings change.
    async fn countdown(&self) {
        let exit = loop {
            let deadline = match self.countdown_step() {
                ControlFlow::Continue(deadline) => deadline,
                ControlFlow::Break(exit) => break exit,
            };
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {}
                () = self.0.wake.notified() => {}
            }
        };

        let guild_id = self.0.guild_id;
        match exit {
            CountdownExit::Quiet(seconds) => {
                info!(target: RAID_TARGET, %guild_id, "Raid mode lifted after quiet timeout");
                self.0.notifier.coast_clear(Some(seconds)).await;
            }
            CountdownExit::Manual => {
                info!(target: RAID_TARGET, %guild_id, "Raid mode cleared manually");
                self.0.notifier.coast_clear(None).await;
            }
            CountdownExit::Silent => {
                debug!(target: RAID_TARGET, %guild_id, "Countdown dropped for indefinite raid");
            }
        }
    }

    /// Next deadline of the countdown, or how it ends
    fn countdown_step(&self) -> ControlFlow<CountdownExit, Instant> {
        let mut state = self.state();
        let timeout = state.settings.quiet_timeout;
        let exit = if !state.raid_active {
            CountdownExit::Manual
        } else if !state.settings.enabled {
            state.raid_active = false;
            CountdownExit::Quiet(timeout.as_secs())
        } else {
            match state.trigger_time {
                None => CountdownExit::Silent,
                Some(at) if at + timeout > Instant::now() => {
                    return ControlFlow::Continue(at + timeout);
                }
                Some(_) => {
                    state.raid_active = false;
                    CountdownExit::Quiet(timeout.as_secs())
                }
            }
        };

        state.countdown_running = false;
        if !matches!(exit, CountdownExit::Silent) {
            state.trigger_time = None;
        }
        ControlFlow::Break(exit)
    }

    /// Put a member into the raid cell by hand
    pub async fn mark(&self, user_id: UserId) -> RaidResult<()> {
        let role = {
            let mut state = self.state();
            if state.is_flagged(user_id) {
                return Err(RaidError::AlreadyFlagged(user_id));
            }
            state.holding.retain(|held| held.user_id != user_id);
            state.flagged.push(JoinedMember::new(user_id, Utc::now()));
            state.settings.raider_role
        };
        self.give_role(user_id, role, "Marked raider").await;
        Ok(())
    }

    /// Take a member out of the raid cell
    pub async fn unmark(&self, user_id: UserId) -> RaidResult<()> {
        let role = {
            let mut state = self.state();
            let Some(index) = state
                .flagged
                .iter()
                .position(|member| member.user_id == user_id)
            else {
                return Err(RaidError::NotFlagged(user_id));
            };
            state.flagged.remove(index);
            state.settings.raider_role
        };
        let outcome = self
            .0
            .platform
            .remove_role(self.0.guild_id, user_id, role, "Unmark raider")
            .await;
        debug!(target: RAID_TARGET, %user_id, %outcome, "Unmarked raider");
        Ok(())
    }

    /// Ban everyone in the raid cell; `stop` also ends raid mode
    pub async fn ban_all(&self, stop: bool) -> MassActionReport {
        let flagged = self.take_flagged(stop);
        let mut skipped = Vec::new();
        for member in &flagged {
            let outcome = self
                .0
                .platform
                .ban(self.0.guild_id, member.user_id, "Raider ban")
                .await;
            if !outcome.is_success() {
                warn!(target: RAID_TARGET, user_id = %member.user_id, %outcome, "Could not ban raider");
                skipped.push(member.user_id);
            }
        }
        Self::report(&flagged, skipped)
    }

    /// Kick everyone in the raid cell; `stop` also ends raid mode
    pub async fn kick_all(&self, stop: bool) -> MassActionReport {
        let flagged = self.take_flagged(stop);
        let mut skipped = Vec::new();
        for member in &flagged {
            let outcome = self
                .0
                .platform
                .kick(self.0.guild_id, member.user_id, "Raider kick")
                .await;
            if !outcome.is_success() {
                warn!(target: RAID_TARGET, user_id = %member.user_id, %outcome, "Could not kick raider");
                skipped.push(member.user_id);
            }
        }
        Self::report(&flagged, skipped)
    }

    /// Strip the raider role from the whole raid cell and empty it
    pub async fn release_all(&self, stop: bool) -> Vec<String> {
        let flagged = self.take_flagged(stop);
        let role = self.settings().raider_role;
        for member in &flagged {
            let outcome = self
                .0
                .platform
                .remove_role(
                    self.0.guild_id,
                    member.user_id,
                    role,
                    "Release marked raiders. All clear, not a raid.",
                )
                .await;
            debug!(target: RAID_TARGET, user_id = %member.user_id, %outcome, "Released raider");
        }
        Self::report(&flagged, Vec::new()).pages
    }

    /// Leave raid mode, optionally releasing the raid cell
    pub async fn clear(&self, release: bool) -> Vec<String> {
        if release {
            return self.release_all(true).await;
        }
        {
            let mut state = self.state();
            state.raid_active = false;
            state.trigger_time = None;
        }
        self.0.wake.notify_one();
        Vec::new()
    }

    /// Move every flagged member to a new raider role
    pub async fn update_raider_role(&self, role: RoleId) {
        let (old, flagged) = {
            let state = self.state();
            (state.settings.raider_role, state.flagged.clone())
        };
        if old == role {
            return;
        }
        for member in &flagged {
            self.give_role(member.user_id, role, "Updated raider role - add new role")
                .await;
            let outcome = self
                .0
                .platform
                .remove_role(
                    self.0.guild_id,
                    member.user_id,
                    old,
                    "Updated raider role - remove old one",
                )
                .await;
            debug!(target: RAID_TARGET, user_id = %member.user_id, %outcome, "Removed old raider role");
        }
        self.state().settings.raider_role = role;
    }

    /// Flip the master switch, returning the new state
    pub fn toggle(&self) -> bool {
        let enabled = {
            let mut state = self.state();
            state.settings.enabled = !state.settings.enabled;
            state.settings.enabled
        };
        self.0.wake.notify_one();
        self.ensure_countdown();
        enabled
    }

    pub fn set_threshold(&self, threshold: usize) -> RaidResult<()> {
        if threshold < 1 {
            return Err(RaidError::InvalidSetting {
                name: "threshold",
                value: 0,
            });
        }
        self.state().settings.threshold = threshold;
        Ok(())
    }

    pub fn set_hold_interval(&self, seconds: u64) -> RaidResult<()> {
        if seconds < 1 {
            return Err(RaidError::InvalidSetting {
                name: "hold interval",
                value: seconds,
            });
        }
        self.state().settings.hold_interval = Duration::from_secs(seconds);
        Ok(())
    }

    pub fn set_quiet_timeout(&self, seconds: u64) -> RaidResult<()> {
        if seconds < 1 {
            return Err(RaidError::InvalidSetting {
                name: "quiet timeout",
                value: seconds,
            });
        }
        self.state().settings.quiet_timeout = Duration::from_secs(seconds);
        self.0.wake.notify_one();
        Ok(())
    }

    #[must_use]
    pub fn status(&self) -> RaidStatus {
        let phase = self.phase();
        let state = self.state();
        let flagged: Vec<UserId> = state.flagged.iter().map(|m| m.user_id).collect();
        let holding: Vec<UserId> = state.holding.iter().map(|m| m.user_id).collect();
        RaidStatus {
            phase,
            settings: state.settings,
            flagged: mention_pages(&flagged),
            holding: mention_pages(&holding),
        }
    }

    fn take_flagged(&self, stop: bool) -> Vec<JoinedMember> {
        let flagged = self.state().take_flagged(stop);
        self.0.wake.notify_one();
        flagged
    }

    fn report(members: &[JoinedMember], skipped: Vec<UserId>) -> MassActionReport {
        let users: Vec<UserId> = members.iter().map(|m| m.user_id).collect();
        MassActionReport {
            pages: mention_pages(&users),
            skipped,
        }
    }

    async fn give_role(&self, user_id: UserId, role: RoleId, reason: &str) -> ActionOutcome {
        let outcome = self
            .0
            .platform
            .add_role(self.0.guild_id, user_id, role, reason)
            .await;
        if !outcome.is_success() {
            debug!(target: RAID_TARGET, %user_id, %outcome, "Could not apply raider role");
        }
        outcome
    }
}
