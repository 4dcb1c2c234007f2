//! Reminders delivered by direct message

use super::{DelayedTask, ModerationError, ModerationResult, RestoreReport, ScheduleError, ScheduledAction};
use crate::TIMER_TARGET;
use crate::platform::{Notice, Platform, Presence};
use crate::store::{Collection, Filter, ReminderRecord};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::UserId;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Live reminders a single user may hold
pub const MAX_REMINDERS_PER_USER: usize = 10;

const REMINDER_COLOUR: u32 = 0xfffa65;
const LATE_FOOTER: &str = "late reminder due to downtime";

/// Deferred delivery of one reminder
pub struct ReminderTimer {
    record: ReminderRecord,
    service: ReminderService,
}

impl ReminderTimer {
    pub fn from_request(
        service: ReminderService,
        id: u64,
        user_id: UserId,
        end: DateTime<Utc>,
        details: impl Into<String>,
    ) -> Self {
        Self::from_persisted(
            service,
            ReminderRecord {
                id,
                user_id: user_id.get(),
                details: details.into(),
                end,
            },
        )
    }

    pub fn from_persisted(service: ReminderService, record: ReminderRecord) -> Self {
        Self { record, service }
    }

    #[must_use]
    pub fn record(&self) -> &ReminderRecord {
        &self.record
    }
}

#[async_trait::async_trait]
impl ScheduledAction for ReminderTimer {
    async fn task(&self) {
        self.service.deliver(&self.record, false).await;
    }

    async fn on_exit(&self) {
        self.service
            .0
            .timers
            .remove(&(self.record.user_id, self.record.id));
        if let Err(e) = self
            .service
            .0
            .records
            .delete_one(&Filter::id(self.record.id))
            .await
        {
            warn!(target: TIMER_TARGET, id = self.record.id, "Failed to delete reminder: {e}");
        }
    }
}

struct ReminderShared {
    platform: Arc<dyn Platform>,
    records: Collection<ReminderRecord>,
    timers: DashMap<(u64, u64), DelayedTask<ReminderTimer>>,
}

/// Owner of live reminders, keyed by `(user, reminder id)`
#[derive(Clone)]
pub struct ReminderService(Arc<ReminderShared>);

impl ReminderService {
    pub fn new(platform: Arc<dyn Platform>, records: Collection<ReminderRecord>) -> Self {
        Self(Arc::new(ReminderShared {
            platform,
            records,
            timers: DashMap::new(),
        }))
    }

    /// Reschedule stored reminders, delivering overdue ones right away
    pub async fn restore(&self) -> ModerationResult<RestoreReport> {
        let mut report = RestoreReport::default();
        self.0.timers.clear();

        for record in self.0.records.find(&Filter::all()).await {
            let key = (record.user_id, record.id);
            let end = record.end;
            match DelayedTask::start(ReminderTimer::from_persisted(self.clone(), record.clone()), end) {
                Ok(timer) => {
                    self.0.timers.insert(key, timer);
                    report.scheduled += 1;
                }
                Err(ScheduleError::PastTime(_)) => {
                    self.0.records.delete_one(&Filter::id(record.id)).await?;
                    let service = self.clone();
                    tokio::spawn(async move { service.deliver(&record, true).await });
                    report.late += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            target: TIMER_TARGET,
            scheduled = report.scheduled,
            late = report.late,
            "Restored reminders"
        );
        Ok(report)
    }

    /// Schedule a reminder for `end`
    ///
    /// The per-user cap is checked by the caller against [`Self::count`].
    pub async fn add(
        &self,
        id: u64,
        user_id: UserId,
        end: DateTime<Utc>,
        details: &str,
    ) -> ModerationResult<()> {
        let timer = DelayedTask::start(
            ReminderTimer::from_request(self.clone(), id, user_id, end, details),
            end,
        )?;
        let record = timer.action().record().clone();
        self.0.timers.insert((user_id.get(), id), timer);
        self.0.records.insert(record).await?;
        debug!(target: TIMER_TARGET, %user_id, id, %end, "Reminder set");
        Ok(())
    }

    /// Cancel one of the user's reminders
    pub async fn remove(&self, user_id: UserId, id: u64) -> ModerationResult<()> {
        let Some((_, mut timer)) = self.0.timers.remove(&(user_id.get(), id)) else {
            return Err(ModerationError::ReminderNotFound(id));
        };
        timer.cancel().await?;
        Ok(())
    }

    /// The user's live reminders, soonest first
    #[must_use]
    pub fn list(&self, user_id: UserId) -> Vec<ReminderRecord> {
        let mut reminders: Vec<ReminderRecord> = self
            .0
            .timers
            .iter()
            .filter(|entry| entry.key().0 == user_id.get())
            .map(|entry| entry.value().action().record().clone())
            .collect();
        reminders.sort_by_key(|record| record.end);
        reminders
    }

    #[must_use]
    pub fn count(&self, user_id: UserId) -> usize {
        self.0
            .timers
            .iter()
            .filter(|entry| entry.key().0 == user_id.get())
            .count()
    }

    /// Direct message the reminder, purging every reminder of a user that is gone
    async fn deliver(&self, record: &ReminderRecord, late: bool) {
        let user_id = UserId::new(record.user_id);
        match self.0.platform.user_presence(user_id).await {
            Presence::Gone => {
                self.purge_user(user_id, record.id).await;
                return;
            }
            Presence::Unknown(e) => {
                warn!(target: TIMER_TARGET, %user_id, "Could not check user before reminding: {e}");
            }
            Presence::Present => {}
        }

        let mut notice =
            Notice::new("⏰ Reminder ⏰", REMINDER_COLOUR).description(record.details.as_str());
        if late {
            notice = notice.footer(LATE_FOOTER);
        }
        let outcome = self.0.platform.direct_message(user_id, &notice).await;
        debug!(target: TIMER_TARGET, %user_id, id = record.id, late, %outcome, "Reminder delivered");
    }

    /// Cancel and delete every reminder of a user, except the one being delivered
    async fn purge_user(&self, user_id: UserId, delivering: u64) {
        let keys: Vec<(u64, u64)> = self
            .0
            .timers
            .iter()
            .map(|entry| *entry.key())
            .filter(|key| key.0 == user_id.get() && key.1 != delivering)
            .collect();
        for key in keys {
            if let Some((_, mut timer)) = self.0.timers.remove(&key) {
                let _ = timer.cancel().await;
            }
        }

        match self.0.records.delete_many(&Filter::user(user_id.get())).await {
            Ok(removed) => {
                warn!(target: TIMER_TARGET, %user_id, removed, "Purged reminders of unreachable user");
            }
            Err(e) => warn!(target: TIMER_TARGET, %user_id, "Failed to purge reminders: {e}"),
        }
    }

    #[must_use]
    pub fn records(&self) -> &Collection<ReminderRecord> {
        &self.0.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ActionOutcome, MockPlatform, Presence};
    use mockall::predicate::*;
    use std::time::Duration;

    const USER: UserId = UserId::new(42);

    fn service(platform: MockPlatform) -> ReminderService {
        ReminderService::new(Arc::new(platform), Collection::in_memory())
    }

    fn record(id: u64, user_id: u64, end: DateTime<Utc>) -> ReminderRecord {
        ReminderRecord {
            id,
            user_id,
            details: format!("reminder {id}"),
            end,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reminder_is_delivered_once() {
        let mut platform = MockPlatform::new();
        platform.expect_user_presence().return_const(Presence::Present);
        platform
            .expect_direct_message()
            .withf(|user_id, notice| {
                *user_id == USER
                    && notice.description.as_deref() == Some("stretch")
                    && notice.footer.is_none()
            })
            .times(1)
            .return_const(ActionOutcome::Success);

        let service = service(platform);
        service
            .add(7, USER, Utc::now() + chrono::Duration::minutes(1), "stretch")
            .await
            .unwrap();
        assert_eq!(service.count(USER), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(service.count(USER), 0);
        assert!(service.records().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_reminder_is_delivered_late() {
        let mut platform = MockPlatform::new();
        platform.expect_user_presence().return_const(Presence::Present);
        platform
            .expect_direct_message()
            .withf(|_, notice| notice.footer.as_deref() == Some(LATE_FOOTER))
            .times(1)
            .return_const(ActionOutcome::Success);

        let service = service(platform);
        service
            .records()
            .insert(record(1, USER.get(), Utc::now() - chrono::Duration::hours(2)))
            .await
            .unwrap();

        let report = service.restore().await.unwrap();
        assert_eq!(report.late, 1);
        assert!(service.records().is_empty().await);
        assert!(service.list(USER).is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_user_purges_all_reminders() {
        let mut platform = MockPlatform::new();
        platform
            .expect_user_presence()
            .with(eq(USER))
            .return_const(Presence::Gone);
        platform.expect_direct_message().never();

        let service = service(platform);
        let now = Utc::now();
        for reminder in [
            record(1, USER.get(), now + chrono::Duration::seconds(5)),
            record(2, USER.get(), now + chrono::Duration::days(3)),
            record(3, 99, now + chrono::Duration::days(3)),
        ] {
            service.records().insert(reminder).await.unwrap();
        }
        assert_eq!(service.restore().await.unwrap().scheduled, 3);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(service.list(USER).is_empty());
        let left = service.records().find(&Filter::all()).await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].user_id, 99);
        assert_eq!(service.count(UserId::new(99)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_user_check_keeps_reminders() {
        let mut platform = MockPlatform::new();
        platform
            .expect_user_presence()
            .return_const(Presence::Unknown("503 Service Unavailable".to_string()));
        platform
            .expect_direct_message()
            .times(1)
            .return_const(ActionOutcome::Success);

        let service = service(platform);
        let now = Utc::now();
        service
            .add(1, USER, now + chrono::Duration::seconds(5), "first")
            .await
            .unwrap();
        service
            .add(2, USER, now + chrono::Duration::days(3), "second")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        let left = service.list(USER);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, 2);
        assert_eq!(service.records().len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_cancels_delivery() {
        let mut platform = MockPlatform::new();
        platform.expect_direct_message().never();

        let service = service(platform);
        let end = Utc::now() + chrono::Duration::minutes(5);
        service.add(1, USER, end, "first").await.unwrap();
        service
            .add(2, USER, end + chrono::Duration::minutes(1), "second")
            .await
            .unwrap();

        service.remove(USER, 1).await.unwrap();
        assert!(matches!(
            service.remove(USER, 1).await,
            Err(ModerationError::ReminderNotFound(1))
        ));
        let left = service.list(USER);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].details, "second");

        service.remove(USER, 2).await.unwrap();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(service.records().is_empty().await);
    }
}
