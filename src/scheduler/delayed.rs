use super::{ScheduleError, ScheduleResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// An action that runs once at a target time
#[async_trait::async_trait]
pub trait ScheduledAction: Send + Sync + 'static {
    /// The deferred effect
    async fn task(&self);

    /// Cleanup, run exactly once after `task` completes or on cancellation.
    /// Failures must be handled inside; nothing propagates out of here.
    async fn on_exit(&self);
}

/// Latch making `on_exit` run at most once across both exit paths
#[derive(Default)]
struct ExitLatch(AtomicBool);

impl ExitLatch {
    async fn run<A: ScheduledAction>(&self, action: &A) {
        if !self.0.swap(true, Ordering::AcqRel) {
            action.on_exit().await;
        }
    }
}

/// A single deferred execution of a [`ScheduledAction`]
pub struct DelayedTask<A> {
    end: DateTime<Utc>,
    remaining: Option<Duration>,
    action: Arc<A>,
    latch: Arc<ExitLatch>,
    handle: Option<JoinHandle<()>>,
}

impl<A: ScheduledAction> DelayedTask<A> {
    /// Wrap an action without scheduling it
    pub fn new(action: A, end: DateTime<Utc>) -> Self {
        Self {
            end,
            remaining: None,
            action: Arc::new(action),
            latch: Arc::new(ExitLatch::default()),
            handle: None,
        }
    }

    /// Wrap an action and schedule it right away
    ///
    /// # Errors
    /// Returns [`ScheduleError::PastTime`] if `end` is not in the future.
    pub fn start(action: A, end: DateTime<Utc>) -> ScheduleResult<Self> {
        let mut task = Self::new(action, end);
        task.schedule()?;
        Ok(task)
    }

    /// Spawn the one execution of this task
    ///
    /// # Errors
    /// Returns [`ScheduleError::PastTime`] if the target time is not in the
    /// future, or [`ScheduleError::AlreadyRunning`] if an execution was
    /// already spawned.
    pub fn schedule(&mut self) -> ScheduleResult<()> {
        let remaining = (self.end - Utc::now())
            .to_std()
            .ok()
            .filter(|remaining| !remaining.is_zero())
            .ok_or(ScheduleError::PastTime(self.end))?;
        if self.handle.is_some() {
            return Err(ScheduleError::AlreadyRunning);
        }

        let action = Arc::clone(&self.action);
        let latch = Arc::clone(&self.latch);
        self.remaining = Some(remaining);
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            action.task().await;
            latch.run(&*action).await;
        }));
        Ok(())
    }

    /// Abort the pending execution and run the cleanup inline
    ///
    /// # Errors
    /// Returns [`ScheduleError::NoActiveExecution`] if nothing is pending,
    /// including when the execution already finished.
    pub async fn cancel(&mut self) -> ScheduleResult<()> {
        let handle = match self.handle.take() {
            Some(handle) if !handle.is_finished() => handle,
            _ => return Err(ScheduleError::NoActiveExecution),
        };
        handle.abort();
        self.latch.run(&*self.action).await;
        Ok(())
    }

    /// Whether an execution is pending or running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// The target time
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Delay computed when the task was scheduled
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.remaining
    }

    #[must_use]
    pub fn action(&self) -> &A {
        &self.action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Tally {
        tasks: AtomicUsize,
        exits: AtomicUsize,
    }

    struct CountingAction(Arc<Tally>);

    #[async_trait::async_trait]
    impl ScheduledAction for CountingAction {
        async fn task(&self) {
            self.0.tasks.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_exit(&self) {
            self.0.exits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counts(tally: &Tally) -> (usize, usize) {
        (
            tally.tasks.load(Ordering::SeqCst),
            tally.exits.load(Ordering::SeqCst),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_time_is_rejected() {
        let tally = Arc::new(Tally::default());
        let end = Utc::now() - chrono::Duration::seconds(1);

        let result = DelayedTask::start(CountingAction(Arc::clone(&tally)), end);
        assert!(matches!(result, Err(ScheduleError::PastTime(at)) if at == end));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counts(&tally), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_at_target_time() {
        let tally = Arc::new(Tally::default());
        let end = Utc::now() + chrono::Duration::seconds(2);
        let task = DelayedTask::start(CountingAction(Arc::clone(&tally)), end).unwrap();

        assert!(task.is_active());
        assert!(task.remaining().unwrap() <= Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counts(&tally), (0, 0));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(counts(&tally), (1, 1));
        assert!(!task.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_runs_exit_once() {
        let tally = Arc::new(Tally::default());
        let end = Utc::now() + chrono::Duration::seconds(10);
        let mut task = DelayedTask::start(CountingAction(Arc::clone(&tally)), end).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        task.cancel().await.unwrap();
        assert_eq!(counts(&tally), (0, 1));
        assert!(!task.is_active());

        // The aborted execution never fires
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(counts(&tally), (0, 1));

        assert_eq!(task.cancel().await, Err(ScheduleError::NoActiveExecution));
        assert_eq!(counts(&tally), (0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_completion_is_an_error() {
        let tally = Arc::new(Tally::default());
        let end = Utc::now() + chrono::Duration::seconds(1);
        let mut task = DelayedTask::start(CountingAction(Arc::clone(&tally)), end).unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(task.cancel().await, Err(ScheduleError::NoActiveExecution));
        assert_eq!(counts(&tally), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_twice_is_an_error() {
        let tally = Arc::new(Tally::default());
        let end = Utc::now() + chrono::Duration::seconds(5);
        let mut task = DelayedTask::new(CountingAction(Arc::clone(&tally)), end);
        assert!(task.remaining().is_none());
        assert!(!task.is_active());

        task.schedule().unwrap();
        assert_eq!(task.schedule(), Err(ScheduleError::AlreadyRunning));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(counts(&tally), (1, 1));
    }
}
