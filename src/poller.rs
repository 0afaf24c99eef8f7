use chrono::{NaiveDate, Timelike};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::Result;
use crate::reminder::ReminderHandle;

// Checks land this long after a wall-clock boundary, never just before it.
const BOUNDARY_SLACK: Duration = Duration::from_secs(1);

/// Drives the reminder service: one check per interval, plus the daily
/// reset whenever the local date has changed since the previous check.
pub struct Poller {
    handle: ReminderHandle,
    clock: Arc<dyn Clock>,
    interval: Duration,
    last_date: Option<NaiveDate>,
}

impl Poller {
    pub fn new(handle: ReminderHandle, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self { handle, clock, interval, last_date: None }
    }

    /// Runs until the reminder service goes away. The first check is
    /// immediate; later ones are re-aligned to the wall clock every time, so
    /// a drifting monotonic clock or a suspend cannot skip a minute.
    pub async fn run(mut self) {
        info!("Checking medicines every {:?}", self.interval);

        loop {
            if let Err(e) = self.step().await {
                info!("Poller stopping: {e}");
                break;
            }
            tokio::time::sleep(self.until_next_check()).await;
        }
    }

    /// Time from now until just past the next wall-clock multiple of the
    /// interval, counted from midnight.
    pub fn until_next_check(&self) -> Duration {
        let now = self.clock.now();
        let period = self.interval.as_secs().max(1);
        let into_period = Duration::from_secs(u64::from(now.num_seconds_from_midnight()) % period)
            + Duration::from_nanos(u64::from(now.nanosecond().min(999_999_999)));
        Duration::from_secs(period).saturating_sub(into_period) + BOUNDARY_SLACK
    }

    /// One check. Waits for the service to finish before returning, so
    /// checks never overlap.
    pub async fn step(&mut self) -> Result<Vec<String>> {
        let now = self.clock.now();
        let today = now.date();

        if self.last_date.is_some_and(|prev| prev != today) {
            debug!("Date changed to {today}, resetting reminders");
            self.handle.daily_reset().await?;
        }
        self.last_date = Some(today);

        self.handle.tick(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Result as ReminderResult;
    use crate::model::{DoseStatus, MedicineEntry};
    use crate::notify::{NotificationSurface, PromptBoard, PromptHandle};
    use crate::reminder::{ReminderEvent, ReminderService, Resolution, TimeoutPolicy};
    use crate::store::MemoryStore;
    use chrono::NaiveDateTime;

    struct SilentSurface(PromptBoard);

    impl NotificationSurface for SilentSurface {
        fn open(&self, name: &str) -> ReminderResult<Box<dyn PromptHandle>> {
            Ok(Box::new(self.0.post(name)))
        }

        fn speak(&self, _text: &str) -> ReminderResult<()> {
            Ok(())
        }
    }

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn setup(start: NaiveDateTime) -> (Arc<ManualClock>, ReminderHandle, PromptBoard) {
        let (clock, handle, board, _store) = setup_with_store(start);
        (clock, handle, board)
    }

    fn setup_with_store(start: NaiveDateTime) -> (Arc<ManualClock>, ReminderHandle, PromptBoard, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_medicines(vec![
            MedicineEntry::new("Aspirin", "08:00").unwrap(),
            MedicineEntry::new("Night pill", "23:59").unwrap(),
        ]));
        let board = PromptBoard::new();
        let clock = Arc::new(ManualClock::new(start));
        let handle = ReminderService::spawn(
            store.clone(),
            Arc::new(SilentSurface(board.clone())),
            clock.clone(),
            TimeoutPolicy::default(),
        );
        (clock, handle, board, store)
    }

    #[tokio::test(start_paused = true)]
    async fn step_opens_due_reminders() {
        let (clock, handle, board) = setup(at(16, 7, 59));
        let mut poller = Poller::new(handle.clone(), clock.clone(), Duration::from_secs(60));

        assert!(poller.step().await.unwrap().is_empty());
        clock.set(at(16, 8, 0));
        assert_eq!(poller.step().await.unwrap(), ["Aspirin"]);
        assert_eq!(board.prompts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn crossing_midnight_resets_before_ticking() {
        let (clock, handle, board, store) = setup_with_store(at(16, 23, 59));
        let mut events = handle.subscribe();
        let mut poller = Poller::new(handle.clone(), clock.clone(), Duration::from_secs(60));

        assert_eq!(poller.step().await.unwrap(), ["Night pill"]);

        clock.set(at(17, 0, 0));
        assert!(poller.step().await.unwrap().is_empty());
        assert!(handle.open_reminders().await.unwrap().is_empty());

        assert!(matches!(events.recv().await.unwrap(), ReminderEvent::Opened { .. }));
        assert_eq!(events.recv().await.unwrap(), ReminderEvent::Reset { cleared: 1 });

        // Yesterday's prompt is still up and its answer is still logged.
        assert_eq!(board.prompts()[0].name, "Night pill");
        assert!(matches!(
            handle.resolve("Night pill", DoseStatus::Taken).await,
            Ok(Resolution::Logged(_))
        ));
        let logs = store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!((logs[0].name.as_str(), logs[0].status), ("Night pill", DoseStatus::Taken));
        assert!(board.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reminder_left_open_at_midnight_is_auto_missed() {
        let (clock, handle, board, store) = setup_with_store(at(16, 23, 59));
        let mut events = handle.subscribe();
        let mut poller = Poller::new(handle.clone(), clock.clone(), Duration::from_secs(60));

        poller.step().await.unwrap();
        clock.set(at(17, 0, 0));
        poller.step().await.unwrap();

        clock.set(at(17, 0, 5));
        loop {
            if let ReminderEvent::Resolved(record) = events.recv().await.unwrap() {
                assert_eq!(record.status, DoseStatus::MissedAuto);
                break;
            }
        }
        assert_eq!(store.logs().len(), 1);
        assert!(board.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn checks_align_just_past_the_minute() {
        let (clock, handle, _board) = setup(at(16, 7, 59) + chrono::Duration::seconds(30));

        let poller = Poller::new(handle.clone(), clock.clone(), Duration::from_secs(60));
        assert_eq!(poller.until_next_check(), Duration::from_secs(31));

        clock.set(at(16, 8, 0) + chrono::Duration::milliseconds(500));
        assert_eq!(poller.until_next_check(), Duration::from_millis(60_500));

        let poller = Poller::new(handle, clock.clone(), Duration::from_secs(30));
        clock.set(at(16, 8, 0) + chrono::Duration::seconds(10));
        assert_eq!(poller.until_next_check(), Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn same_day_steps_never_reset() {
        let (clock, handle, _board) = setup(at(16, 23, 59));
        let mut events = handle.subscribe();
        let mut poller = Poller::new(handle.clone(), clock.clone(), Duration::from_secs(60));

        poller.step().await.unwrap();
        clock.set(at(16, 23, 59) + chrono::Duration::seconds(30));
        poller.step().await.unwrap();

        assert!(matches!(events.try_recv().unwrap(), ReminderEvent::Opened { .. }));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_on_the_interval() {
        let (clock, handle, board) = setup(at(16, 7, 58));
        let mut events = handle.subscribe();
        let poller = Poller::new(handle.clone(), clock.clone(), Duration::from_secs(60));
        tokio::spawn(poller.run());

        // The first check runs immediately at 07:58; the next one waits for
        // just past the following wall-clock minute, which is now 08:00.
        tokio::task::yield_now().await;
        clock.set(at(16, 8, 0));

        match events.recv().await.unwrap() {
            ReminderEvent::Opened { name, at: opened } => {
                assert_eq!(name, "Aspirin");
                assert_eq!(opened, at(16, 8, 0));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(board.prompts().len(), 1);
    }
}
