//! The reminder lifecycle.
//!
//! One task owns every open reminder. Ticks, user choices, the daily reset
//! and timeout deadlines are all handled inside that task one at a time, so
//! two resolutions for the same medicine can never interleave: the first one
//! writes the log record and closes the reminder, the second finds it closed
//! and does nothing.
//!
//! # Lifecycle
//!
//! ```text
//!            tick matches                first_alert elapsed
//!  Closed ─────────────────► Awaiting ─────────────────────► FinalWarning
//!    ▲                          │                                 │
//!    │    Taken / Missed        │       Taken / Missed            │
//!    ├──────────────────────────┘◄────────────────────────────────┤
//!    │                                                            │
//!    └──────────────── final_grace elapsed: Missed (Auto) ────────┘
//! ```
//!
//! A medicine reopens only after it has closed *and* a later tick matches
//! its time in a different minute. Because matching is per `HH:MM`, that is
//! next day in practice.
//!
//! The daily reset empties the open set but does not cancel anything: a
//! reminder still in flight at midnight is carried over with its prompt and
//! countdown, and ends in exactly one log record like any other.

use chrono::{NaiveDateTime, Timelike};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_util::time::{DelayQueue, delay_queue};

use crate::clock::Clock;
use crate::error::{ReminderError, Result};
use crate::model::{DoseStatus, LogRecord, TIME_FMT};
use crate::notify::{NotificationSurface, PromptHandle};
use crate::store::RecordStore;

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 128;

// ============================================================================
// Public Types
// ============================================================================

/// How long an unanswered reminder waits before the second alert
/// (`first_alert`) and then before it is logged as missed (`final_grace`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub first_alert: Duration,
    pub final_grace: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            first_alert: Duration::from_secs(300),
            final_grace: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AwaitingResponse,
    FinalWarning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReminder {
    pub name: String,
    pub opened_at: NaiveDateTime,
    pub stage: Stage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderEvent {
    Opened { name: String, at: NaiveDateTime },
    Realerted { name: String },
    Resolved(LogRecord),
    Reset { cleared: usize },
}

/// Result of a resolve request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Logged(LogRecord),
    /// Nothing was open under that name; no record written.
    AlreadyClosed,
}

// ============================================================================
// Service
// ============================================================================

enum Command {
    Tick {
        now: NaiveDateTime,
        reply: oneshot::Sender<Vec<String>>,
    },
    DailyReset {
        reply: oneshot::Sender<usize>,
    },
    Resolve {
        name: String,
        status: DoseStatus,
        reply: oneshot::Sender<Result<Resolution>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<OpenReminder>>,
    },
}

/// Which map a pending reminder lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Today,
    Carried,
}

struct Pending {
    opened_at: NaiveDateTime,
    stage: Stage,
    prompt: Option<Box<dyn PromptHandle>>,
    // None only while its expiry is being handled.
    deadline: Option<delay_queue::Key>,
}

pub struct ReminderService {
    store: Arc<dyn RecordStore>,
    surface: Arc<dyn NotificationSurface>,
    clock: Arc<dyn Clock>,
    policy: TimeoutPolicy,
    open: HashMap<String, Pending>,
    // Opened before the last daily reset and not yet resolved.
    carried: HashMap<String, Pending>,
    // Minute at which each name last opened; blocks a same-minute reopen.
    fired: HashMap<String, NaiveDateTime>,
    deadlines: DelayQueue<(Slot, String)>,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<ReminderEvent>,
}

impl ReminderService {
    /// Starts the service on the current tokio runtime.
    pub fn spawn(
        store: Arc<dyn RecordStore>,
        surface: Arc<dyn NotificationSurface>,
        clock: Arc<dyn Clock>,
        policy: TimeoutPolicy,
    ) -> ReminderHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let service = Self {
            store,
            surface,
            clock,
            policy,
            open: HashMap::new(),
            carried: HashMap::new(),
            fired: HashMap::new(),
            deadlines: DelayQueue::new(),
            commands: rx,
            events: events.clone(),
        };
        tokio::spawn(service.run());

        ReminderHandle { commands: tx, events }
    }

    async fn run(mut self) {
        info!(
            "Reminder service started (second alert after {:?}, auto-miss {:?} later)",
            self.policy.first_alert, self.policy.final_grace
        );

        loop {
            tokio::select! {
                biased;

                Some(expired) = self.deadlines.next() => self.on_deadline(expired.into_inner()),
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
            }
        }

        debug!(
            "Reminder service stopped with {} reminder(s) open, {} carried over",
            self.open.len(),
            self.carried.len()
        );
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Tick { now, reply } => {
                let _ = reply.send(self.on_tick(now));
            }
            Command::DailyReset { reply } => {
                let _ = reply.send(self.on_daily_reset());
            }
            Command::Resolve { name, status, reply } => {
                let result = self.on_resolve(&name, status);
                if let Err(e) = &result {
                    warn!("Could not record {status} for {name}: {e}");
                }
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn on_tick(&mut self, now: NaiveDateTime) -> Vec<String> {
        let medicines = match self.store.load_medicines() {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping check at {}: {}", now.format(TIME_FMT), e);
                return Vec::new();
            }
        };

        let minute = truncate_to_minute(now);
        let mut opened = Vec::new();

        for entry in medicines {
            if !entry.is_due(now)
                || self.open.contains_key(&entry.name)
                || self.fired.get(&entry.name) == Some(&minute)
            {
                continue;
            }
            self.open_reminder(&entry.name, now);
            self.fired.insert(entry.name.clone(), minute);
            opened.push(entry.name);
        }

        opened
    }

    fn open_reminder(&mut self, name: &str, now: NaiveDateTime) {
        info!("Reminder opened for {name}");
        self.announce(name, &format!("Time to take your medicine: {name}"));
        let prompt = self.show_prompt(name);
        let key = self.deadlines.insert((Slot::Today, name.to_string()), self.policy.first_alert);

        self.open.insert(
            name.to_string(),
            Pending {
                opened_at: now,
                stage: Stage::AwaitingResponse,
                prompt,
                deadline: Some(key),
            },
        );
        self.emit(ReminderEvent::Opened { name: name.to_string(), at: now });
    }

    fn pending(&mut self, slot: Slot) -> &mut HashMap<String, Pending> {
        match slot {
            Slot::Today => &mut self.open,
            Slot::Carried => &mut self.carried,
        }
    }

    fn on_deadline(&mut self, (slot, name): (Slot, String)) {
        let stage = match self.pending(slot).get_mut(&name) {
            Some(pending) => {
                pending.deadline = None;
                pending.stage
            }
            None => {
                debug!("Deadline for {name} fired after it closed");
                return;
            }
        };

        match stage {
            Stage::AwaitingResponse => self.realert(slot, &name),
            Stage::FinalWarning => self.auto_miss(slot, &name),
        }
    }

    fn realert(&mut self, slot: Slot, name: &str) {
        info!("No response for {name}, alerting again");
        self.announce(name, &format!("You missed your medicine: {name}. Please take it now."));

        let showing = self
            .pending(slot)
            .get(name)
            .and_then(|p| p.prompt.as_ref())
            .is_some_and(|p| p.is_still_open());
        let reshown = if showing { None } else { self.show_prompt(name) };
        let key = self.deadlines.insert((slot, name.to_string()), self.policy.final_grace);

        if let Some(pending) = self.pending(slot).get_mut(name) {
            pending.stage = Stage::FinalWarning;
            pending.deadline = Some(key);
            if reshown.is_some() {
                pending.prompt = reshown;
            }
        }
        self.emit(ReminderEvent::Realerted { name: name.to_string() });
    }

    fn auto_miss(&mut self, slot: Slot, name: &str) {
        if let Err(e) = self.resolve_in(slot, name, DoseStatus::MissedAuto) {
            error!(
                "Could not record auto-miss for {name}: {e}; retrying in {:?}",
                self.policy.final_grace
            );
            let key = self.deadlines.insert((slot, name.to_string()), self.policy.final_grace);
            if let Some(pending) = self.pending(slot).get_mut(name) {
                pending.deadline = Some(key);
            }
        }
    }

    /// A user's answer goes to today's reminder first, then to one carried
    /// over from before midnight.
    fn on_resolve(&mut self, name: &str, status: DoseStatus) -> Result<Resolution> {
        let slot = if self.open.contains_key(name) {
            Slot::Today
        } else if self.carried.contains_key(name) {
            Slot::Carried
        } else {
            debug!("Ignoring {status} for {name}: no open reminder");
            return Ok(Resolution::AlreadyClosed);
        };
        self.resolve_in(slot, name, status)
    }

    fn resolve_in(&mut self, slot: Slot, name: &str, status: DoseStatus) -> Result<Resolution> {
        if !self.pending(slot).contains_key(name) {
            return Ok(Resolution::AlreadyClosed);
        }

        // Write first: if the log is unreachable the reminder stays open.
        let record = LogRecord::new(name, self.clock.now(), status);
        self.store.append_log(&record)?;

        if let Some(pending) = self.pending(slot).remove(name) {
            self.close(pending);
        }
        info!("Reminder for {name} resolved: {status}");
        self.emit(ReminderEvent::Resolved(record.clone()));
        Ok(Resolution::Logged(record))
    }

    fn on_daily_reset(&mut self) -> usize {
        let open = std::mem::take(&mut self.open);
        let cleared = open.len();
        for (name, mut pending) in open {
            debug!("Carrying {name} over the daily reset");
            if let Some(key) = pending.deadline.take() {
                let due = self.deadlines.remove(&key).deadline();
                pending.deadline = Some(self.deadlines.insert_at((Slot::Carried, name.clone()), due));
            }
            if let Some(stale) = self.carried.insert(name.clone(), pending) {
                warn!("Dropping a reminder for {name} carried over from an earlier day");
                self.close(stale);
            }
        }
        self.fired.clear();

        info!("Daily reset cleared {cleared} open reminder(s)");
        self.emit(ReminderEvent::Reset { cleared });
        cleared
    }

    fn snapshot(&self) -> Vec<OpenReminder> {
        let mut out: Vec<_> = self
            .open
            .iter()
            .map(|(name, p)| OpenReminder {
                name: name.clone(),
                opened_at: p.opened_at,
                stage: p.stage,
            })
            .collect();
        out.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.name.cmp(&b.name)));
        out
    }

    fn close(&mut self, pending: Pending) {
        if let Some(key) = pending.deadline {
            self.deadlines.remove(&key);
        }
        if let Some(prompt) = pending.prompt {
            prompt.force_dismiss();
        }
    }

    fn announce(&self, name: &str, text: &str) {
        if let Err(e) = self.surface.speak(text) {
            warn!("Spoken alert for {name} failed: {e}");
        }
    }

    fn show_prompt(&self, name: &str) -> Option<Box<dyn PromptHandle>> {
        match self.surface.open(name) {
            Ok(prompt) => Some(prompt),
            Err(e) => {
                warn!("Could not show prompt for {name}: {e}");
                None
            }
        }
    }

    fn emit(&self, event: ReminderEvent) {
        let _ = self.events.send(event);
    }
}

fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(t)
}

// ============================================================================
// Handle
// ============================================================================

/// Cheap, cloneable access to a running [`ReminderService`].
#[derive(Clone)]
pub struct ReminderHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ReminderEvent>,
}

impl ReminderHandle {
    /// Opens reminders for every medicine due at `now`. Returns the names
    /// that were opened.
    pub async fn tick(&self, now: NaiveDateTime) -> Result<Vec<String>> {
        self.request(|reply| Command::Tick { now, reply }).await
    }

    pub async fn daily_reset(&self) -> Result<usize> {
        self.request(|reply| Command::DailyReset { reply }).await
    }

    pub async fn resolve(&self, name: &str, status: DoseStatus) -> Result<Resolution> {
        let name = name.to_string();
        self.request(|reply| Command::Resolve { name, status, reply }).await?
    }

    pub async fn open_reminders(&self) -> Result<Vec<OpenReminder>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReminderEvent> {
        self.events.subscribe()
    }

    /// For callers outside the runtime, such as the terminal loop. Panics if
    /// called from async code.
    pub fn blocking_resolve(&self, name: &str, status: DoseStatus) -> Result<Resolution> {
        let name = name.to_string();
        self.blocking_request(|reply| Command::Resolve { name, status, reply })?
    }

    pub fn blocking_open_reminders(&self) -> Result<Vec<OpenReminder>> {
        self.blocking_request(|reply| Command::Snapshot { reply })
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| ReminderError::ServiceStopped)?;
        rx.await.map_err(|_| ReminderError::ServiceStopped)
    }

    fn blocking_request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .blocking_send(make(reply))
            .map_err(|_| ReminderError::ServiceStopped)?;
        rx.blocking_recv().map_err(|_| ReminderError::ServiceStopped)
    }
}
