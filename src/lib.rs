//! Medicine reminders: a schedule of daily doses, a once-a-minute checker,
//! spoken and on-screen prompts, and a log of every dose taken or missed.

pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod notify;
pub mod poller;
pub mod reminder;
pub mod store;
pub mod ui;

pub use error::{ReminderError, Result};
pub use model::{DoseStatus, LogRecord, MedicineEntry, ScheduledTime};
pub use reminder::{ReminderEvent, ReminderHandle, ReminderService, Resolution, TimeoutPolicy};
pub use store::{JsonLinesStore, MemoryStore, RecordStore};
