//! The notification surface: on-screen prompts, desktop notifications and
//! spoken alerts.
//!
//! The reminder service only sees the [`NotificationSurface`] and
//! [`PromptHandle`] traits. A user's Taken/Missed choice does not flow back
//! through the handle; the UI sends it to the service with
//! [`ReminderHandle::resolve`](crate::reminder::ReminderHandle::resolve),
//! which then dismisses the prompt.

use log::{debug, warn};
use notify_rust::{Notification, Urgency};
use std::io;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::error::{ReminderError, Result};

// ============================================================================
// Traits
// ============================================================================

pub trait PromptHandle: Send {
    /// False once the prompt is no longer showing, for whatever reason.
    fn is_still_open(&self) -> bool;
    fn force_dismiss(&self);
}

pub trait NotificationSurface: Send + Sync {
    /// Shows a "did you take it?" prompt for `name`.
    fn open(&self, name: &str) -> Result<Box<dyn PromptHandle>>;
    fn speak(&self, text: &str) -> Result<()>;
}

// ============================================================================
// Prompt Board
// ============================================================================

#[derive(Debug, Clone)]
pub struct Prompt {
    pub id: u64,
    pub name: String,
    pub posted_at: Instant,
}

#[derive(Default)]
struct BoardInner {
    next_id: u64,
    prompts: Vec<Prompt>,
}

/// Prompts currently on screen, oldest first. Shared between the surface
/// (which posts and dismisses) and the terminal UI (which renders).
#[derive(Clone, Default)]
pub struct PromptBoard {
    inner: Arc<Mutex<BoardInner>>,
}

impl PromptBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, name: &str) -> BoardPrompt {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.prompts.push(Prompt { id, name: name.to_string(), posted_at: Instant::now() });
        BoardPrompt { board: self.clone(), id }
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.lock().prompts.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().prompts.is_empty()
    }

    fn contains(&self, id: u64) -> bool {
        self.lock().prompts.iter().any(|p| p.id == id)
    }

    fn remove(&self, id: u64) {
        self.lock().prompts.retain(|p| p.id != id);
    }

    fn lock(&self) -> MutexGuard<'_, BoardInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub struct BoardPrompt {
    board: PromptBoard,
    id: u64,
}

impl PromptHandle for BoardPrompt {
    fn is_still_open(&self) -> bool {
        self.board.contains(self.id)
    }

    fn force_dismiss(&self) {
        self.board.remove(self.id);
    }
}

// ============================================================================
// Desktop Surface
// ============================================================================

const CHIMES: [(&str, &str); 3] = [
    ("paplay", "/usr/share/sounds/freedesktop/stereo/complete.oga"),
    ("aplay", "/usr/share/sounds/sound-icons/guitar-11.wav"),
    ("aplay", "/usr/share/sounds/generic.wav"),
];

const SYNTHESIZERS: [&str; 3] = ["spd-say", "espeak", "say"];

/// Posts prompts to a [`PromptBoard`] and, depending on settings, raises a
/// desktop notification, plays a chime and speaks alerts aloud.
pub struct DesktopSurface {
    board: PromptBoard,
    desktop: bool,
    sound: bool,
    speech: bool,
}

impl DesktopSurface {
    pub fn new(board: PromptBoard, desktop: bool, sound: bool, speech: bool) -> Self {
        Self { board, desktop, sound, speech }
    }
}

impl NotificationSurface for DesktopSurface {
    fn open(&self, name: &str) -> Result<Box<dyn PromptHandle>> {
        let prompt = self.board.post(name);

        if self.sound {
            play_chime();
        }

        if self.desktop {
            show_popup(name.to_string());
        }

        Ok(Box::new(prompt))
    }

    fn speak(&self, text: &str) -> Result<()> {
        if !self.speech {
            return Ok(());
        }
        say(text).map_err(|e| ReminderError::NotificationSurface(format!("speech: {e}")))
    }
}

/// The D-Bus call behind a desktop notification can stall for the bus
/// timeout, so it runs on its own thread. The board prompt is already up; a
/// missing notification daemon only costs the popup.
fn show_popup(name: String) {
    std::thread::spawn(move || {
        if let Err(e) = Notification::new()
            .summary("Medicine Reminder 💊")
            .body(&format!("Did you take your medicine: {name}?"))
            .appname("medminder")
            .icon("appointment-soon")
            .urgency(Urgency::Critical)
            .show()
        {
            warn!("Desktop notification for {name} failed: {e}");
        }
    });
}

fn play_chime() {
    std::thread::spawn(|| {
        for (cmd, file) in CHIMES {
            if std::path::Path::new(file).exists() {
                let _ = Command::new(cmd)
                    .arg(file)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .and_then(|mut child| child.wait());
                break;
            }
        }
    });
}

/// Starts the first synthesizer found on the system and reaps it in the
/// background.
fn say(text: &str) -> io::Result<()> {
    for cmd in SYNTHESIZERS {
        match Command::new(cmd)
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(mut child) => {
                debug!("Speaking via {cmd}: {text}");
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(io::ErrorKind::NotFound, "no speech synthesizer installed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_prompts_track_dismissal() {
        let board = PromptBoard::new();
        let a = board.post("Aspirin");
        let b = board.post("Vitamin");

        assert!(a.is_still_open());
        assert_eq!(board.prompts().len(), 2);

        a.force_dismiss();
        assert!(!a.is_still_open());
        assert!(b.is_still_open());
        assert_eq!(board.prompts()[0].name, "Vitamin");

        // Dismissing twice is harmless.
        a.force_dismiss();
        b.force_dismiss();
        assert!(board.is_empty());
    }

    #[test]
    fn same_name_gets_distinct_prompts() {
        let board = PromptBoard::new();
        let first = board.post("Aspirin");
        let second = board.post("Aspirin");
        first.force_dismiss();
        assert!(second.is_still_open());
    }

    #[test]
    fn quiet_surface_posts_to_board_only() {
        let board = PromptBoard::new();
        let surface = DesktopSurface::new(board.clone(), false, false, false);

        let handle = surface.open("Aspirin").unwrap();
        assert!(handle.is_still_open());
        assert_eq!(board.prompts()[0].name, "Aspirin");
        assert!(surface.speak("Time to take your medicine: Aspirin").is_ok());

        handle.force_dismiss();
        assert!(board.is_empty());
    }

    #[test]
    fn desktop_popup_never_holds_up_the_prompt() {
        let board = PromptBoard::new();
        let surface = DesktopSurface::new(board.clone(), true, false, false);

        let started = Instant::now();
        let handle = surface.open("Aspirin").unwrap();
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
        assert!(handle.is_still_open());
        assert_eq!(board.prompts()[0].name, "Aspirin");
    }
}
