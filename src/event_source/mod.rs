//! Bridges the OS level global input hook and the foreground application notifications into two
//! event feeds consumed by the session. [GenericEventSource] picks the backend at compile time.
//!
//! Backends run their callbacks on threads the session doesn't own. They never touch session
//! state; everything goes through an [EventSink], which preserves arrival order and tags each event
//! with the installation it came from so that the owner can drop leftovers of a previous mode.

#[cfg(any(feature = "x11", test))]
mod worker;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "x11")]
extern crate xcb;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::Instant,
};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

pub type KeyCode = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    KeyDown,
    KeyUp,
    PointerDown,
    PointerUp,
    PointerMoved,
    Scroll,
    /// Input of an unknown class, for backends that can only tell that *something* happened.
    Activity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: InputKind,
    pub text: Option<Arc<str>>,
    pub key_code: KeyCode,
}

impl InputEvent {
    pub fn key_down(text: Option<&str>, key_code: KeyCode) -> Self {
        Self {
            kind: InputKind::KeyDown,
            text: text.map(Arc::from),
            key_code,
        }
    }

    pub fn other(kind: InputKind) -> Self {
        Self {
            kind,
            text: None,
            key_code: 0,
        }
    }
}

/// Application that became frontmost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundApp {
    pub app_name: Arc<str>,
    /// Set when the newly foregrounded application is this process.
    pub is_self: bool,
}

impl ForegroundApp {
    pub fn other(app_name: &str) -> Self {
        Self {
            app_name: app_name.into(),
            is_self: false,
        }
    }
}

/// Platform key codes that the break log treats specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCodes {
    pub delete: KeyCode,
    pub submit: KeyCode,
}

impl Default for KeyCodes {
    fn default() -> Self {
        Self {
            delete: 51,
            submit: 36,
        }
    }
}

/// How the global hook treats the events it sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookMode {
    /// Passive listener. Events continue to their destination untouched.
    ListenOnly,
    /// Every keyboard and pointer event is consumed by the hook.
    Intercept,
}

/// An event along with the installation generation that produced it and the moment it was
/// observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged<T> {
    pub generation: u64,
    pub at: Instant,
    pub event: T,
}

/// Producer half handed to a backend on installation. Cheap to clone and safe to use from any
/// thread.
#[derive(Debug, Clone)]
pub struct EventSink<T> {
    sender: mpsc::Sender<Tagged<T>>,
    generation: u64,
}

impl<T> EventSink<T> {
    pub fn new(sender: mpsc::Sender<Tagged<T>>, generation: u64) -> Self {
        Self { sender, generation }
    }

    /// Never blocks: hook callbacks run on the OS input path.
    pub fn push(&self, event: T) {
        let tagged = Tagged {
            generation: self.generation,
            at: Instant::now(),
            event,
        };
        match self.sender.try_send(tagged) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Event queue is full, dropping event"),
            Err(TrySendError::Closed(_)) => debug!("Event queue is closed, dropping event"),
        }
    }
}

pub type InputSink = EventSink<InputEvent>;
pub type ForegroundSink = EventSink<ForegroundApp>;

/// Owner of the single system wide input hook.
#[cfg_attr(test, automock)]
pub trait InputHook: Send {
    /// Installs the hook. Observed events must be pushed into `sink` in the order they happen.
    fn install(&mut self, mode: HookMode, sink: InputSink) -> Result<()>;

    /// Removes the hook. Calling it without an installed hook does nothing.
    fn remove(&mut self);

    fn key_codes(&self) -> KeyCodes;
}

/// Foreground application tracking and self activation.
#[cfg_attr(test, automock)]
pub trait AppWatcher: Send {
    fn frontmost_app(&mut self) -> Result<Option<ForegroundApp>>;

    /// Starts delivering a [ForegroundApp] for every foreground change.
    fn subscribe(&mut self, sink: ForegroundSink) -> Result<()>;

    fn unsubscribe(&mut self);

    /// Brings this process to the foreground.
    fn activate_self(&mut self) -> Result<()>;
}

/// Cross-compatible entry point for the platform backends.
pub struct GenericEventSource;

impl GenericEventSource {
    pub fn create() -> Result<(Box<dyn InputHook>, Box<dyn AppWatcher>)> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "x11")] {
                Ok((
                    Box::new(x11::X11InputHook::new()),
                    Box::new(x11::X11AppWatcher::new()?),
                ))
            } else {
                Ok((Box::new(Unavailable), Box::new(Unavailable)))
            }
        }
    }
}

/// Backend used when no platform support is compiled in. Every acquisition fails, so the session
/// runs its timers without capture or enforcement.
pub struct Unavailable;

const UNAVAILABLE_MESSAGE: &str = "no event source backend was compiled in";

impl InputHook for Unavailable {
    fn install(&mut self, _mode: HookMode, _sink: InputSink) -> Result<()> {
        Err(anyhow!(UNAVAILABLE_MESSAGE))
    }

    fn remove(&mut self) {}

    fn key_codes(&self) -> KeyCodes {
        KeyCodes::default()
    }
}

impl AppWatcher for Unavailable {
    fn frontmost_app(&mut self) -> Result<Option<ForegroundApp>> {
        Ok(None)
    }

    fn subscribe(&mut self, _sink: ForegroundSink) -> Result<()> {
        Err(anyhow!(UNAVAILABLE_MESSAGE))
    }

    fn unsubscribe(&mut self) {}

    fn activate_self(&mut self) -> Result<()> {
        Err(anyhow!(UNAVAILABLE_MESSAGE))
    }
}
