//! Ownership of the system wide input hook. Only one hook exists at a time and the controller only
//! moves Off -> ObserveOnly -> Off or Off -> BreakLogCapture -> Off.

use std::{collections::BTreeSet, sync::Arc};

use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, error, info, trace, warn};

use crate::event_source::{
    EventSink, HookMode, InputEvent, InputHook, InputKind, KeyCode, Tagged,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    #[default]
    Off,
    ObserveOnly,
    BreakLogCapture,
}

/// A key press swallowed during break capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakKey {
    pub text: Arc<str>,
    pub key_code: KeyCode,
}

pub struct CaptureController {
    mode: CaptureMode,
    hook: Box<dyn InputHook>,
    hook_installed: bool,
    sender: mpsc::Sender<Tagged<InputEvent>>,
    generation: u64,
    active_minutes: BTreeSet<u32>,
    observe_start: Option<Instant>,
}

impl CaptureController {
    pub fn new(hook: Box<dyn InputHook>, sender: mpsc::Sender<Tagged<InputEvent>>) -> Self {
        Self {
            mode: CaptureMode::Off,
            hook,
            hook_installed: false,
            sender,
            generation: 0,
            active_minutes: BTreeSet::new(),
            observe_start: None,
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Minutes since the last ObserveOnly start in which any input was seen.
    pub fn active_minutes(&self) -> &BTreeSet<u32> {
        &self.active_minutes
    }

    pub fn start_observe_only(&mut self, now: Instant) -> bool {
        if self.mode != CaptureMode::Off {
            return false;
        }
        self.active_minutes.clear();
        if !self.acquire(HookMode::ListenOnly) {
            return false;
        }
        self.observe_start = Some(now);
        self.mode = CaptureMode::ObserveOnly;
        info!("Started observe-only capture");
        true
    }

    pub fn stop_observe_only(&mut self) -> bool {
        if self.mode != CaptureMode::ObserveOnly {
            return false;
        }
        self.release();
        self.observe_start = None;
        self.mode = CaptureMode::Off;
        info!(
            "Stopped observe-only capture, active minutes {:?}",
            self.active_minutes
        );
        true
    }

    pub fn start_break_log_capture(&mut self) -> bool {
        if self.mode != CaptureMode::Off {
            return false;
        }
        if !self.acquire(HookMode::Intercept) {
            return false;
        }
        self.mode = CaptureMode::BreakLogCapture;
        info!("Started break log capture");
        true
    }

    pub fn stop_break_log_capture(&mut self) -> bool {
        if self.mode != CaptureMode::BreakLogCapture {
            return false;
        }
        self.release();
        self.mode = CaptureMode::Off;
        info!("Stopped break log capture");
        true
    }

    /// Applies an event drained from the hook queue. Returns the key press to append to the break
    /// log while intercepting; anything else is absorbed here. Activity is bucketed by the moment
    /// the hook observed it, not by when the queue got drained.
    pub fn handle_event(&mut self, tagged: Tagged<InputEvent>) -> Option<BreakKey> {
        if tagged.generation != self.generation || !self.hook_installed {
            trace!("Dropping input event from a previous hook {:?}", tagged);
            return None;
        }
        let Tagged { at, event, .. } = tagged;
        match self.mode {
            CaptureMode::Off => None,
            CaptureMode::ObserveOnly => {
                let start = self.observe_start?;
                let minute = (at.saturating_duration_since(start).as_secs() / 60) as u32;
                if self.active_minutes.insert(minute) {
                    debug!(
                        "Activity detected in minute {minute}, total active: {}",
                        self.active_minutes.len()
                    );
                }
                None
            }
            CaptureMode::BreakLogCapture => match event.kind {
                InputKind::KeyDown => Some(BreakKey {
                    text: event.text.unwrap_or_else(|| "".into()),
                    key_code: event.key_code,
                }),
                _ => None,
            },
        }
    }

    fn acquire(&mut self, mode: HookMode) -> bool {
        if self.hook_installed {
            warn!("Input hook is already installed, refusing {mode:?}");
            return false;
        }
        self.generation += 1;
        let sink = EventSink::new(self.sender.clone(), self.generation);
        match self.hook.install(mode, sink) {
            Ok(()) => {
                self.hook_installed = true;
                true
            }
            Err(e) => {
                error!("Failed to install {mode:?} input hook, continuing without it {e:?}");
                false
            }
        }
    }

    fn release(&mut self) {
        if self.hook_installed {
            self.hook.remove();
            self.hook_installed = false;
        }
    }
}
