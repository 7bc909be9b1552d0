//! Foreground policy. Either records which application is frontmost (coding) or keeps pulling this
//! process back to the front (break and idle).
//!
//! Reassertion is best effort: the window manager may still let another application hold focus
//! for the length of the debounce delay.

pub mod debounce;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use debounce::Debouncer;
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, error, info, trace, warn};

use crate::event_source::{AppWatcher, EventSink, ForegroundApp, Tagged};

pub const DEFAULT_REASSERTION_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnforcementMode {
    #[default]
    Off,
    OnlyTrackActiveApp,
    EnforceAppFocus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppActivationEvent {
    pub app_name: Arc<str>,
    pub timestamp: DateTime<Utc>,
}

pub struct FocusController {
    mode: EnforcementMode,
    watcher: Box<dyn AppWatcher>,
    subscribed: bool,
    sender: mpsc::Sender<Tagged<ForegroundApp>>,
    generation: u64,
    activations: Vec<AppActivationEvent>,
    reassertion: Debouncer,
}

impl FocusController {
    pub fn new(
        watcher: Box<dyn AppWatcher>,
        sender: mpsc::Sender<Tagged<ForegroundApp>>,
        reassertion_delay: Duration,
    ) -> Self {
        Self {
            mode: EnforcementMode::Off,
            watcher,
            subscribed: false,
            sender,
            generation: 0,
            activations: vec![],
            reassertion: Debouncer::new(reassertion_delay),
        }
    }

    pub fn mode(&self) -> EnforcementMode {
        self.mode
    }

    /// Activations recorded since the last OnlyTrackActiveApp start, in arrival order.
    pub fn activations(&self) -> &[AppActivationEvent] {
        &self.activations
    }

    pub fn start_only_track_active_app(&mut self, time: DateTime<Utc>) -> bool {
        if self.mode != EnforcementMode::Off {
            return false;
        }
        self.activations.clear();
        if !self.subscribe() {
            return false;
        }
        match self.watcher.frontmost_app() {
            Ok(Some(app)) => self.record(app, time),
            Ok(None) => debug!("No frontmost application to record"),
            Err(e) => warn!("Failed to query the frontmost application {e:?}"),
        }
        self.mode = EnforcementMode::OnlyTrackActiveApp;
        info!("Started tracking the active application");
        true
    }

    pub fn stop_only_track_active_app(&mut self) -> bool {
        if self.mode != EnforcementMode::OnlyTrackActiveApp {
            return false;
        }
        self.unsubscribe();
        self.mode = EnforcementMode::Off;
        info!(
            "Stopped tracking the active application after {} activations",
            self.activations.len()
        );
        true
    }

    pub fn start_enforce_app_focus(&mut self, now: Instant) -> bool {
        if self.mode != EnforcementMode::Off {
            return false;
        }
        if !self.subscribe() {
            return false;
        }
        self.mode = EnforcementMode::EnforceAppFocus;
        info!("Started enforcing application focus");
        self.schedule_reassertion(now, "enforcement started");
        true
    }

    pub fn stop_enforce_app_focus(&mut self) -> bool {
        if self.mode != EnforcementMode::EnforceAppFocus {
            return false;
        }
        self.unsubscribe();
        self.reassertion.cancel();
        self.mode = EnforcementMode::Off;
        info!("Stopped enforcing application focus");
        true
    }

    pub fn handle_foreground(
        &mut self,
        tagged: Tagged<ForegroundApp>,
        time: DateTime<Utc>,
        now: Instant,
    ) {
        if tagged.generation != self.generation || !self.subscribed {
            trace!("Dropping foreground event from a previous subscription");
            return;
        }
        let app = tagged.event;
        match self.mode {
            EnforcementMode::Off => {}
            EnforcementMode::OnlyTrackActiveApp => {
                debug!("App activated: {}", app.app_name);
                self.record(app, time);
            }
            // Our own activation would otherwise schedule another reassertion forever.
            EnforcementMode::EnforceAppFocus if app.is_self => {
                trace!("Ignoring self activation");
            }
            EnforcementMode::EnforceAppFocus => {
                self.schedule_reassertion(now, &app.app_name);
            }
        }
    }

    pub fn reassertion_deadline(&self) -> Option<Instant> {
        self.reassertion.deadline()
    }

    pub fn reassertion_pending(&self) -> bool {
        self.reassertion.is_pending()
    }

    /// Fires the pending reassertion if its delay has elapsed.
    pub fn fire_due_reassertion(&mut self, now: Instant) {
        if self.reassertion.take_due(now) {
            self.bring_to_front();
        }
    }

    pub fn bring_to_front(&mut self) {
        debug!("Bringing this process to the foreground");
        if let Err(e) = self.watcher.activate_self() {
            warn!("Failed to activate self {e:?}");
        }
    }

    fn schedule_reassertion(&mut self, now: Instant, reason: &str) {
        if self.reassertion.schedule(now) {
            debug!("Scheduled focus reassertion ({reason})");
        } else {
            trace!("Focus reassertion already scheduled ({reason})");
        }
    }

    fn record(&mut self, app: ForegroundApp, time: DateTime<Utc>) {
        self.activations.push(AppActivationEvent {
            app_name: app.app_name,
            timestamp: time,
        });
    }

    fn subscribe(&mut self) -> bool {
        if self.subscribed {
            warn!("Activation subscription already exists");
            return false;
        }
        self.generation += 1;
        let sink = EventSink::new(self.sender.clone(), self.generation);
        match self.watcher.subscribe(sink) {
            Ok(()) => {
                self.subscribed = true;
                true
            }
            Err(e) => {
                error!("Failed to subscribe to activations, continuing without them {e:?}");
                false
            }
        }
    }

    fn unsubscribe(&mut self) {
        if self.subscribed {
            self.watcher.unsubscribe();
            self.subscribed = false;
        }
    }
}
