//! Top level phase machine. Idle -> Coding -> Break -> Idle, with the capture and focus controllers
//! switched at every edge.
//!
//! [Session] is owned by a single task ([runtime::SessionRuntime]) that also drains the event
//! queues of both controllers, so nothing in here is ever touched concurrently. Guard failures are
//! silent no-ops: they are only reachable through a stale or impatient user interface.

pub mod block;
pub mod runtime;
pub mod shutdown;
pub mod status;

use std::{mem, sync::Arc, time::Duration};

use block::CodingBlock;
use chrono::{DateTime, Utc};
use status::{PhaseKind, RaiseWindow, StatusSnapshot};
use tokio::{
    sync::{broadcast, mpsc, watch},
    time::Instant,
};
use tracing::{debug, info, trace};

use crate::{
    attribution::CodingActivity,
    capture::{CaptureController, CaptureMode},
    event_source::{AppWatcher, ForegroundApp, InputEvent, InputHook, KeyCode, KeyCodes, Tagged},
    focus::{EnforcementMode, FocusController, DEFAULT_REASSERTION_DELAY},
    storage::{history::History, preferences::KeyValueStore},
    utils::clock::{elapsed_seconds, Clock},
};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Coding(CodingBlock),
    Break(CodingBlock),
}

impl SessionPhase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            SessionPhase::Idle => PhaseKind::Idle,
            SessionPhase::Coding(_) => PhaseKind::Coding,
            SessionPhase::Break(_) => PhaseKind::Break,
        }
    }

    pub fn block(&self) -> Option<&CodingBlock> {
        match self {
            SessionPhase::Idle => None,
            SessionPhase::Coding(block) | SessionPhase::Break(block) => Some(block),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub tick_interval: Duration,
    pub reassertion_delay: Duration,
    pub key_codes: KeyCodes,
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            reassertion_delay: DEFAULT_REASSERTION_DELAY,
            key_codes: KeyCodes::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Requests handled in order on the owner task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    StartBlock {
        intention: String,
        exercises_acknowledged: bool,
        coding_seconds: u64,
        break_seconds: u64,
    },
    FinishCodingEarly,
    ClearHistory,
}

/// Receiving ends of the controller queues, drained by the owner loop.
pub struct EventQueues {
    pub input: mpsc::Receiver<Tagged<InputEvent>>,
    pub foreground: mpsc::Receiver<Tagged<ForegroundApp>>,
}

pub struct Session<S> {
    phase: SessionPhase,
    capture: CaptureController,
    focus: FocusController,
    history: History<S>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    remaining_seconds: u64,
    next_tick: Option<Instant>,
    coding_start: Option<DateTime<Utc>>,
    break_start: Option<DateTime<Utc>>,
    status: watch::Sender<StatusSnapshot>,
    raise: broadcast::Sender<RaiseWindow>,
}

impl<S: KeyValueStore> Session<S> {
    /// Creates an idle session. Focus enforcement starts right away so the application is pinned
    /// to the foreground before any block is planned.
    pub fn new(
        hook: Box<dyn InputHook>,
        watcher: Box<dyn AppWatcher>,
        history: History<S>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> (Self, EventQueues) {
        let (input_tx, input_rx) = mpsc::channel(config.queue_capacity);
        let (foreground_tx, foreground_rx) = mpsc::channel(config.queue_capacity);
        let (status, _) = watch::channel(StatusSnapshot::default());
        let (raise, _) = broadcast::channel(4);

        let mut session = Self {
            phase: SessionPhase::Idle,
            capture: CaptureController::new(hook, input_tx),
            focus: FocusController::new(watcher, foreground_tx, config.reassertion_delay),
            history,
            clock,
            config,
            remaining_seconds: 0,
            next_tick: None,
            coding_start: None,
            break_start: None,
            status,
            raise,
        };
        session.focus.start_enforce_app_focus(session.clock.instant());

        let queues = EventQueues {
            input: input_rx,
            foreground: foreground_rx,
        };
        (session, queues)
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_seconds
    }

    pub fn history(&self) -> &[CodingBlock] {
        self.history.blocks()
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.capture.mode()
    }

    pub fn enforcement_mode(&self) -> EnforcementMode {
        self.focus.mode()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    pub fn subscribe_raise(&self) -> broadcast::Receiver<RaiseWindow> {
        self.raise.subscribe()
    }

    /// Earliest instant at which [Session::on_deadline] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.next_tick, self.focus.reassertion_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn start_block(
        &mut self,
        intention: &str,
        exercises_acknowledged: bool,
        coding_seconds: u64,
        break_seconds: u64,
    ) -> bool {
        if intention.is_empty() || !exercises_acknowledged {
            debug!("Block plan is incomplete, not starting");
            return false;
        }
        if self.phase != SessionPhase::Idle {
            debug!("A block is already running, not starting another");
            return false;
        }

        self.focus.stop_enforce_app_focus();
        let block = CodingBlock::new(intention, coding_seconds, break_seconds);
        info!(
            "Starting block {} for {coding_seconds}s coding and {break_seconds}s break",
            block.id()
        );
        self.phase = SessionPhase::Coding(block);
        self.remaining_seconds = coding_seconds;

        let now = self.clock.instant();
        let time = self.clock.time();
        self.next_tick = Some(now + self.config.tick_interval);
        self.coding_start = Some(time);
        self.capture.start_observe_only(now);
        self.focus.start_only_track_active_app(time);
        self.publish();
        true
    }

    /// Ends coding, either when the timer runs out or when the user is done early.
    pub fn coding_to_break(&mut self) {
        let mut block = match mem::replace(&mut self.phase, SessionPhase::Idle) {
            SessionPhase::Coding(block) => block,
            other => {
                trace!("Not coding, ignoring transition to break");
                self.phase = other;
                return;
            }
        };

        let now = self.clock.instant();
        let time = self.clock.time();
        let start = self.coding_start.unwrap_or(time);
        let elapsed = elapsed_seconds(start, time);
        let activity = CodingActivity::collect(
            self.focus.activations(),
            self.capture.active_minutes(),
            start,
            elapsed,
        );
        info!("Coding finished after {elapsed}s\n{}", activity.summary());
        block.finish_coding(elapsed, activity);

        self.capture.stop_observe_only();
        self.focus.stop_only_track_active_app();

        self.remaining_seconds = block.planned_break_duration();
        self.phase = SessionPhase::Break(block);
        self.break_start = Some(time);
        self.raise_window();
        self.capture.start_break_log_capture();
        self.focus.start_enforce_app_focus(now);
        self.next_tick = Some(now + self.config.tick_interval);
        self.publish();
    }

    /// Applies a key press swallowed during the break to the reflection text.
    pub fn handle_break_input(&mut self, text: &str, key_code: KeyCode) {
        let SessionPhase::Break(block) = &mut self.phase else {
            trace!("Not on a break, ignoring break input");
            return;
        };
        let key_codes = self.config.key_codes;
        if key_code == key_codes.delete {
            block.pop_reflection();
        } else if key_code == key_codes.submit {
            block.push_reflection("\n");
        } else if !text.is_empty() {
            block.push_reflection(text);
        } else {
            return;
        }
        self.publish();
    }

    pub async fn break_to_complete(&mut self) {
        let mut block = match mem::replace(&mut self.phase, SessionPhase::Idle) {
            SessionPhase::Break(block) => block,
            other => {
                trace!("Not on a break, ignoring completion");
                self.phase = other;
                return;
            }
        };

        let time = self.clock.time();
        let elapsed = elapsed_seconds(self.break_start.unwrap_or(time), time);
        block.finish_break(elapsed, time);
        info!("Block {} completed after a {elapsed}s break", block.id());
        self.history.prepend(block).await;

        self.capture.stop_break_log_capture();
        self.focus.stop_enforce_app_focus();
        self.next_tick = None;
        self.remaining_seconds = 0;
        self.coding_start = None;
        self.break_start = None;
        self.focus.start_enforce_app_focus(self.clock.instant());
        self.publish();
    }

    pub async fn clear_history(&mut self) {
        info!("Clearing {} completed blocks", self.history.blocks().len());
        self.history.clear().await;
    }

    pub async fn handle_command(&mut self, command: SessionCommand) {
        debug!("Handling {command:?}");
        match command {
            SessionCommand::StartBlock {
                intention,
                exercises_acknowledged,
                coding_seconds,
                break_seconds,
            } => {
                self.start_block(
                    &intention,
                    exercises_acknowledged,
                    coding_seconds,
                    break_seconds,
                );
            }
            SessionCommand::FinishCodingEarly => self.coding_to_break(),
            SessionCommand::ClearHistory => self.clear_history().await,
        }
    }

    pub fn handle_input(&mut self, tagged: Tagged<InputEvent>) {
        if let Some(key) = self.capture.handle_event(tagged) {
            self.handle_break_input(&key.text, key.key_code);
        }
    }

    pub fn handle_foreground(&mut self, tagged: Tagged<ForegroundApp>) {
        let time = self.clock.time();
        let now = self.clock.instant();
        self.focus.handle_foreground(tagged, time, now);
    }

    /// Runs whatever timer is due: the pending focus reassertion and at most one tick.
    pub async fn on_deadline(&mut self) {
        let now = self.clock.instant();
        self.focus.fire_due_reassertion(now);
        if let Some(due) = self.next_tick.filter(|v| *v <= now) {
            self.next_tick = Some(due + self.config.tick_interval);
            self.tick().await;
        }
    }

    /// Releases the hook and the activation subscription, whatever the phase.
    pub fn release(&mut self) {
        self.capture.stop_observe_only();
        self.capture.stop_break_log_capture();
        self.focus.stop_only_track_active_app();
        self.focus.stop_enforce_app_focus();
        self.next_tick = None;
    }

    async fn tick(&mut self) {
        if self.phase == SessionPhase::Idle {
            self.next_tick = None;
            return;
        }
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        trace!("Tick, {}s remaining", self.remaining_seconds);
        if self.remaining_seconds > 0 {
            self.publish();
            return;
        }
        match self.phase.kind() {
            PhaseKind::Coding => self.coding_to_break(),
            PhaseKind::Break => self.break_to_complete().await,
            PhaseKind::Idle => {}
        }
    }

    fn raise_window(&mut self) {
        if self.raise.send(RaiseWindow).is_err() {
            debug!("Nobody is listening for window raise requests");
        }
        self.focus.bring_to_front();
    }

    fn publish(&self) {
        self.status.send_replace(StatusSnapshot {
            phase: self.phase.kind(),
            remaining_seconds: self.remaining_seconds,
            active_block: self.phase.block().cloned(),
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use tokio::time::advance;

    use super::{EventQueues, Session, SessionCommand, SessionConfig, SessionPhase};
    use crate::{
        capture::{tests::permissive_hook, CaptureMode},
        event_source::{
            HookMode, InputEvent, InputKind, InputSink, KeyCodes, MockAppWatcher, MockInputHook,
        },
        focus::{tests::permissive_watcher, EnforcementMode},
        session::status::PhaseKind,
        storage::{history::History, preferences::memory::MemoryStore},
        utils::{
            clock::test_clock::TestClock,
            logging::TEST_LOGGING,
        },
    };

    pub(crate) type TestSession = Session<Arc<MemoryStore>>;

    pub(crate) async fn session_with(
        hook: MockInputHook,
        watcher: MockAppWatcher,
    ) -> (TestSession, EventQueues, Arc<MemoryStore>) {
        *TEST_LOGGING;
        let store = Arc::new(MemoryStore::default());
        let history = History::load(store.clone()).await;
        let (session, queues) = Session::new(
            Box::new(hook),
            Box::new(watcher),
            history,
            Arc::new(TestClock::new()),
            SessionConfig::default(),
        );
        (session, queues, store)
    }

    async fn permissive_session() -> TestSession {
        session_with(permissive_hook(), permissive_watcher("Terminal"))
            .await
            .0
    }

    /// Hook that hands every installed sink to the test.
    fn recording_hook(sinks: Arc<Mutex<Vec<(HookMode, InputSink)>>>) -> MockInputHook {
        let mut hook = MockInputHook::new();
        hook.expect_install().returning(move |mode, sink| {
            sinks.lock().unwrap().push((mode, sink));
            Ok(())
        });
        hook.expect_remove().return_const(());
        hook.expect_key_codes().return_const(KeyCodes::default());
        hook
    }

    async fn run_ticks(session: &mut TestSession, count: u64) {
        for _ in 0..count {
            advance(Duration::from_secs(1)).await;
            session.on_deadline().await;
        }
    }

    fn reflection(session: &TestSession) -> String {
        session
            .phase()
            .block()
            .map(|v| v.actual_description().to_owned())
            .unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_enforces_focus() {
        let session = permissive_session().await;

        assert_eq!(session.phase(), &SessionPhase::Idle);
        assert_eq!(session.enforcement_mode(), EnforcementMode::EnforceAppFocus);
        assert_eq!(session.capture_mode(), CaptureMode::Off);
        assert!(session.next_deadline().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn full_block_runs_through_every_phase() {
        let mut session = permissive_session().await;

        assert!(session.start_block("fix bug", true, 1500, 300));
        assert_eq!(session.phase().kind(), PhaseKind::Coding);
        assert_eq!(session.remaining_seconds(), 1500);
        assert_eq!(session.capture_mode(), CaptureMode::ObserveOnly);
        assert_eq!(
            session.enforcement_mode(),
            EnforcementMode::OnlyTrackActiveApp
        );

        run_ticks(&mut session, 1500).await;
        assert_eq!(session.phase().kind(), PhaseKind::Break);
        assert_eq!(session.remaining_seconds(), 300);
        assert_eq!(session.capture_mode(), CaptureMode::BreakLogCapture);
        assert_eq!(session.enforcement_mode(), EnforcementMode::EnforceAppFocus);
        let block = session.phase().block().unwrap();
        assert_eq!(block.actual_coding_duration(), 1500);
        assert_eq!(block.total_minutes(), 25);

        run_ticks(&mut session, 300).await;
        assert_eq!(session.phase(), &SessionPhase::Idle);
        assert_eq!(session.capture_mode(), CaptureMode::Off);
        assert_eq!(session.enforcement_mode(), EnforcementMode::EnforceAppFocus);
        assert_eq!(session.history().len(), 1);
        let done = &session.history()[0];
        assert_eq!(done.intended_description(), "fix bug");
        assert_eq!(done.actual_break_duration(), 300);
        assert!(done.completed_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn incomplete_plans_are_ignored() {
        let mut session = permissive_session().await;

        assert!(!session.start_block("", true, 60, 60));
        assert!(!session.start_block("fix bug", false, 60, 60));
        assert_eq!(session.phase(), &SessionPhase::Idle);
        assert_eq!(session.enforcement_mode(), EnforcementMode::EnforceAppFocus);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_block_at_a_time() {
        let mut session = permissive_session().await;
        session.start_block("first", true, 60, 60);
        let first = session.phase().block().unwrap().id();

        assert!(!session.start_block("second", true, 60, 60));
        assert_eq!(session.phase().block().unwrap().id(), first);
        assert_eq!(session.remaining_seconds(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_outside_their_phase_do_nothing() {
        let mut session = permissive_session().await;

        session.coding_to_break();
        session.break_to_complete().await;
        session.handle_break_input("x", 0);

        assert_eq!(session.phase(), &SessionPhase::Idle);
        assert!(session.history().is_empty());

        session.start_block("fix bug", true, 60, 60);
        session.break_to_complete().await;
        session.handle_break_input("x", 0);
        assert_eq!(session.phase().kind(), PhaseKind::Coding);
        assert_eq!(reflection(&session), "");
    }

    #[tokio::test(start_paused = true)]
    async fn finishing_early_measures_elapsed_time() {
        let mut session = permissive_session().await;
        session.start_block("fix bug", true, 900, 300);

        run_ticks(&mut session, 130).await;
        session
            .handle_command(SessionCommand::FinishCodingEarly)
            .await;

        assert_eq!(session.phase().kind(), PhaseKind::Break);
        assert_eq!(session.remaining_seconds(), 300);
        let block = session.phase().block().unwrap();
        assert_eq!(block.actual_coding_duration(), 130);
        assert_eq!(block.total_minutes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn break_keys_edit_reflection() {
        let mut session = permissive_session().await;
        session.start_block("fix bug", true, 60, 60);
        session.coding_to_break();
        let codes = KeyCodes::default();

        session.handle_break_input("", codes.delete);
        assert_eq!(reflection(&session), "");

        session.handle_break_input("o", 31);
        session.handle_break_input("k", 40);
        session.handle_break_input("\r", codes.submit);
        session.handle_break_input("", 123);
        session.handle_break_input("x", 7);
        session.handle_break_input("", codes.delete);
        assert_eq!(reflection(&session), "ok\n");
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_history_leaves_phase_alone() {
        let mut session = permissive_session().await;
        session.start_block("first", true, 60, 60);
        run_ticks(&mut session, 120).await;
        assert_eq!(session.history().len(), 1);

        session.start_block("second", true, 60, 60);
        session.handle_command(SessionCommand::ClearHistory).await;

        assert!(session.history().is_empty());
        assert_eq!(session.phase().kind(), PhaseKind::Coding);
        assert_eq!(session.remaining_seconds(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn coding_activity_is_attributed_at_break() {
        let sinks = Arc::new(Mutex::new(vec![]));
        let (mut session, mut queues, _) =
            session_with(recording_hook(sinks.clone()), permissive_watcher("Editor")).await;
        session.start_block("fix bug", true, 900, 60);
        let (mode, sink) = sinks.lock().unwrap()[0].clone();
        assert_eq!(mode, HookMode::ListenOnly);

        for offset in [10, 60] {
            run_ticks(&mut session, offset).await;
            sink.push(InputEvent::other(InputKind::PointerMoved));
            session.handle_input(queues.input.try_recv().unwrap());
        }
        session.coding_to_break();

        let block = session.phase().block().unwrap();
        assert_eq!(block.total_active_minutes(), 2);
        assert_eq!(block.app_activity().len(), 1);
        assert_eq!(block.app_activity()[0].app_name, "Editor");
        assert_eq!(block.app_activity()[0].active_minutes, 2);

        // Leftovers of the observe hook must not reach the reflection.
        sink.push(InputEvent::key_down(Some("z"), 6));
        session.handle_input(queues.input.try_recv().unwrap());
        assert_eq!(reflection(&session), "");

        let (mode, intercept) = sinks.lock().unwrap()[1].clone();
        assert_eq!(mode, HookMode::Intercept);
        intercept.push(InputEvent::key_down(Some("a"), 0));
        session.handle_input(queues.input.try_recv().unwrap());
        assert_eq!(reflection(&session), "a");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_permissions_still_run_the_timers() {
        let mut hook = MockInputHook::new();
        hook.expect_install()
            .returning(|_, _| Err(anyhow::anyhow!("not trusted")));
        hook.expect_key_codes().return_const(KeyCodes::default());
        let mut watcher = MockAppWatcher::new();
        watcher
            .expect_subscribe()
            .returning(|_| Err(anyhow::anyhow!("not trusted")));
        watcher
            .expect_activate_self()
            .returning(|| Err(anyhow::anyhow!("not trusted")));
        let (mut session, _queues, store) = session_with(hook, watcher).await;

        session.start_block("fix bug", true, 60, 60);
        run_ticks(&mut session, 120).await;

        assert_eq!(session.phase(), &SessionPhase::Idle);
        assert_eq!(session.capture_mode(), CaptureMode::Off);
        assert_eq!(session.enforcement_mode(), EnforcementMode::Off);
        let completed = &session.history()[0];
        assert!(completed.app_activity().is_empty());
        assert!(store.raw("completedBlocks").is_some());
    }
}
