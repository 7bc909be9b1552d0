//! X11 backend.
//!
//! - Listen-only capture polls the screensaver idle counter, since core X11 can't observe input
//!   without consuming it.
//! - Intercepting capture holds active keyboard and pointer grabs on the root window, so nothing
//!   reaches other clients while it is installed.
//! - Foreground tracking polls `_NET_ACTIVE_WINDOW`. Self activation targets the terminal window
//!   named by `WINDOWID`.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Result};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, error, info, instrument, warn};
use xcb::{
    screensaver::{QueryInfo, QueryInfoReply},
    x::{self, Atom, Drawable, GetProperty, InternAtom, Window, ATOM_ANY},
    Connection, Xid, XidNew,
};

use super::{
    worker::{StopSignal, Worker},
    AppWatcher, ForegroundApp, ForegroundSink, HookMode, InputEvent, InputHook, InputKind,
    InputSink, KeyCode, KeyCodes,
};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const GRAB_POLL_INTERVAL: Duration = Duration::from_millis(10);
const FOREGROUND_POLL_INTERVAL: Duration = Duration::from_millis(250);

const XK_BACKSPACE: u32 = 0xff08;
const XK_RETURN: u32 = 0xff0d;
const XK_KP_ENTER: u32 = 0xff8d;

/// Evdev key codes of BackSpace and Return.
const X11_KEY_CODES: KeyCodes = KeyCodes {
    delete: 22,
    submit: 36,
};

fn root_window(conn: &Connection, screen: i32) -> Result<Window> {
    conn.get_setup()
        .roots()
        .nth(screen.max(0) as usize)
        .map(|v| v.root())
        .ok_or_else(|| anyhow!("X11 screen {screen} doesn't exist"))
}

fn intern_atom(conn: &Connection, name: &[u8]) -> Result<Atom> {
    let reply = conn.wait_for_reply(conn.send_request(&InternAtom {
        only_if_exists: false,
        name,
    }))?;
    Ok(reply.atom())
}

/// Keyboard mapping snapshot used to turn key presses into text.
struct Keymap {
    min_keycode: u8,
    per_keycode: usize,
    keysyms: Vec<u32>,
}

impl Keymap {
    fn load(conn: &Connection) -> Result<Self> {
        let setup = conn.get_setup();
        let min_keycode = setup.min_keycode();
        let max_keycode = setup.max_keycode();
        let reply = conn.wait_for_reply(conn.send_request(&x::GetKeyboardMapping {
            first_keycode: min_keycode,
            count: max_keycode - min_keycode + 1,
        }))?;
        Ok(Self {
            min_keycode,
            per_keycode: reply.keysyms_per_keycode() as usize,
            keysyms: reply.keysyms().to_vec(),
        })
    }

    fn keysym(&self, keycode: u8, shifted: bool) -> u32 {
        let base = keycode.saturating_sub(self.min_keycode) as usize * self.per_keycode;
        let lookup = |column: usize| self.keysyms.get(base + column).copied().unwrap_or(0);
        if shifted && self.per_keycode > 1 && lookup(1) != 0 {
            lookup(1)
        } else {
            lookup(0)
        }
    }
}

fn keysym_char(keysym: u32) -> Option<char> {
    match keysym {
        0x20..=0x7e | 0xa0..=0xff => char::from_u32(keysym),
        0x0100_0000..=0x0110_ffff => char::from_u32(keysym - 0x0100_0000),
        _ => None,
    }
}

fn translate(keymap: &Keymap, event: xcb::Event) -> Option<InputEvent> {
    let xcb::Event::X(event) = event else {
        return None;
    };
    match event {
        x::Event::KeyPress(ev) => {
            let shifted = ev.state().contains(x::KeyButMask::SHIFT);
            let keysym = keymap.keysym(ev.detail(), shifted);
            let key_code = match keysym {
                XK_BACKSPACE => X11_KEY_CODES.delete,
                XK_RETURN | XK_KP_ENTER => X11_KEY_CODES.submit,
                _ => ev.detail() as KeyCode,
            };
            let text = keysym_char(keysym).map(|c| c.to_string());
            Some(InputEvent::key_down(text.as_deref(), key_code))
        }
        x::Event::KeyRelease(ev) => Some(InputEvent {
            kind: InputKind::KeyUp,
            text: None,
            key_code: ev.detail() as KeyCode,
        }),
        // Buttons 4 to 7 are wheel steps.
        x::Event::ButtonPress(ev) if (4..=7).contains(&ev.detail()) => {
            Some(InputEvent::other(InputKind::Scroll))
        }
        x::Event::ButtonPress(_) => Some(InputEvent::other(InputKind::PointerDown)),
        x::Event::ButtonRelease(ev) if (4..=7).contains(&ev.detail()) => None,
        x::Event::ButtonRelease(_) => Some(InputEvent::other(InputKind::PointerUp)),
        x::Event::MotionNotify(_) => Some(InputEvent::other(InputKind::PointerMoved)),
        _ => None,
    }
}

fn idle_ms(conn: &Connection, root: Window) -> Result<u32> {
    let cookie = conn.send_request(&QueryInfo {
        drawable: Drawable::Window(root),
    });
    let reply: QueryInfoReply = conn.wait_for_reply(cookie)?;
    Ok(reply.ms_since_user_input())
}

fn run_idle_watch(conn: Connection, root: Window, sink: InputSink, stop: StopSignal) {
    let poll_ms = IDLE_POLL_INTERVAL.as_millis() as u32;
    while !stop.wait(IDLE_POLL_INTERVAL) {
        match idle_ms(&conn, root) {
            Ok(idle) if idle <= poll_ms => sink.push(InputEvent::other(InputKind::Activity)),
            Ok(_) => {}
            Err(e) => {
                error!("Lost X11 connection while observing input {e:?}");
                return;
            }
        }
    }
}

fn run_grab(conn: Connection, keymap: Keymap, sink: InputSink, stop: StopSignal) {
    while !stop.is_stopped() {
        match conn.poll_for_event() {
            Ok(Some(event)) => {
                if let Some(input) = translate(&keymap, event) {
                    sink.push(input);
                }
            }
            Ok(None) => {
                if stop.wait(GRAB_POLL_INTERVAL) {
                    break;
                }
            }
            Err(e) => {
                error!("Lost X11 connection while capturing input {e:?}");
                return;
            }
        }
    }
    conn.send_request(&x::UngrabKeyboard {
        time: x::CURRENT_TIME,
    });
    conn.send_request(&x::UngrabPointer {
        time: x::CURRENT_TIME,
    });
    if let Err(e) = conn.flush() {
        warn!("Failed to release X11 grabs {e:?}");
    }
}

/// Pointer events delivered while the grab is held. Motion is never requested.
fn grab_event_mask() -> x::EventMask {
    x::EventMask::BUTTON_PRESS | x::EventMask::BUTTON_RELEASE
}

fn grab_input(conn: &Connection, root: Window) -> Result<()> {
    let keyboard = conn.wait_for_reply(conn.send_request(&x::GrabKeyboard {
        owner_events: false,
        grab_window: root,
        time: x::CURRENT_TIME,
        pointer_mode: x::GrabMode::Async,
        keyboard_mode: x::GrabMode::Async,
    }))?;
    if keyboard.status() != x::GrabStatus::Success {
        bail!("Keyboard grab was refused: {:?}", keyboard.status());
    }

    let pointer = conn.wait_for_reply(conn.send_request(&x::GrabPointer {
        owner_events: false,
        grab_window: root,
        event_mask: grab_event_mask(),
        pointer_mode: x::GrabMode::Async,
        keyboard_mode: x::GrabMode::Async,
        confine_to: Window::none(),
        cursor: x::Cursor::none(),
        time: x::CURRENT_TIME,
    }))?;
    if pointer.status() != x::GrabStatus::Success {
        conn.send_request(&x::UngrabKeyboard {
            time: x::CURRENT_TIME,
        });
        conn.flush()?;
        bail!("Pointer grab was refused: {:?}", pointer.status());
    }
    Ok(())
}

#[derive(Default)]
pub struct X11InputHook {
    worker: Option<Worker>,
}

impl X11InputHook {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InputHook for X11InputHook {
    #[instrument(skip(self, sink))]
    fn install(&mut self, mode: HookMode, sink: InputSink) -> Result<()> {
        if self.worker.is_some() {
            bail!("X11 input hook is already installed");
        }
        let worker = match mode {
            HookMode::ListenOnly => {
                let (conn, screen) = Connection::connect_with_extensions(
                    None,
                    &[xcb::Extension::ScreenSaver],
                    &[],
                )?;
                let root = root_window(&conn, screen)?;
                Worker::spawn("x11-idle-watch", move |stop| {
                    run_idle_watch(conn, root, sink, stop)
                })?
            }
            HookMode::Intercept => {
                let (conn, screen) = Connection::connect(None)?;
                let root = root_window(&conn, screen)?;
                let keymap = Keymap::load(&conn)?;
                grab_input(&conn, root)?;
                Worker::spawn("x11-grab", move |stop| run_grab(conn, keymap, sink, stop))?
            }
        };
        info!("Installed X11 input hook");
        self.worker = Some(worker);
        Ok(())
    }

    fn remove(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
            info!("Removed X11 input hook");
        }
    }

    fn key_codes(&self) -> KeyCodes {
        X11_KEY_CODES
    }
}

impl Drop for X11InputHook {
    fn drop(&mut self) {
        self.remove();
    }
}

#[derive(Clone, Copy)]
struct Atoms {
    active_window: Atom,
    pid: Atom,
}

fn get_active_window(conn: &Connection, root: Window, atoms: Atoms) -> Result<Option<Window>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window: root,
        property: atoms.active_window,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    Ok(result
        .value::<Window>()
        .first()
        .copied()
        .filter(|v| !v.is_none()))
}

fn get_pid(conn: &Connection, window: Window, atoms: Atoms) -> Result<Option<u32>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window,
        property: atoms.pid,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    Ok(result.value::<u32>().first().copied())
}

fn get_process_name(id: u32) -> Option<String> {
    let pid = Pid::from_u32(id);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .map(|v| v.name().to_string_lossy().into_owned())
}

fn describe_window(
    conn: &Connection,
    window: Window,
    atoms: Atoms,
    own_window: Option<Window>,
) -> Result<ForegroundApp> {
    let app_name = get_pid(conn, window, atoms)?
        .and_then(get_process_name)
        .unwrap_or_else(|| "Unknown".into());
    Ok(ForegroundApp {
        app_name: app_name.into(),
        is_self: own_window == Some(window),
    })
}

fn run_foreground_watch(
    conn: Arc<Connection>,
    root: Window,
    atoms: Atoms,
    own_window: Option<Window>,
    sink: ForegroundSink,
    stop: StopSignal,
) {
    let mut last = get_active_window(&conn, root, atoms).ok().flatten();
    while !stop.wait(FOREGROUND_POLL_INTERVAL) {
        let current = match get_active_window(&conn, root, atoms) {
            Ok(v) => v,
            Err(e) => {
                error!("Lost X11 connection while tracking the foreground {e:?}");
                return;
            }
        };
        if current == last {
            continue;
        }
        last = current;
        let Some(window) = current else {
            continue;
        };
        match describe_window(&conn, window, atoms, own_window) {
            Ok(app) => {
                debug!("Foreground changed to {}", app.app_name);
                sink.push(app)
            }
            Err(e) => warn!("Failed to describe window {window:?}: {e:?}"),
        }
    }
}

pub struct X11AppWatcher {
    conn: Arc<Connection>,
    root: Window,
    atoms: Atoms,
    own_window: Option<Window>,
    worker: Option<Worker>,
}

impl X11AppWatcher {
    pub fn new() -> Result<Self> {
        let (conn, screen) = Connection::connect(None)?;
        let root = root_window(&conn, screen)?;
        let atoms = Atoms {
            active_window: intern_atom(&conn, b"_NET_ACTIVE_WINDOW")?,
            pid: intern_atom(&conn, b"_NET_WM_PID")?,
        };
        let own_window = std::env::var("WINDOWID")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            // SAFETY: the id comes from the terminal emulator that started us. A stale id only
            // makes X requests fail, it can't corrupt the connection.
            .map(|id| unsafe { Window::new(id) });
        if own_window.is_none() {
            warn!("WINDOWID is not set, focus reassertion won't be possible");
        }
        Ok(Self {
            conn: Arc::new(conn),
            root,
            atoms,
            own_window,
            worker: None,
        })
    }
}

impl AppWatcher for X11AppWatcher {
    #[instrument(skip(self))]
    fn frontmost_app(&mut self) -> Result<Option<ForegroundApp>> {
        let Some(window) = get_active_window(&self.conn, self.root, self.atoms)? else {
            return Ok(None);
        };
        describe_window(&self.conn, window, self.atoms, self.own_window).map(Some)
    }

    #[instrument(skip(self, sink))]
    fn subscribe(&mut self, sink: ForegroundSink) -> Result<()> {
        if self.worker.is_some() {
            bail!("Foreground watch is already running");
        }
        let conn = self.conn.clone();
        let (root, atoms, own_window) = (self.root, self.atoms, self.own_window);
        self.worker = Some(Worker::spawn("x11-foreground-watch", move |stop| {
            run_foreground_watch(conn, root, atoms, own_window, sink, stop)
        })?);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }

    #[instrument(skip(self))]
    fn activate_self(&mut self) -> Result<()> {
        let Some(window) = self.own_window else {
            bail!("Terminal window is unknown");
        };
        // Source indication 1 marks the request as coming from a regular application.
        let event = x::ClientMessageEvent::new(
            window,
            self.atoms.active_window,
            x::ClientMessageData::Data32([1, x::CURRENT_TIME, 0, 0, 0]),
        );
        self.conn.send_request(&x::SendEvent {
            propagate: false,
            destination: x::SendEventDest::Window(self.root),
            event_mask: x::EventMask::SUBSTRUCTURE_NOTIFY | x::EventMask::SUBSTRUCTURE_REDIRECT,
            event: &event,
        });
        self.conn.flush()?;
        Ok(())
    }
}

impl Drop for X11AppWatcher {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use xcb::x;

    use super::{grab_event_mask, keysym_char};

    #[test]
    fn pointer_grab_skips_motion() {
        let mask = grab_event_mask();

        assert!(mask.contains(x::EventMask::BUTTON_PRESS | x::EventMask::BUTTON_RELEASE));
        assert!(!mask.intersects(x::EventMask::POINTER_MOTION | x::EventMask::BUTTON_MOTION));
    }

    #[test]
    fn keysyms_map_to_text() {
        assert_eq!(keysym_char(0x61), Some('a'));
        assert_eq!(keysym_char(0xe9), Some('é'));
        assert_eq!(keysym_char(0x0100_20ac), Some('€'));
        assert_eq!(keysym_char(0xff08), None);
    }
}
