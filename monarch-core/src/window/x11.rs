//! X11 window lookup via EWMH.
//!
//! Top-level windows come from `_NET_CLIENT_LIST` on the root window; titles
//! are read from `_NET_WM_NAME`, falling back to `WM_NAME`. Activation is a
//! `_NET_ACTIVE_WINDOW` client message to the window manager plus a raise.

use x11rb::connection::Connection;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ClientMessageEvent, ConfigureWindowAux, ConnectionExt, EventMask, StackMode,
    Window,
};
use x11rb::rust_connection::RustConnection;
use x11rb::CURRENT_TIME;

use super::{WindowHandle, WindowLocator};

/// Longest title read from a window property, in 4-byte units.
const MAX_TITLE_UNITS: u32 = 1024;

#[derive(Debug, thiserror::Error)]
enum X11Error {
    #[error("connect: {0}")]
    Connect(#[from] ConnectError),

    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),

    #[error("reply: {0}")]
    Reply(#[from] ReplyError),
}

struct Atoms {
    net_client_list: Atom,
    net_wm_name: Atom,
    net_active_window: Atom,
    utf8_string: Atom,
}

/// Window locator backed by a connection to the X server in `$DISPLAY`.
pub struct X11WindowLocator {
    conn: RustConnection,
    root: Window,
    atoms: Atoms,
}

impl X11WindowLocator {
    /// Connect to the default display. `None` when no X server is reachable.
    pub fn connect() -> Option<Self> {
        match Self::try_connect() {
            Ok(locator) => Some(locator),
            Err(e) => {
                tracing::debug!(error = %e, "X11 unavailable, window lookup disabled");
                None
            }
        }
    }

    fn try_connect() -> Result<Self, X11Error> {
        let (conn, screen_num) = RustConnection::connect(None)?;
        let root = conn.setup().roots[screen_num].root;

        let atoms = Atoms {
            net_client_list: intern_atom(&conn, "_NET_CLIENT_LIST")?,
            net_wm_name: intern_atom(&conn, "_NET_WM_NAME")?,
            net_active_window: intern_atom(&conn, "_NET_ACTIVE_WINDOW")?,
            utf8_string: intern_atom(&conn, "UTF8_STRING")?,
        };

        Ok(Self { conn, root, atoms })
    }

    fn client_windows(&self) -> Result<Vec<Window>, X11Error> {
        let reply = self
            .conn
            .get_property(
                false,
                self.root,
                self.atoms.net_client_list,
                AtomEnum::WINDOW,
                0,
                u32::MAX,
            )?
            .reply()?;

        Ok(reply.value32().map(|v| v.collect()).unwrap_or_default())
    }

    fn title(&self, window: Window) -> Result<Option<String>, X11Error> {
        let reply = self
            .conn
            .get_property(
                false,
                window,
                self.atoms.net_wm_name,
                self.atoms.utf8_string,
                0,
                MAX_TITLE_UNITS,
            )?
            .reply()?;
        if !reply.value.is_empty() {
            return Ok(Some(String::from_utf8_lossy(&reply.value).into_owned()));
        }

        let reply = self
            .conn
            .get_property(
                false,
                window,
                AtomEnum::WM_NAME,
                AtomEnum::STRING,
                0,
                MAX_TITLE_UNITS,
            )?
            .reply()?;
        if reply.value.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&reply.value).into_owned()))
    }

    fn find(&self, title: &str) -> Result<Option<Window>, X11Error> {
        for window in self.client_windows()? {
            // Windows can vanish mid-scan; skip them.
            if let Ok(Some(name)) = self.title(window) {
                if name == title {
                    return Ok(Some(window));
                }
            }
        }
        Ok(None)
    }

    fn activate(&self, window: Window) -> Result<(), X11Error> {
        // Source indication 1: request from a normal application.
        let event = ClientMessageEvent::new(
            32,
            window,
            self.atoms.net_active_window,
            [1u32, CURRENT_TIME, 0, 0, 0],
        );
        self.conn.send_event(
            false,
            self.root,
            EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
            event,
        )?;
        self.conn.configure_window(
            window,
            &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
        )?;
        self.conn.flush()?;
        Ok(())
    }
}

impl WindowLocator for X11WindowLocator {
    fn find_window(&self, title: &str) -> Option<WindowHandle> {
        match self.find(title) {
            Ok(window) => window.map(|w| WindowHandle(u64::from(w))),
            Err(e) => {
                tracing::debug!(title = %title, error = %e, "X11 window lookup failed");
                None
            }
        }
    }

    fn bring_to_foreground(&self, window: WindowHandle) {
        let Ok(id) = Window::try_from(window.0) else {
            tracing::debug!(window = window.0, "Not an X11 window id");
            return;
        };
        if let Err(e) = self.activate(id) {
            tracing::debug!(window = id, error = %e, "X11 window activation failed");
        }
    }
}

fn intern_atom(conn: &RustConnection, name: &str) -> Result<Atom, X11Error> {
    Ok(conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
}
