// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Window lookup seam used by the follower fast path.
//!
//! The core never creates windows. It only asks whether a window with the
//! well-known title exists and, if so, raises it.

#[cfg(feature = "x11")]
mod x11;

#[cfg(feature = "x11")]
pub use self::x11::X11WindowLocator;

/// Opaque handle to a top-level window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

/// Finds windows by title and brings them to the foreground.
pub trait WindowLocator {
    /// Look up a top-level window whose title equals `title`.
    fn find_window(&self, title: &str) -> Option<WindowHandle>;

    /// Raise and focus `window`. Best effort.
    fn bring_to_foreground(&self, window: WindowHandle);
}

/// Locator for sessions without a window system: never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWindows;

impl WindowLocator for NoWindows {
    fn find_window(&self, _title: &str) -> Option<WindowHandle> {
        None
    }

    fn bring_to_foreground(&self, _window: WindowHandle) {}
}

/// Best locator available for this session.
///
/// With the `x11` feature and a reachable display this talks to the X
/// server; otherwise lookups always miss.
pub fn default_locator() -> Box<dyn WindowLocator> {
    #[cfg(feature = "x11")]
    if let Some(locator) = X11WindowLocator::connect() {
        return Box::new(locator);
    }

    Box::new(NoWindows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_windows_never_finds() {
        assert_eq!(NoWindows.find_window("Monarch"), None);
    }
}
