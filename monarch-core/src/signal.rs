// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! One-bit signaling between followers and the leader.
//!
//! The flag at offset 0 of the shared region goes 0 → 1 only under the
//! lock (follower) and 1 → 0 only under the lock (leader). The leader's
//! unlocked read is advisory: a race with a follower delays detection by
//! at most one poll tick and never loses or double-consumes a request.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::role::Role;
use crate::shm::{CrossProcessLock, SharedRegion};
use crate::window::WindowLocator;

/// Value of the flag byte while a request is pending.
pub const FLAG_PENDING: u8 = 1;

/// Value of the flag byte when idle.
pub const FLAG_IDLE: u8 = 0;

/// What a follower's single notify attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyOutcome {
    /// Found the leader's window and raised it; lock and flag untouched.
    Foregrounded,
    /// Set the pending flag for the leader's next poll.
    Signaled,
    /// Lock was busy (or failed); the request was dropped.
    Dropped,
}

impl NotifyOutcome {
    /// Get the outcome name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Foregrounded => "foregrounded",
            Self::Signaled => "signaled",
            Self::Dropped => "dropped",
        }
    }
}

/// Receiver of consumed "new session requested" signals.
///
/// Called by the leader while it still holds the lock, so implementations
/// must return quickly (hand the work to the UI loop, do not build it here).
pub trait SessionRequestHandler: Send + Sync {
    /// A follower asked for a new session.
    fn new_session_requested(&self);
}

impl<F> SessionRequestHandler for F
where
    F: Fn() + Send + Sync,
{
    fn new_session_requested(&self) {
        self()
    }
}

/// The shared region and the lock that guards its flag.
#[derive(Debug)]
pub struct SignalChannel {
    region: SharedRegion,
    lock: CrossProcessLock,
    /// Set once a leader channel has given up its region name.
    resigned: AtomicBool,
}

impl SignalChannel {
    /// Pair an acquired region with the lock of the same identity.
    pub fn new(region: SharedRegion, lock: CrossProcessLock) -> Self {
        Self {
            region,
            lock,
            resigned: AtomicBool::new(false),
        }
    }

    /// Role this channel was acquired under.
    pub fn role(&self) -> Role {
        self.region.role()
    }

    /// Advisory, unlocked view of the flag.
    pub fn is_pending(&self) -> bool {
        self.region.read_flag() != FLAG_IDLE
    }

    /// Follower protocol. Runs once; never blocks.
    pub fn notify(&self, locator: &dyn WindowLocator, window_title: Option<&str>) -> NotifyOutcome {
        debug_assert_eq!(self.role(), Role::Follower);

        if let Some(title) = window_title {
            if let Some(window) = locator.find_window(title) {
                locator.bring_to_foreground(window);
                tracing::debug!(title = %title, ?window, "Raised existing window");
                return NotifyOutcome::Foregrounded;
            }
        }

        let guard = match self.lock.try_acquire() {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::debug!(lock = %self.lock.name(), "Lock busy, dropping new-session request");
                return NotifyOutcome::Dropped;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Lock failed, dropping new-session request");
                return NotifyOutcome::Dropped;
            }
        };

        self.region.write_flag(FLAG_PENDING, &guard);
        drop(guard);

        tracing::debug!(region = %self.region.name(), "New-session request signaled");
        NotifyOutcome::Signaled
    }

    /// Leader protocol, one timer tick. Returns whether a request was consumed.
    pub fn poll_once(&self, handler: &dyn SessionRequestHandler) -> bool {
        if self.resigned.load(Ordering::Acquire) || !self.is_pending() {
            return false;
        }

        let guard = match self.lock.acquire() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(error = %e, "Lock failed while polling, retrying next tick");
                return false;
            }
        };

        // Re-check under the lock; the unlocked read may be stale.
        if self.resigned.load(Ordering::Acquire) || self.region.read_flag() == FLAG_IDLE {
            return false;
        }

        self.region.write_flag(FLAG_IDLE, &guard);
        handler.new_session_requested();
        drop(guard);

        tracing::info!(region = %self.region.name(), "New session requested");
        true
    }

    /// Give up leadership so the next starter is elected cleanly.
    ///
    /// Runs at most once; later calls do nothing, so a channel released late
    /// can never remove a successor's region. Polls after this are no-ops.
    pub fn resign(&self) {
        if self.region.role() != Role::Leader {
            return;
        }

        let guard = match self.lock.acquire() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!(error = %e, "Failed to lock for leadership release");
                return;
            }
        };

        if self.resigned.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.region.resign(&guard) {
            tracing::error!(error = %e, "Failed to release leadership");
        }
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        if !self.resigned.load(Ordering::Acquire) {
            self.resign();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::window::{NoWindows, WindowHandle};

    struct RecordingLocator {
        window: Option<WindowHandle>,
        lookups: AtomicUsize,
        raised: AtomicUsize,
    }

    impl RecordingLocator {
        fn new(window: Option<WindowHandle>) -> Self {
            Self {
                window,
                lookups: AtomicUsize::new(0),
                raised: AtomicUsize::new(0),
            }
        }
    }

    impl WindowLocator for RecordingLocator {
        fn find_window(&self, _title: &str) -> Option<WindowHandle> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.window
        }

        fn bring_to_foreground(&self, _window: WindowHandle) {
            self.raised.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Lock object name for one test, removed on drop.
    struct LockName(String);

    impl Drop for LockName {
        fn drop(&mut self) {
            let _ = nix::sys::mman::shm_unlink(format!("/{}", self.0).as_str());
        }
    }

    /// Leader and follower channels over one region, each with its own lock handle.
    fn channels(tag: &str) -> (LockName, SignalChannel, SignalChannel) {
        let name = format!("MonarchSignalTest_{}_{}", tag, std::process::id());
        let lock_name = LockName(format!("MonarchSignalTestMutex_{}_{}", tag, std::process::id()));

        let leader_lock = CrossProcessLock::open(&lock_name.0).unwrap();
        let follower_lock = CrossProcessLock::open(&lock_name.0).unwrap();

        let (leader_region, role) = {
            let guard = leader_lock.acquire().unwrap();
            SharedRegion::acquire(&name, 64, &guard).unwrap()
        };
        assert_eq!(role, Role::Leader);
        let (follower_region, role) = {
            let guard = follower_lock.acquire().unwrap();
            SharedRegion::acquire(&name, 64, &guard).unwrap()
        };
        assert_eq!(role, Role::Follower);

        (
            lock_name,
            SignalChannel::new(leader_region, leader_lock),
            SignalChannel::new(follower_region, follower_lock),
        )
    }

    #[test]
    fn test_idle_poll_does_nothing() {
        let (_lock, leader, _follower) = channels("idle");
        let calls = AtomicUsize::new(0);

        assert!(!leader.poll_once(&|| {
            calls.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_signal_then_poll() {
        let (_lock, leader, follower) = channels("single");
        let calls = AtomicUsize::new(0);
        let handler = || {
            calls.fetch_add(1, Ordering::SeqCst);
        };

        assert_eq!(follower.notify(&NoWindows, None), NotifyOutcome::Signaled);
        assert!(leader.is_pending());

        assert!(leader.poll_once(&handler));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!leader.is_pending());

        assert!(!leader.poll_once(&handler));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_untitled_skips_window_lookup() {
        let (_lock, leader, follower) = channels("untitled");
        let locator = RecordingLocator::new(Some(WindowHandle(7)));

        assert_eq!(follower.notify(&locator, None), NotifyOutcome::Signaled);
        assert_eq!(locator.lookups.load(Ordering::SeqCst), 0);
        assert!(leader.is_pending());
    }

    #[test]
    fn test_found_window_raises_without_signal() {
        let (_lock, leader, follower) = channels("window");
        let locator = RecordingLocator::new(Some(WindowHandle(7)));

        assert_eq!(
            follower.notify(&locator, Some("Monarch")),
            NotifyOutcome::Foregrounded
        );
        assert_eq!(locator.raised.load(Ordering::SeqCst), 1);
        assert!(!leader.is_pending());
    }

    #[test]
    fn test_missing_window_falls_back_to_signal() {
        let (_lock, leader, follower) = channels("nowindow");
        let locator = RecordingLocator::new(None);

        assert_eq!(follower.notify(&locator, Some("Monarch")), NotifyOutcome::Signaled);
        assert_eq!(locator.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(locator.raised.load(Ordering::SeqCst), 0);
        assert!(leader.is_pending());
    }

    #[test]
    fn test_resigned_leader_ignores_pending_flag() {
        let (_lock, leader, follower) = channels("resigned");
        let calls = AtomicUsize::new(0);

        assert_eq!(follower.notify(&NoWindows, None), NotifyOutcome::Signaled);
        leader.resign();

        assert!(!leader.poll_once(&|| {
            calls.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_repeated_resign_spares_successor() {
        let (lock_name, leader, _follower) = channels("successor");
        leader.resign();

        let lock = CrossProcessLock::open(&lock_name.0).unwrap();
        let guard = lock.acquire().unwrap();
        let (next, role) = SharedRegion::acquire(leader.region.name(), 64, &guard).unwrap();
        assert_eq!(role, Role::Leader);
        drop(guard);

        // A second resign, or the drop of the old channel, must not unlink it.
        leader.resign();
        drop(leader);

        let guard = lock.acquire().unwrap();
        assert!(matches!(
            SharedRegion::probe(next.name(), &guard).unwrap(),
            crate::shm::LeaderStatus::Alive { .. }
        ));
        next.resign(&guard).unwrap();
    }

    #[test]
    fn test_outcome_names() {
        assert_eq!(NotifyOutcome::Foregrounded.name(), "foregrounded");
        assert_eq!(NotifyOutcome::Signaled.name(), "signaled");
        assert_eq!(NotifyOutcome::Dropped.name(), "dropped");
    }
}
