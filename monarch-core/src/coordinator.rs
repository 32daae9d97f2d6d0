// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-process coordinator.
//!
//! [`Coordinator::start`] runs the election once and returns an [`Instance`]
//! that owns every handle this process holds. Dropping it releases them on
//! every exit path; a leader additionally gives up its region name.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::InstanceConfig;
use crate::error::MonarchResult;
use crate::role::{Role, RoleStateMachine};
use crate::shm::{CrossProcessLock, LeaderStatus, SharedRegion};
use crate::signal::{NotifyOutcome, SessionRequestHandler, SignalChannel};
use crate::types::{ResourceNames, UserIdentity};
use crate::window::WindowLocator;

/// Entry point for election and inspection.
pub struct Coordinator;

impl Coordinator {
    /// Open the named resources for `identity` and elect this process.
    ///
    /// # Errors
    /// Any error here is fatal: the lock object, region creation or mapping
    /// could not be set up.
    pub fn start(config: &InstanceConfig, identity: &UserIdentity) -> MonarchResult<Instance> {
        let names = ResourceNames::new(&config.region_prefix, &config.lock_prefix, identity);
        let lock = CrossProcessLock::open(names.lock())?;

        let mut roles = RoleStateMachine::new();
        let (region, role) = {
            let election = lock.acquire()?;
            SharedRegion::acquire(names.region(), config.region_size, &election)?
        };
        roles.assign(role)?;

        tracing::info!(
            identity = %identity,
            region = %names.region(),
            role = %role,
            "Election complete"
        );

        let channel = SignalChannel::new(region, lock);

        Ok(match role {
            Role::Leader => Instance::Leader(Leader {
                channel: Arc::new(channel),
                names,
                roles,
                poll_interval: config.poll_interval,
                poll: None,
            }),
            Role::Follower => Instance::Follower(Follower {
                channel,
                names,
                window_title: config.window_title.clone(),
            }),
        })
    }

    /// Report whether a leader is running for `identity`, without electing.
    pub fn probe(config: &InstanceConfig, identity: &UserIdentity) -> MonarchResult<LeaderStatus> {
        let names = ResourceNames::new(&config.region_prefix, &config.lock_prefix, identity);
        let lock = CrossProcessLock::open(names.lock())?;
        let guard = lock.acquire()?;
        Ok(SharedRegion::probe(names.region(), &guard)?)
    }
}

/// This process after election.
#[derive(Debug)]
pub enum Instance {
    Leader(Leader),
    Follower(Follower),
}

impl Instance {
    /// Role this process was assigned.
    pub fn role(&self) -> Role {
        match self {
            Self::Leader(_) => Role::Leader,
            Self::Follower(_) => Role::Follower,
        }
    }

    /// Resource names used by this process.
    pub fn names(&self) -> &ResourceNames {
        match self {
            Self::Leader(leader) => &leader.names,
            Self::Follower(follower) => &follower.names,
        }
    }
}

/// Recurring poll on the leader's runtime.
#[derive(Debug)]
struct PollTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The leader: owns the region, the lock and the poll task.
#[derive(Debug)]
pub struct Leader {
    /// Shared with the poll task; the mapping is released with the last reference.
    channel: Arc<SignalChannel>,
    names: ResourceNames,
    roles: RoleStateMachine,
    poll_interval: Duration,
    poll: Option<PollTask>,
}

impl Leader {
    /// Resource names this leader owns.
    pub fn names(&self) -> &ResourceNames {
        &self.names
    }

    /// Interval between polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Whether a request is waiting (advisory, unlocked read).
    pub fn is_pending(&self) -> bool {
        self.channel.is_pending()
    }

    /// Run one poll tick synchronously.
    pub fn poll_once(&self, handler: &dyn SessionRequestHandler) -> bool {
        self.channel.poll_once(handler)
    }

    /// Whether the recurring poll is running.
    pub fn is_polling(&self) -> bool {
        self.poll.as_ref().is_some_and(|p| !p.handle.is_finished())
    }

    /// Start polling every `poll_interval` on the current tokio runtime.
    /// A poll that is already running is stopped and replaced.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn spawn_poll<H>(&mut self, handler: H)
    where
        H: SessionRequestHandler + 'static,
    {
        if let Some(previous) = self.poll.take() {
            previous.stop_now();
        }

        let (stop, mut stopped) = watch::channel(false);
        let channel = Arc::clone(&self.channel);
        let interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    // Only `true` is ever sent; a dropped sender also means stop.
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        channel.poll_once(&handler);
                    }
                }
            }

            tracing::debug!("Poll task stopped");
        });

        tracing::debug!(interval_ms = interval.as_millis() as u64, "Poll task started");
        self.poll = Some(PollTask { stop, handle });
    }

    /// Stop the poll task, wait for it, then give up the region name.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.poll.take() {
            let _ = task.stop.send(true);
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Poll task failed");
                }
            }
        }

        tracing::info!(
            region = %self.names.region(),
            leader_for_ms = self.roles.time_in_role().as_millis() as u64,
            "Leader stepping down"
        );
    }
}

impl PollTask {
    fn stop_now(self) {
        let _ = self.stop.send(true);
        self.handle.abort();
    }
}

impl Drop for Leader {
    fn drop(&mut self) {
        if let Some(task) = self.poll.take() {
            task.stop_now();
        }

        // An aborted task may keep its reference to the channel for a while;
        // leadership ends here regardless. The mapping itself lives on until
        // the last reference is gone.
        self.channel.resign();
    }
}

/// A follower: signals the leader once, then releases everything.
#[derive(Debug)]
pub struct Follower {
    channel: SignalChannel,
    names: ResourceNames,
    window_title: Option<String>,
}

impl Follower {
    /// Resource names this follower opened.
    pub fn names(&self) -> &ResourceNames {
        &self.names
    }

    /// Hand the request to the leader. Consumes the follower so its handles
    /// are released right after the single attempt.
    pub fn notify(self, locator: &dyn WindowLocator) -> NotifyOutcome {
        let outcome = self.channel.notify(locator, self.window_title.as_deref());
        tracing::info!(outcome = outcome.name(), "Follower handed off to running instance");
        outcome
    }
}
