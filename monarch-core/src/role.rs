// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Role state machine with a single typed transition.
//!
//! Uninitialized → Leader | Follower, decided once by region creation.
//! Any further transition results in RoleTransitionError.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::RoleTransitionError;

/// Role a process plays for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Created the shared region; owns the poll loop and the UI.
    Leader,

    /// Found the region already there; signals once and exits.
    Follower,
}

impl Role {
    /// Get the role name for logs and error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Leader => "Leader",
            Self::Follower => "Follower",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Election states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleState {
    /// Before the shared region has been created or opened.
    Uninitialized,

    /// Role assigned.
    Assigned(Role),
}

impl RoleState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Assigned(role) => role.name(),
        }
    }
}

/// Tracks the one-time role assignment of this process.
#[derive(Debug)]
pub struct RoleStateMachine {
    current_state: RoleState,
    assigned_at: Option<Instant>,
}

impl RoleStateMachine {
    /// Create a state machine in the Uninitialized state.
    pub fn new() -> Self {
        Self {
            current_state: RoleState::Uninitialized,
            assigned_at: None,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> RoleState {
        self.current_state
    }

    /// Get the assigned role, if any.
    pub fn role(&self) -> Option<Role> {
        match self.current_state {
            RoleState::Uninitialized => None,
            RoleState::Assigned(role) => Some(role),
        }
    }

    /// Time spent in the assigned role.
    pub fn time_in_role(&self) -> Duration {
        self.assigned_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Assign the role. Only valid from Uninitialized.
    pub fn assign(&mut self, role: Role) -> Result<(), RoleTransitionError> {
        if self.current_state != RoleState::Uninitialized {
            return Err(RoleTransitionError::InvalidTransition {
                from: self.current_state.name(),
                to: role.name(),
            });
        }

        tracing::debug!(from = self.current_state.name(), to = role.name(), "Role assigned");

        self.current_state = RoleState::Assigned(role);
        self.assigned_at = Some(Instant::now());

        Ok(())
    }
}

impl Default for RoleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
