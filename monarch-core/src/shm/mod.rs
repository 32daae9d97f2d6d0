// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Named cross-process primitives.
//!
//! A POSIX shared memory region whose creation decides leadership, and a
//! lock-file mutex that guards every write to the region's flag byte.

mod lock;
mod region;

pub use lock::{CrossProcessLock, LockGuard};
pub use region::{LeaderStatus, SharedRegion};
