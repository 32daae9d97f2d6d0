// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-user identity derivation.
//!
//! Reads the account name of the real user id from the passwd database.
//! A lookup failure is an environment problem and is never retried.

use nix::unistd::{Uid, User};

use crate::error::IdentityError;
use crate::types::UserIdentity;

/// Derive the identity of the user running this process.
pub fn current_user_identity() -> Result<UserIdentity, IdentityError> {
    let uid = Uid::current();

    let user = User::from_uid(uid)
        .map_err(|e| IdentityError::LookupFailed {
            uid: uid.as_raw(),
            reason: e.to_string(),
        })?
        .ok_or(IdentityError::NoAccount { uid: uid.as_raw() })?;

    let identity = UserIdentity::from_account_name(&user.name)?;

    tracing::debug!(uid = uid.as_raw(), identity = %identity, "Derived user identity");

    Ok(identity)
}
