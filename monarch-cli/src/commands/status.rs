// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `monarch status` command - inspect coordination state without electing.

use serde::Serialize;

use monarch_core::{
    current_user_identity, Config, Coordinator, LeaderStatus, ResourceNames, UserIdentity,
};

use crate::commands::fatal;

#[derive(Serialize)]
struct StatusReport<'a> {
    identity: &'a UserIdentity,
    names: &'a ResourceNames,
    leader: LeaderStatus,
}

pub fn execute(config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let identity =
        current_user_identity().unwrap_or_else(|e| fatal("Cannot determine user identity", e));
    let names = ResourceNames::new(
        &config.instance.region_prefix,
        &config.instance.lock_prefix,
        &identity,
    );

    let leader = Coordinator::probe(&config.instance, &identity)
        .unwrap_or_else(|e| fatal("Cannot inspect instance coordination", e));

    if json {
        let report = StatusReport {
            identity: &identity,
            names: &names,
            leader,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Identity:      {}", identity);
    println!("Region:        /{}", names.region());
    println!("Lock:          /{}", names.lock());
    match leader {
        LeaderStatus::Absent => println!("Leader:        ○ none"),
        LeaderStatus::Stale => println!("Leader:        ○ none (stale region, reclaimed on next start)"),
        LeaderStatus::Alive { pending } => println!(
            "Leader:        ● running{}",
            if pending { " (request pending)" } else { "" }
        ),
    }

    Ok(())
}
