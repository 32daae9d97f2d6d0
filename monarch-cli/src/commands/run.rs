//! `monarch run` command - elect, then lead or hand off.
//!
//! The leader polls for new-session requests until Ctrl+C or SIGTERM. A
//! follower makes one attempt to reach the leader and always exits 0.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use monarch_core::{
    current_user_identity, default_locator, Config, Coordinator, Instance, Leader, NotifyOutcome,
    UserIdentity,
};

use crate::commands::fatal;
use crate::session::SessionLauncher;

pub async fn execute(config: Config, exec: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let identity =
        current_user_identity().unwrap_or_else(|e| fatal("Cannot determine user identity", e));

    let instance = Coordinator::start(&config.instance, &identity)
        .unwrap_or_else(|e| fatal("Cannot set up instance coordination", e));

    let command = if exec.is_empty() {
        config.session.command
    } else {
        exec
    };

    match instance {
        Instance::Leader(leader) => lead(leader, &identity, SessionLauncher::new(command)).await,
        Instance::Follower(follower) => {
            let locator = default_locator();
            match follower.notify(locator.as_ref()) {
                NotifyOutcome::Foregrounded => println!("✓ Raised the running instance's window"),
                NotifyOutcome::Signaled => println!("✓ Asked the running instance for a new session"),
                NotifyOutcome::Dropped => println!("• Running instance is busy, request dropped"),
            }
            Ok(())
        }
    }
}

async fn lead(
    mut leader: Leader,
    identity: &UserIdentity,
    mut launcher: SessionLauncher,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut sigterm = signal(SignalKind::terminate())?;

    // The poll callback runs under the cross-process lock; it only queues.
    let (requests, mut pending) = mpsc::unbounded_channel();
    leader.spawn_poll(move || {
        let _ = requests.send(());
    });

    println!("● Leader for {} ({})", identity, leader.names().region());
    start_session(&mut launcher);

    println!("Press Ctrl+C to stop...");

    loop {
        tokio::select! {
            Some(()) = pending.recv() => {
                println!("▶ New session requested");
                start_session(&mut launcher);
            }
            _ = tokio::signal::ctrl_c() => break,
            _ = sigterm.recv() => break,
        }
    }

    println!();
    println!("Shutting down...");
    leader.shutdown().await;
    println!("✓ Stopped after {} session(s)", launcher.launched());

    Ok(())
}

fn start_session(launcher: &mut SessionLauncher) {
    match launcher.launch() {
        Ok(Some(pid)) => println!("  ✓ Session started (PID: {})", pid),
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, "Session launch failed");
            println!("  ✗ {}", e);
        }
    }
}
