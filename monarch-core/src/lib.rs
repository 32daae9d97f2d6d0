//! Monarch Core Library
//!
//! Keeps a desktop application to one running instance per user. The first
//! process to create the per-user shared region becomes the leader; later
//! launches become followers that raise the leader's window or set a
//! one-byte "new session requested" flag, then exit.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod role;
pub mod shm;
pub mod signal;
pub mod types;
pub mod window;

// Re-export commonly used types
pub use config::{Config, ConfigLoader, InstanceConfig, SessionConfig};
pub use coordinator::{Coordinator, Follower, Instance, Leader};
pub use error::{MonarchError, MonarchResult};
pub use identity::current_user_identity;
pub use role::{Role, RoleStateMachine};
pub use shm::LeaderStatus;
pub use signal::{NotifyOutcome, SessionRequestHandler};
pub use types::{ResourceNames, ResourcePrefix, UserIdentity};
pub use window::{default_locator, NoWindows, WindowHandle, WindowLocator};
