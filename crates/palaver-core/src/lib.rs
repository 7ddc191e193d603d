//! Sans-IO state machines for the Palaver chat sync core.
//!
//! Everything here is pure in-memory state driven by already-delivered
//! events: no sockets, no clocks, no async. Time enters as explicit
//! arguments, which keeps every component fully testable without a runtime.
//!
//! # Components
//!
//! - [`RoomDirectory`]: ordered cache of the local user's rooms
//! - [`Timeline`]: per-room ordered message cache with pagination and
//!   read-state tracking
//! - [`TypingTracker`] / [`TypingDebouncer`]: ephemeral typing state with
//!   local timeout expiry and outbound coalescing
//! - [`KeyManager`]: versioned room keys, wrapping for participants
//! - [`Reaper`]: expiry sweep for disappearing messages
//!
//! The async layer (`palaver-client`) owns the single mutable instance of
//! each component and serializes all mutation through one task.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod directory;
mod error;
mod keys;
mod presence;
mod reaper;
mod timeline;

pub use config::SyncConfig;
pub use directory::{ActiveSwitch, RoomDirectory};
pub use error::SyncError;
pub use keys::{KeyManager, ProvisionedKeys};
pub use presence::{TypingDebouncer, TypingSignal, TypingTracker};
pub use reaper::{Reaper, ReaperEvent};
pub use timeline::Timeline;
