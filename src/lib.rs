//! Client for the HumanitZ dialect of Source RCON.
//!
//! [`Session`] owns the single authenticated connection and serialises
//! commands from any number of threads. [`ChatDiffer`] turns successive
//! `fetchchat` snapshots into new chat events.

pub mod config;
pub mod differ;
pub mod error;
pub mod rate;
pub mod session;
pub mod status;
pub mod transport;

#[cfg(test)]
mod testing;

pub use differ::{ChatDiffer, ChatEvent, ChatKind};
pub use error::{RconError, Result};
pub use session::{Session, SessionConfig, SessionState, Traffic};
pub use transport::Transport;
