//! nightcap sleep reactor
//!
//! Runs a command (typically a screen locker) whenever the machine is
//! about to sleep, holding a sleep inhibit lock until the command has had
//! time to take effect.

pub mod backend;
pub mod cli;
pub mod error;
pub mod reactor;
pub mod release_timer;
pub mod runner;
pub mod timeout;

pub use error::{ReactorError, ReactorResult};
pub use reactor::{Reactor, ReactorConfig};
