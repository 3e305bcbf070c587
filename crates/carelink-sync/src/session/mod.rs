//! Chat session: ordered log ownership and event serialization.

mod controller;
mod log;

pub use self::controller::{ChatSession, SessionConfig, SessionError};
pub use self::log::SessionLog;
