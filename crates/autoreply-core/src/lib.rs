//! Core types and configuration for the Autoreply automation engine.
//!
//! Everything here is shared by the engine, the webhook gateway and the
//! management API: the automation model, the canonical inbound event,
//! dispatch bookkeeping and the dashboard snapshot.

pub mod config;
pub mod error;
pub mod event;
pub mod types;

pub use config::*;
pub use error::{CoreError, Result};
pub use event::{Event, EventKind, Platform, ReplyTarget};
pub use types::*;
