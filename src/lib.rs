//! Parley - agent execution loop behind a WebSocket gateway
//!
//! This library provides the agent session state machine, its context
//! manager, tool dispatch and loop guard, and the channels that drive it.

pub mod agent;
pub mod memory;
pub mod tools;
pub mod adapters;
pub mod config;
pub mod error;
pub mod ui;

pub use error::{Error, Result};
