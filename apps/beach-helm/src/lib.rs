//! Room control arbitration for a shared remote desktop: connected sessions,
//! a single host holding input control, and the events that keep every
//! session's view of the room in sync.

pub mod auth;
pub mod cli;
pub mod config;
pub mod control;
pub mod desktop;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod profile;
pub mod protocol;
pub mod registry;
pub mod routes;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod websocket;
