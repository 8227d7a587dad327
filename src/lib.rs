//! Flight-state synchronization engine for an en-route radar display.
//!
//! Feed payloads are decoded by [`models::MessageParser`], merged into a
//! [`store::FlightStore`] and exposed through the shared
//! [`engine::FlightTable`], which also runs operator commands.

pub mod command;
pub mod config;
pub mod engine;
pub mod errors;
pub mod files;
pub mod flight;
pub mod models;
pub mod mqtt;
pub mod store;
