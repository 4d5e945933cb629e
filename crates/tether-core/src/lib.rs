//! Tether core - relay protocol between mobile clients and remote Hosts.
//!
//! This crate implements:
//! - Presence tracking (announce, heartbeat, discovery)
//! - Pairing (session code + one-time OTP exchanged for a credential)
//! - Correlated request/response over a shared polled store
//! - The client-side pairing state machine
//! - Storage abstraction with in-memory and HTTP relay backends

#![forbid(unsafe_code)]

// Protocol components
pub mod presence;
pub mod pairing;
pub mod channel;

// Client side
pub mod client;

// Infrastructure
pub mod store;
pub mod commands;

// Supporting modules
pub mod types;
pub mod ident;
pub mod harness;

// Optional store implementations
#[cfg(feature = "http-relay")]
pub mod http_relay;

#[cfg(test)]
mod proptests;
