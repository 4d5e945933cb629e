//! Tether Host agent: announces presence to the relay, surfaces pairing
//! codes on its console, and services client requests.

pub mod agent;
pub mod config;
pub mod identity;
