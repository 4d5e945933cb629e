pub mod api;
pub mod config;
pub mod metrics;
pub mod server;
pub mod wakeup;

#[cfg(test)]
mod api_tests;

pub use server::{build_router, RelayServer};
