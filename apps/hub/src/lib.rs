//! Vigil hub - coordinates validator agents probing monitored endpoints.

pub mod config;
pub mod database;
pub mod error;
pub mod hub;
pub mod notify;
pub mod pool;
pub mod transport;

pub use config::Config;
pub use error::HubError;
pub use hub::{Hub, HubSettings};
