pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod models;
pub mod services;
pub mod websocket;

pub use config::HubConfig;
pub use error::{RealtimeError, RealtimeResult};
pub use hub::{HubHandle, RealtimeHub, Subscription};
