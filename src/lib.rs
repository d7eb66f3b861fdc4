pub mod api;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod identity;
pub mod inject;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod session;
pub mod testing;
pub mod transport;
pub mod voice;

pub use error::GatewayError;
