pub mod config;
pub mod server;
pub mod telemetry;

pub use config::{read_config, Config};
pub use server::Server;
pub use telemetry::Telemetry;
