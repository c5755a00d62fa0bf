pub mod config;
pub mod types;

pub use config::{Config, ProbeArgs};
pub use types::{ConnectSettings, IceServer, ServerUrl, TransportKind};
