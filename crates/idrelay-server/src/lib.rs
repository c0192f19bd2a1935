pub mod config;
pub mod observability;
pub mod server;

pub use config::{AppConfig, LoggingConfig, ServerConfig};
pub use observability::{apply_logging_level, init_tracing};
pub use server::{IdrelayServer, ServerBuilder, build_app};
