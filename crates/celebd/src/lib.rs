//! celebd: sports celebrity classification daemon.

pub mod engine;
pub mod server;

pub use celeb_config::{Config, ConfigError};
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use server::{router, AppState};
