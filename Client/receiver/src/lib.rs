pub mod args;
pub mod config;
pub mod metrics;
pub mod processing;
pub mod session;

pub use config::{ConfigError, SessionConfig};
pub use session::{create_session, Session, SessionState};
