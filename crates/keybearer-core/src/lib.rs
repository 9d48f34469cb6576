pub mod config;
pub mod error;
pub mod types;

pub use config::KeybearerConfig;
pub use error::{Error, Result};
