// Firmhub Engine - Core module structure
pub mod release;
pub mod device;
pub mod github;
pub mod api;
pub mod alert;
pub mod scheduler;
pub mod config;
pub mod cli;

pub use config::Config;
pub use release::{ReleaseStore, ReleaseSynchronizer};
