pub mod build;
pub mod commands;
pub mod config;
pub mod crumb;
mod error;
pub mod jobs;
pub mod log_stream;
pub mod session;
pub mod table;
pub mod transport;

pub use crate::config::{CredentialStore, Profile};
pub use crate::error::{Error, Result, USAGE_EXIT_CODE};
pub use crate::session::Session;
