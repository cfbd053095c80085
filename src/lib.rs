/*!
 * Meridian - bidirectional file-synchronization and hygiene engine
 *
 * Reconciles a local tree against a remote backend (Dropbox, Google
 * Drive, S3, SFTP), reports and cleans up empty-folder/conflict-copy
 * clutter, and exposes both a CLI and an optional HTTP API over the same
 * `Engine` facade.
 */

#[cfg(feature = "api")]
pub mod api;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod logging;
pub mod notify;
pub mod provider;
pub mod scanner;
pub mod schedule;
pub mod state;
pub mod stats;

pub use config::Config;
pub use engine::facade::Engine;
pub use error::{MeridianError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
