//! CLI command implementations.
//!
//! | Module        | Commands handled |
//! |---------------|------------------|
//! | `watch`       | `Watch`          |
//! | `push`        | `Push`           |
//! | `permissions` | `Can`            |
//! | `config`      | `Config`         |

pub mod config;
pub mod permissions;
pub mod push;
pub mod watch;

pub use config::cmd_config;
pub use permissions::cmd_can;
pub use push::cmd_push;
pub use watch::cmd_watch;

use anyhow::Result;
use boardsync::config::{CONFIG_FILE_NAME, SyncConfig};
use std::path::PathBuf;

use crate::Cli;

/// The config file the CLI reads: `--config`, or `boardsync.toml` in the
/// working directory.
pub(crate) fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

/// Load the file (if any), then apply environment and CLI overrides.
pub(crate) fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let config = SyncConfig::load_or_default(&config_path(cli))?
        .with_env_overrides()
        .with_cli_overrides(cli.url.as_deref());
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    Ok(config)
}
