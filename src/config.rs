//! Worker configuration loaded via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::credentials::CredentialResolver;
use crate::orchestrator::RollbackPolicy;

/// Default for [`WorkerConfig::script_timeout_secs`]: twenty minutes.
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 20 * 60;

/// Settings shared by every provision and deprovision call. Values merge
/// defaults, `stratus.toml`, and `STRATUS_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "STRATUS",
    discovery(
        app_name = "stratus",
        env_var = "STRATUS_CONFIG_PATH",
        config_file_name = "stratus.toml",
        dotfile_name = ".stratus.toml",
        project_file_name = "stratus.toml"
    )
)]
pub struct WorkerConfig {
    /// Upper bound in seconds for bootstrap scripts and remote commands.
    #[ortho_config(default = DEFAULT_SCRIPT_TIMEOUT_SECS)]
    pub script_timeout_secs: u64,
    /// Destroy a freshly created node when its remote commands fail.
    #[ortho_config(default = false)]
    pub rollback_on_failure: bool,
    /// Home directory used to locate SSH keys. Falls back to `HOME`.
    pub home_dir: Option<String>,
}

impl WorkerConfig {
    /// Loads configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails and
    /// [`ConfigError::InvalidTimeout`] when the merged values are invalid.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let config = Self::load_from_iter([OsString::from("stratus")])
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the merged values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTimeout`] when the script timeout is
    /// zero.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.script_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }

    /// Script timeout as a [`Duration`].
    #[must_use]
    pub const fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    /// Rollback policy selected by `rollback_on_failure`.
    #[must_use]
    pub const fn rollback_policy(&self) -> RollbackPolicy {
        if self.rollback_on_failure {
            RollbackPolicy::Destroy
        } else {
            RollbackPolicy::Retain
        }
    }

    /// Credential resolver rooted at `home_dir`, or at `HOME` when unset.
    #[must_use]
    pub fn credential_resolver(&self) -> CredentialResolver {
        self.home_dir
            .as_deref()
            .map(str::trim)
            .filter(|home| !home.is_empty())
            .map_or_else(CredentialResolver::from_env, |home| {
                CredentialResolver::with_home(Utf8PathBuf::from(home))
            })
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// The script timeout must be positive.
    #[error("script_timeout_secs must be greater than zero")]
    InvalidTimeout,
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}
