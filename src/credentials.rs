//! SSH login identity resolution.
//!
//! A login is a user name plus private key material read from disk. The key
//! path is tried as given first and then relative to `~/.ssh/`, so both
//! `/keys/deploy.pem` and a bare `deploy.pem` work.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::util::{expand_tilde, home_dir, read_to_string_ambient};

/// User assumed when the caller does not name one.
pub const DEFAULT_SSH_USER: &str = "root";

/// Key file looked up under `~/.ssh/` when no path is supplied.
pub const DEFAULT_KEY_FILE: &str = "id_rsa";

/// User name and private key used to log in to a node.
#[derive(Clone, Eq, PartialEq)]
pub struct LoginCredentials {
    /// Remote user name.
    pub user: String,
    /// Private key material, verbatim from the key file.
    pub private_key: String,
}

impl LoginCredentials {
    /// Returns `true` when the login user is `root`.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.user == DEFAULT_SSH_USER
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("user", &self.user)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Errors raised while loading login credentials.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialError {
    /// Neither the path as given nor its `~/.ssh/` fallback exists.
    #[error("file not found: {path} (also tried {fallback})")]
    NotFound {
        /// Path as supplied (after tilde expansion).
        path: Utf8PathBuf,
        /// Fallback location that was tried.
        fallback: Utf8PathBuf,
    },
    /// The key file exists but could not be read as UTF-8 text.
    #[error("failed to read private key {path}: {message}")]
    Read {
        /// Path that failed to read.
        path: Utf8PathBuf,
        /// Underlying I/O message.
        message: String,
    },
}

/// Resolves [`LoginCredentials`] relative to a home directory.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CredentialResolver {
    home: Option<Utf8PathBuf>,
}

impl CredentialResolver {
    /// Resolver rooted at `$HOME`.
    #[must_use]
    pub fn from_env() -> Self {
        Self { home: home_dir() }
    }

    /// Resolver rooted at an explicit home directory.
    #[must_use]
    pub fn with_home(home: impl Into<Utf8PathBuf>) -> Self {
        Self {
            home: Some(home.into()),
        }
    }

    /// Directory searched for relative key names.
    #[must_use]
    pub fn ssh_dir(&self) -> Utf8PathBuf {
        self.home.as_ref().map_or_else(
            || Utf8PathBuf::from("~/.ssh"),
            |home| home.join(".ssh"),
        )
    }

    /// Loads the login for `user` with the key at `private_key_path`.
    ///
    /// Blank values fall back to [`DEFAULT_SSH_USER`] and
    /// `~/.ssh/`[`DEFAULT_KEY_FILE`].
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] when no candidate file exists
    /// and [`CredentialError::Read`] when the file cannot be read.
    pub fn resolve(
        &self,
        user: Option<&str>,
        private_key_path: Option<&str>,
    ) -> Result<LoginCredentials, CredentialError> {
        let login_user = user
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_SSH_USER);
        let key_path = self.locate_key(private_key_path)?;
        let private_key = read_to_string_ambient(&key_path).map_err(|message| {
            CredentialError::Read {
                path: key_path.clone(),
                message,
            }
        })?;

        Ok(LoginCredentials {
            user: login_user.to_owned(),
            private_key,
        })
    }

    fn locate_key(&self, private_key_path: Option<&str>) -> Result<Utf8PathBuf, CredentialError> {
        let requested = private_key_path
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let Some(raw) = requested else {
            let default_path = self.ssh_dir().join(DEFAULT_KEY_FILE);
            if default_path.is_file() {
                return Ok(default_path);
            }
            return Err(CredentialError::NotFound {
                fallback: default_path.clone(),
                path: default_path,
            });
        };

        let direct = expand_tilde(raw, self.home.as_deref());
        if direct.is_file() {
            return Ok(direct);
        }

        let fallback = self.ssh_dir().join(Utf8Path::new(raw));
        if fallback.is_file() {
            return Ok(fallback);
        }

        Err(CredentialError::NotFound {
            path: direct,
            fallback,
        })
    }
}
