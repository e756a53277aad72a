//! Compute context lifecycle.
//!
//! A [`ComputeContext`] owns one provider session for the duration of a single
//! provision or deprovision call. It is closed exactly once: either explicitly
//! through [`ComputeContext::close`] or, on any other exit path, when it is
//! dropped.

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::compute::{ComputeError, ComputeService, Connector};
use crate::provider::{ProviderProfile, SessionOptions};

/// Upper bound for bootstrap scripts and remote commands.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Everything a [`Connector`] needs to open a session.
#[derive(Clone, Eq, PartialEq)]
pub struct ContextSpec {
    /// Provider id.
    pub provider: String,
    /// Identity (access key id or user name).
    pub identity: String,
    credential: String,
    /// Timeout applied to scripts run through the session.
    pub script_timeout: Duration,
    /// Provider-specific session options.
    pub session: SessionOptions,
}

impl ContextSpec {
    /// Builds a spec using the provider's session options and the default
    /// script timeout.
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        identity: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        let provider_id = provider.into();
        let session = ProviderProfile::for_provider(&provider_id).session();
        Self {
            provider: provider_id,
            identity: identity.into(),
            credential: credential.into(),
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
            session,
        }
    }

    /// Overrides the script timeout.
    #[must_use]
    pub const fn with_script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    /// Secret half of the identity/credential pair.
    #[must_use]
    pub fn credential(&self) -> &str {
        &self.credential
    }
}

impl fmt::Debug for ContextSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSpec")
            .field("provider", &self.provider)
            .field("identity", &self.identity)
            .field("credential", &"<redacted>")
            .field("script_timeout", &self.script_timeout)
            .field("session", &self.session)
            .finish()
    }
}

/// Provider session scoped to one orchestration call.
pub struct ComputeContext {
    service: Box<dyn ComputeService>,
    provider: String,
    script_timeout: Duration,
    closed: bool,
}

impl ComputeContext {
    /// Opens a session through `connector`.
    ///
    /// # Errors
    ///
    /// Propagates the connector's [`ComputeError`]; nothing needs closing in
    /// that case.
    pub async fn open<C>(connector: &C, spec: &ContextSpec) -> Result<Self, ComputeError>
    where
        C: Connector + ?Sized,
    {
        debug!(provider = %spec.provider, identity = %spec.identity, "opening compute context");
        let service = connector.connect(spec).await?;
        Ok(Self {
            service,
            provider: spec.provider.clone(),
            script_timeout: spec.script_timeout,
            closed: false,
        })
    }

    /// Live session.
    #[must_use]
    pub fn service(&self) -> &dyn ComputeService {
        self.service.as_ref()
    }

    /// Provider the session was opened for.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Timeout applied to scripts.
    #[must_use]
    pub const fn script_timeout(&self) -> Duration {
        self.script_timeout
    }

    /// Closes the session.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.service.close();
        debug!(provider = %self.provider, "closed compute context");
    }
}

impl Drop for ComputeContext {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeContext")
            .field("provider", &self.provider)
            .field("script_timeout", &self.script_timeout)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
