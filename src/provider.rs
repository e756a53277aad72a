//! Provider capability table and per-provider strategy.
//!
//! Every request is gated on [`ProviderTable::check`] before a session is
//! opened. Provider quirks are data: [`ProviderProfile::for_provider`] maps an
//! id to the template adjustments and session options it needs, and unknown
//! ids get none.

use std::collections::BTreeSet;

use thiserror::Error;

/// API identifiers known to the compute library.
pub const SUPPORTED_APIS: &[&str] = &[
    "byon",
    "cloudsigma",
    "cloudstack",
    "deltacloud",
    "ec2",
    "elasticstack",
    "eucalyptus",
    "nova",
    "openstack-nova",
    "savvis-symphonyvpdc",
    "stub",
    "vcloud",
];

/// Provider identifiers known to the compute library.
pub const SUPPORTED_PROVIDERS: &[&str] = &[
    "aws-ec2",
    "bluelock-vcloud-zone01",
    "cloudservers-uk",
    "cloudservers-us",
    "cloudsigma-lvs",
    "cloudsigma-zrh",
    "elastichosts-lon-b",
    "elastichosts-lon-p",
    "elastichosts-sat-p",
    "eucalyptus-partnercloud-ec2",
    "go2cloud-jhb1",
    "gogrid",
    "greenhousedata-element-vcloud",
    "hpcloud-compute",
    "ninefold-compute",
    "openhosting-east1",
    "rimuhosting",
    "serverlove-z1-man",
    "skalicloud-sdg-my",
    "slicehost",
    "softlayer",
    "stratogen-vcloud-mycloud",
    "trmk-ecloud",
    "trmk-vcloudexpress",
];

/// Identifier of the in-memory test provider.
pub const STUB_PROVIDER: &str = "stub";

const EC2_FAMILY: &[&str] = &["aws-ec2", "ec2"];

/// Raised when a request names a provider outside the table.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("Provider {provider} not in supported list: {}", .supported.join(", "))]
pub struct UnsupportedProviderError {
    /// Provider id that was requested.
    pub provider: String,
    /// Every supported id, sorted.
    pub supported: Vec<String>,
}

/// Union of supported API and provider ids.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderTable {
    supported: BTreeSet<&'static str>,
}

impl Default for ProviderTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderTable {
    /// Table built from [`SUPPORTED_APIS`] and [`SUPPORTED_PROVIDERS`].
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            supported: SUPPORTED_APIS
                .iter()
                .chain(SUPPORTED_PROVIDERS)
                .copied()
                .collect(),
        }
    }

    /// Returns `true` when `provider` is a known API or provider id.
    #[must_use]
    pub fn is_supported(&self, provider: &str) -> bool {
        self.supported.contains(provider)
    }

    /// Gates a request on `provider` being supported.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedProviderError`] carrying the full supported set.
    pub fn check(&self, provider: &str) -> Result<(), UnsupportedProviderError> {
        if self.is_supported(provider) {
            return Ok(());
        }
        Err(UnsupportedProviderError {
            provider: provider.to_owned(),
            supported: self.supported.iter().map(|id| (*id).to_owned()).collect(),
        })
    }
}

/// Broad provider families with distinct behaviour.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderFamily {
    /// Amazon EC2 and EC2-compatible APIs.
    Ec2,
    /// The in-memory stub provider.
    Stub,
    /// Everything else.
    Generic,
}

/// Provider-specific template adjustment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TemplateAdjustment {
    /// Prefix the image id with the region derived from the zone.
    RegionQualifiedImage,
    /// Apply the requested security groups.
    SecurityGroups,
    /// Apply the requested key pair.
    KeyPair,
    /// Attach non-empty user data.
    UserData,
}

const EC2_ADJUSTMENTS: &[TemplateAdjustment] = &[
    TemplateAdjustment::RegionQualifiedImage,
    TemplateAdjustment::SecurityGroups,
    TemplateAdjustment::KeyPair,
    TemplateAdjustment::UserData,
];

/// Remote-execution transport module wired into a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportModule {
    /// SSH client transport.
    Ssh,
}

/// Session options applied when a compute context is opened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionOptions {
    /// Whether the provider may prefetch its image catalogue on connect.
    pub image_prefetch: bool,
    /// Transport used for remote execution; `None` when the provider has none.
    pub transport: Option<TransportModule>,
}

/// Strategy selected by provider id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderProfile {
    provider: String,
    family: ProviderFamily,
    adjustments: &'static [TemplateAdjustment],
    session: SessionOptions,
}

impl ProviderProfile {
    /// Selects the strategy for `provider`.
    #[must_use]
    pub fn for_provider(provider: &str) -> Self {
        let family = if EC2_FAMILY.contains(&provider) {
            ProviderFamily::Ec2
        } else if provider == STUB_PROVIDER {
            ProviderFamily::Stub
        } else {
            ProviderFamily::Generic
        };

        let (adjustments, session) = match family {
            ProviderFamily::Ec2 => (
                EC2_ADJUSTMENTS,
                SessionOptions {
                    image_prefetch: false,
                    transport: Some(TransportModule::Ssh),
                },
            ),
            ProviderFamily::Stub => (
                &[][..],
                SessionOptions {
                    image_prefetch: true,
                    transport: None,
                },
            ),
            ProviderFamily::Generic => (
                &[][..],
                SessionOptions {
                    image_prefetch: true,
                    transport: Some(TransportModule::Ssh),
                },
            ),
        };

        Self {
            provider: provider.to_owned(),
            family,
            adjustments,
            session,
        }
    }

    /// Provider id this profile was selected for.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Provider family.
    #[must_use]
    pub const fn family(&self) -> ProviderFamily {
        self.family
    }

    /// Ordered template adjustments.
    #[must_use]
    pub const fn adjustments(&self) -> &'static [TemplateAdjustment] {
        self.adjustments
    }

    /// Returns `true` when `adjustment` applies to this provider.
    #[must_use]
    pub fn applies(&self, adjustment: TemplateAdjustment) -> bool {
        self.adjustments.contains(&adjustment)
    }

    /// Session options to apply at open time.
    #[must_use]
    pub const fn session(&self) -> SessionOptions {
        self.session
    }
}
