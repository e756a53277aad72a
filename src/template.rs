//! Template resolution.
//!
//! Turns logical request parameters into a provider template. Provider quirks
//! come from the [`ProviderProfile`]: EC2-family ids need region-qualified
//! image ids and are the only ones that take security groups, key pairs and
//! user data.

use thiserror::Error;

use crate::compute::{ComputeError, ComputeService, Template, TemplateOptions, TemplateSpec};
use crate::provider::{ProviderProfile, TemplateAdjustment};

/// Logical parameters describing the node to create.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TemplateRequest {
    /// Image id as supplied by the caller.
    pub image_id: String,
    /// Hardware profile or flavour id.
    pub hardware_id: String,
    /// Availability zone, if constrained.
    pub zone: Option<String>,
    /// Security groups (EC2 family only).
    pub security_groups: Vec<String>,
    /// Key pair name (EC2 family only).
    pub key_pair: Option<String>,
    /// User-data payload (EC2 family only).
    pub user_data: Option<Vec<u8>>,
}

/// Errors raised while resolving a template.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TemplateError {
    /// A required request field is blank.
    #[error("template request is missing {field}")]
    Validation {
        /// Blank field.
        field: &'static str,
    },
    /// Region-qualified providers cannot resolve an image without a zone.
    #[error("provider {provider} needs an availability zone to qualify image {image_id}")]
    MissingZone {
        /// Provider id.
        provider: String,
        /// Image id that could not be qualified.
        image_id: String,
    },
    /// The zone is too short to carry a region.
    #[error("availability zone '{zone}' does not name a region")]
    InvalidZone {
        /// Offending zone.
        zone: String,
    },
    /// The provider cannot satisfy the image/hardware/location combination.
    #[error("provider cannot satisfy image {image_id} on hardware {hardware_id}: {message}")]
    Unsatisfiable {
        /// Image id sent to the provider.
        image_id: String,
        /// Hardware id sent to the provider.
        hardware_id: String,
        /// Provider message.
        message: String,
    },
    /// Any other provider failure while building the template.
    #[error(transparent)]
    Compute(ComputeError),
}

/// Derives the region from an availability zone by dropping the trailing
/// zone letter (`us-east-1a` → `us-east-1`).
#[must_use]
pub fn region_from_zone(zone: &str) -> Option<String> {
    let mut region = zone.trim().to_owned();
    region.pop()?;
    if region.is_empty() {
        return None;
    }
    Some(region)
}

/// Applies the profile's `TemplateSpec` adjustments to `request`.
///
/// # Errors
///
/// Returns [`TemplateError`] when required fields are blank or a
/// region-qualified image cannot be derived.
pub fn template_spec(
    profile: &ProviderProfile,
    request: &TemplateRequest,
) -> Result<TemplateSpec, TemplateError> {
    if request.image_id.trim().is_empty() {
        return Err(TemplateError::Validation { field: "image_id" });
    }
    if request.hardware_id.trim().is_empty() {
        return Err(TemplateError::Validation {
            field: "hardware_id",
        });
    }

    let location_id = request
        .zone
        .as_deref()
        .map(str::trim)
        .filter(|zone| !zone.is_empty())
        .map(str::to_owned);

    let image_id = if profile.applies(TemplateAdjustment::RegionQualifiedImage) {
        let zone = location_id
            .as_deref()
            .ok_or_else(|| TemplateError::MissingZone {
                provider: profile.provider().to_owned(),
                image_id: request.image_id.clone(),
            })?;
        let region = region_from_zone(zone).ok_or_else(|| TemplateError::InvalidZone {
            zone: zone.to_owned(),
        })?;
        format!("{region}/{}", request.image_id)
    } else {
        request.image_id.clone()
    };

    Ok(TemplateSpec {
        image_id,
        hardware_id: request.hardware_id.clone(),
        location_id,
    })
}

/// Applies the profile's option-level adjustments to `options`.
pub fn apply_options(
    profile: &ProviderProfile,
    request: &TemplateRequest,
    options: &mut TemplateOptions,
) {
    for adjustment in profile.adjustments() {
        match adjustment {
            TemplateAdjustment::RegionQualifiedImage => {}
            TemplateAdjustment::SecurityGroups => {
                options.security_groups.clone_from(&request.security_groups);
            }
            TemplateAdjustment::KeyPair => {
                options.key_pair = request
                    .key_pair
                    .as_deref()
                    .filter(|name| !name.trim().is_empty())
                    .map(str::to_owned);
            }
            TemplateAdjustment::UserData => {
                options.user_data = request
                    .user_data
                    .as_ref()
                    .filter(|payload| !payload.is_empty())
                    .cloned();
            }
        }
    }
}

/// Resolves `request` into a provider template.
///
/// # Errors
///
/// Returns [`TemplateError`] when the request is invalid for the provider or
/// the provider cannot satisfy it.
pub async fn resolve(
    service: &dyn ComputeService,
    profile: &ProviderProfile,
    request: &TemplateRequest,
) -> Result<Template, TemplateError> {
    let spec = template_spec(profile, request)?;
    let mut template = service
        .build_template(&spec)
        .await
        .map_err(|err| match err {
            ComputeError::NoMatchingTemplate { message } => TemplateError::Unsatisfiable {
                image_id: spec.image_id.clone(),
                hardware_id: spec.hardware_id.clone(),
                message,
            },
            other => TemplateError::Compute(other),
        })?;
    apply_options(profile, request, &mut template.options);
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::Connector;
    use crate::context::ContextSpec;
    use crate::stub::StubConnector;
    use rstest::{fixture, rstest};

    #[fixture]
    fn request() -> TemplateRequest {
        TemplateRequest {
            image_id: String::from("ami-123"),
            hardware_id: String::from("t1.micro"),
            zone: Some(String::from("us-east-1a")),
            security_groups: vec![String::from("web"), String::from("ssh")],
            key_pair: Some(String::from("deploy")),
            user_data: Some(b"#!/bin/sh".to_vec()),
        }
    }

    #[rstest]
    #[case("us-east-1a", Some("us-east-1"))]
    #[case("eu-west-2c", Some("eu-west-2"))]
    #[case("a", None)]
    #[case("", None)]
    fn regions_drop_the_zone_letter(#[case] zone: &str, #[case] expected: Option<&str>) {
        assert_eq!(region_from_zone(zone).as_deref(), expected);
    }

    #[rstest]
    #[case("aws-ec2")]
    #[case("ec2")]
    fn ec2_images_are_region_qualified(request: TemplateRequest, #[case] provider: &str) {
        let profile = ProviderProfile::for_provider(provider);
        let spec = template_spec(&profile, &request).expect("spec resolves");
        assert_eq!(spec.image_id, "us-east-1/ami-123");
        assert_eq!(spec.location_id.as_deref(), Some("us-east-1a"));
    }

    #[rstest]
    #[case("stub")]
    #[case("openstack-nova")]
    #[case("gogrid")]
    fn other_images_pass_through(request: TemplateRequest, #[case] provider: &str) {
        let profile = ProviderProfile::for_provider(provider);
        let spec = template_spec(&profile, &request).expect("spec resolves");
        assert_eq!(spec.image_id, "ami-123");
    }

    #[rstest]
    fn ec2_without_zone_is_rejected(mut request: TemplateRequest) {
        request.zone = None;
        let profile = ProviderProfile::for_provider("aws-ec2");
        let err = template_spec(&profile, &request).expect_err("zone required");
        assert!(matches!(err, TemplateError::MissingZone { .. }));
    }

    #[rstest]
    fn absent_zone_leaves_location_unconstrained(mut request: TemplateRequest) {
        request.zone = Some(String::from("  "));
        let profile = ProviderProfile::for_provider("stub");
        let spec = template_spec(&profile, &request).expect("spec resolves");
        assert_eq!(spec.location_id, None);
    }

    #[rstest]
    #[case("", "hw", "image_id")]
    #[case("img", " ", "hardware_id")]
    fn blank_ids_are_rejected(
        mut request: TemplateRequest,
        #[case] image: &str,
        #[case] hardware: &str,
        #[case] field: &'static str,
    ) {
        request.image_id = image.to_owned();
        request.hardware_id = hardware.to_owned();
        let profile = ProviderProfile::for_provider("stub");
        let err = template_spec(&profile, &request).expect_err("blank id");
        assert_eq!(err, TemplateError::Validation { field });
    }

    #[rstest]
    fn ec2_options_are_applied(request: TemplateRequest) {
        let profile = ProviderProfile::for_provider("aws-ec2");
        let mut options = TemplateOptions::default();
        apply_options(&profile, &request, &mut options);
        assert_eq!(options.security_groups, ["web", "ssh"]);
        assert_eq!(options.key_pair.as_deref(), Some("deploy"));
        assert_eq!(options.user_data.as_deref(), Some(&b"#!/bin/sh"[..]));
    }

    #[rstest]
    fn empty_user_data_is_not_attached(mut request: TemplateRequest) {
        request.user_data = Some(Vec::new());
        let profile = ProviderProfile::for_provider("aws-ec2");
        let mut options = TemplateOptions::default();
        apply_options(&profile, &request, &mut options);
        assert_eq!(options.user_data, None);
    }

    #[rstest]
    fn non_ec2_options_are_ignored(request: TemplateRequest) {
        let profile = ProviderProfile::for_provider("openstack-nova");
        let mut options = TemplateOptions::default();
        apply_options(&profile, &request, &mut options);
        assert_eq!(options, TemplateOptions::default());
    }

    #[rstest]
    #[tokio::test]
    async fn resolve_maps_catalogue_misses_to_unsatisfiable(request: TemplateRequest) {
        let connector = StubConnector::new().with_catalog(["ami-999"], ["t1.micro"]);
        let service = connector
            .connect(&ContextSpec::new("stub", "id", "secret"))
            .await
            .expect("stub connects");
        let profile = ProviderProfile::for_provider("stub");
        let err = resolve(service.as_ref(), &profile, &request)
            .await
            .expect_err("image not in catalogue");
        assert!(matches!(err, TemplateError::Unsatisfiable { .. }), "{err}");
    }

    #[rstest]
    #[tokio::test]
    async fn resolve_builds_qualified_ec2_templates(request: TemplateRequest) {
        let connector = StubConnector::emulating_any_provider();
        let service = connector
            .connect(&ContextSpec::new("aws-ec2", "id", "secret"))
            .await
            .expect("stub connects");
        let profile = ProviderProfile::for_provider("aws-ec2");
        let template = resolve(service.as_ref(), &profile, &request)
            .await
            .expect("template resolves");
        assert_eq!(template.image_id, "us-east-1/ami-123");
        assert_eq!(template.options.key_pair.as_deref(), Some("deploy"));
    }
}
