//! Single-node provisioning.
//!
//! Creates exactly one node from a resolved template, records it in the
//! [`MachineLedger`] and picks the address callers will use to reach it.

use thiserror::Error;
use tracing::{debug, info};

use crate::compute::{ComputeError, NodeMetadata, Template};
use crate::context::ComputeContext;
use crate::credentials::LoginCredentials;
use crate::ledger::MachineLedger;
use crate::remote::RemoteExecutionOutcome;
use crate::util::local_hostname;

/// Metadata key carrying the node's display name.
pub const NAME_TAG_KEY: &str = "Name";

/// Outcome of a successful provision call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionResult {
    /// First public address the provider reported.
    pub public_address: String,
    /// Provider-assigned node id.
    pub node_id: String,
    /// Group the node was created in.
    pub group: String,
    /// DNS name reported for the node.
    pub dns_name: String,
    /// Free-form status text for the work item.
    pub body: String,
    /// Remote execution outcomes, in execution order.
    pub outcomes: Vec<RemoteExecutionOutcome>,
}

impl ProvisionResult {
    fn from_node(node: &NodeMetadata, group: &str, public_address: String) -> Self {
        let dns_name = node
            .hostname
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .map_or_else(|| public_address.clone(), str::to_owned);
        Self {
            body: format!("Provisioned machine at {public_address}"),
            public_address,
            node_id: node.id.clone(),
            group: group.to_owned(),
            dns_name,
            outcomes: Vec::new(),
        }
    }

    /// Records remote execution outcomes and summarises them in the body.
    pub fn record_outcomes(&mut self, outcomes: Vec<RemoteExecutionOutcome>) {
        for outcome in &outcomes {
            self.body.push_str(&format!(
                "\nnode {} exited with status {}",
                outcome.node_id, outcome.exit_status
            ));
        }
        self.outcomes.extend(outcomes);
    }
}

/// Errors raised while creating a node.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// The node came up without any public address.
    #[error("node {node_id} has no public address")]
    NoPublicAddress {
        /// Node that was created and ledgered.
        node_id: String,
    },
    /// Node creation or its bootstrap script failed.
    #[error("failed to provision node in group {group}: {message}")]
    Provisioning {
        /// Group the node was requested in.
        group: String,
        /// Provider message.
        message: String,
    },
    /// Any other provider failure.
    #[error(transparent)]
    Compute(ComputeError),
}

/// Builds the `Name` tag `<hostname>.<domain>`, falling back to the local
/// host name when `hostname` is blank.
#[must_use]
pub fn name_tag(hostname: Option<&str>, domain: &str) -> String {
    let host = hostname
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(local_hostname, str::to_owned);
    let suffix = domain.trim().trim_start_matches('.');
    if suffix.is_empty() {
        host
    } else {
        format!("{host}.{suffix}")
    }
}

/// Creates exactly one node in `group` and appends its id to `ledger`.
///
/// When `run_script` is set it runs during creation under `login`; its
/// failure leaves the node in place, ledgers it and is reported as
/// [`ProvisionError::Provisioning`].
///
/// # Errors
///
/// Returns [`ProvisionError`] when creation fails, the provider reports a
/// node count other than one, or the node has no public address.
pub async fn provision_one(
    context: &ComputeContext,
    template: &Template,
    group: &str,
    login: Option<&LoginCredentials>,
    name_tag: &str,
    run_script: Option<&str>,
    ledger: &mut MachineLedger,
) -> Result<ProvisionResult, ProvisionError> {
    let mut node_template = template.clone();
    node_template
        .options
        .user_metadata
        .insert(NAME_TAG_KEY.to_owned(), name_tag.to_owned());
    node_template.options.run_script = run_script
        .filter(|script| !script.trim().is_empty())
        .map(str::to_owned);
    node_template.options.login = login.cloned();

    debug!(
        group,
        image = %node_template.image_id,
        hardware = %node_template.hardware_id,
        bootstrap = node_template.options.run_script.is_some(),
        "creating node"
    );
    let nodes = context
        .service()
        .create_nodes_in_group(group, 1, &node_template)
        .await
        .map_err(|err| match err {
            ComputeError::RunNodes {
                group: failed_group,
                created,
                message,
            } => {
                for id in created {
                    ledger.append(id);
                }
                ProvisionError::Provisioning {
                    group: failed_group,
                    message,
                }
            }
            other => ProvisionError::Compute(other),
        })?;

    let node = match nodes.as_slice() {
        [node] => node,
        other => {
            for extra in other {
                ledger.append(extra.id.clone());
            }
            return Err(ProvisionError::Provisioning {
                group: group.to_owned(),
                message: format!("expected exactly one node, provider returned {}", other.len()),
            });
        }
    };
    ledger.append(node.id.clone());

    let public_address = node
        .public_addresses
        .first()
        .cloned()
        .ok_or_else(|| ProvisionError::NoPublicAddress {
            node_id: node.id.clone(),
        })?;

    info!(node_id = %node.id, address = %public_address, "node provisioned");
    Ok(ProvisionResult::from_node(node, group, public_address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::TemplateOptions;
    use crate::context::ContextSpec;
    use crate::stub::StubConnector;
    use rstest::{fixture, rstest};

    #[fixture]
    fn template() -> Template {
        Template {
            image_id: String::from("img1"),
            hardware_id: String::from("f1"),
            location_id: None,
            options: TemplateOptions::default(),
        }
    }

    async fn open(connector: &StubConnector) -> ComputeContext {
        ComputeContext::open(connector, &ContextSpec::new("stub", "id", "secret"))
            .await
            .expect("stub opens")
    }

    #[rstest]
    #[case(Some("web"), "example.com", "web.example.com")]
    #[case(Some("web"), ".example.com", "web.example.com")]
    #[case(Some("web"), "", "web")]
    fn name_tags_join_host_and_domain(
        #[case] hostname: Option<&str>,
        #[case] domain: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(name_tag(hostname, domain), expected);
    }

    #[test]
    fn blank_hostnames_fall_back_to_the_local_host() {
        let tag = name_tag(Some("  "), "d");
        assert_eq!(tag, format!("{}.d", local_hostname()));
    }

    #[rstest]
    #[tokio::test]
    async fn creates_one_node_and_ledgers_it(template: Template) {
        let connector = StubConnector::new();
        let context = open(&connector).await;
        let mut ledger = MachineLedger::from_ids(["earlier"]);

        let result = provision_one(&context, &template, "g1", None, "web.d", None, &mut ledger)
            .await
            .expect("node provisioned");

        assert_eq!(result.node_id, "1");
        assert_eq!(result.public_address, "144.175.1.1");
        assert_eq!(result.group, "g1");
        assert!(result.dns_name.starts_with("g1-"));
        assert_eq!(result.body, "Provisioned machine at 144.175.1.1");
        assert_eq!(ledger.ids(), ["earlier", "1"]);

        let node = connector.nodes().into_iter().next().expect("node exists");
        assert_eq!(
            node.user_metadata.get(NAME_TAG_KEY).map(String::as_str),
            Some("web.d")
        );
    }

    #[rstest]
    #[tokio::test]
    async fn missing_public_address_still_ledgers_the_node(template: Template) {
        let connector = StubConnector::new();
        connector.omit_public_addresses();
        let context = open(&connector).await;
        let mut ledger = MachineLedger::new();

        let err = provision_one(&context, &template, "g1", None, "web.d", None, &mut ledger)
            .await
            .expect_err("no address");

        assert_eq!(
            err,
            ProvisionError::NoPublicAddress {
                node_id: String::from("1")
            }
        );
        assert_eq!(ledger.ids(), ["1"]);
    }

    #[rstest]
    #[tokio::test]
    async fn bootstrap_runs_with_the_login_user(template: Template) {
        let connector = StubConnector::new();
        let context = open(&connector).await;
        let login = LoginCredentials {
            user: String::from("admin"),
            private_key: String::from("KEY"),
        };
        let mut ledger = MachineLedger::new();

        provision_one(
            &context,
            &template,
            "g1",
            Some(&login),
            "web.d",
            Some("apt-get update"),
            &mut ledger,
        )
        .await
        .expect("node provisioned");

        let runs = connector.script_runs();
        let bootstrap = runs.first().expect("bootstrap recorded");
        assert_eq!(bootstrap.statements, ["apt-get update"]);
        assert_eq!(bootstrap.user.as_deref(), Some("admin"));
    }

    #[rstest]
    #[tokio::test]
    async fn failed_bootstrap_is_a_provisioning_error(template: Template) {
        let connector = StubConnector::new();
        connector.fail_bootstrap(2);
        let context = open(&connector).await;
        let mut ledger = MachineLedger::new();

        let err = provision_one(
            &context,
            &template,
            "g1",
            None,
            "web.d",
            Some("exit 2"),
            &mut ledger,
        )
        .await
        .expect_err("bootstrap fails");

        assert!(matches!(err, ProvisionError::Provisioning { .. }), "{err}");
        assert_eq!(connector.live_nodes().len(), 1);
        assert_eq!(ledger.ids(), [String::from("1")]);
    }

    #[rstest]
    #[tokio::test]
    async fn rejected_credentials_pass_through(template: Template) {
        let connector = StubConnector::new();
        connector.reject_credentials();
        let context = open(&connector).await;
        let mut ledger = MachineLedger::new();

        let err = provision_one(&context, &template, "g1", None, "web.d", None, &mut ledger)
            .await
            .expect_err("credentials rejected");

        assert!(matches!(
            err,
            ProvisionError::Compute(ComputeError::Authorization { .. })
        ));
        assert!(ledger.is_empty());
    }
}
