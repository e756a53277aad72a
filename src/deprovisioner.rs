//! Node teardown with count verification.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, info};

use crate::compute::{ComputeError, NodeFilter};
use crate::context::ComputeContext;

/// Outcome of a fully successful teardown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeprovisionResult {
    /// Ids the caller asked to destroy.
    pub requested: BTreeSet<String>,
    /// Ids the provider reported destroyed.
    pub destroyed: BTreeSet<String>,
}

/// Raised when the provider destroyed a different number of nodes than
/// requested. Recoverable: the caller may retry or reconcile.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error(
    "Deprovisioned {} of {} machines; requested [{}], destroyed [{}]",
    .destroyed.len(),
    .requested.len(),
    join(.requested),
    join(.destroyed)
)]
pub struct PartialDeprovisionError {
    /// Ids the caller asked to destroy.
    pub requested: BTreeSet<String>,
    /// Ids the provider reported destroyed.
    pub destroyed: BTreeSet<String>,
}

impl PartialDeprovisionError {
    /// Requested ids that were not destroyed.
    #[must_use]
    pub fn missing(&self) -> BTreeSet<String> {
        self.requested.difference(&self.destroyed).cloned().collect()
    }
}

/// Errors raised while destroying nodes.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DeprovisionError {
    /// Destroyed count differs from the requested count.
    #[error(transparent)]
    Partial(PartialDeprovisionError),
    /// The provider call itself failed.
    #[error(transparent)]
    Compute(ComputeError),
}

fn join(ids: &BTreeSet<String>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Destroys the nodes in `group` whose ids are in `ids`.
///
/// # Errors
///
/// Returns [`DeprovisionError::Partial`] when the destroyed count differs from
/// the requested count (an empty request included) and
/// [`DeprovisionError::Compute`] when the provider call fails.
pub async fn destroy(
    context: &ComputeContext,
    ids: &[String],
    group: &str,
) -> Result<DeprovisionResult, DeprovisionError> {
    let requested = ids.iter().cloned().collect::<BTreeSet<_>>();
    let filter = NodeFilter::in_group(group).and(NodeFilter::id_in(requested.iter().cloned()));
    debug!(group, count = requested.len(), "destroying nodes");

    let destroyed = context
        .service()
        .destroy_nodes_matching(&filter)
        .await
        .map_err(DeprovisionError::Compute)?
        .into_iter()
        .map(|node| node.id)
        .collect::<BTreeSet<_>>();

    if requested.is_empty() || destroyed.len() != requested.len() {
        return Err(DeprovisionError::Partial(PartialDeprovisionError {
            requested,
            destroyed,
        }));
    }
    info!(group, count = destroyed.len(), "nodes destroyed");
    Ok(DeprovisionResult {
        requested,
        destroyed,
    })
}
