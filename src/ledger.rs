//! Machine ledger carried across provision and deprovision calls.

use serde::{Deserialize, Serialize};

/// Ordered, append-only record of provisioned node ids.
///
/// The ledger lives in the host's work item between calls; provisioning
/// appends to it and deprovisioning only reads it.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MachineLedger {
    ids: Vec<String>,
}

impl MachineLedger {
    /// Empty ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Ledger seeded from previously persisted ids, dropping repeats.
    #[must_use]
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ledger = Self::new();
        for id in ids {
            ledger.append(id);
        }
        ledger
    }

    /// Appends `id` unless it is already recorded. Returns `true` when the
    /// ledger grew.
    pub fn append(&mut self, id: impl Into<String>) -> bool {
        let value = id.into();
        if self.contains(&value) {
            return false;
        }
        self.ids.push(value);
        true
    }

    /// Returns `true` when `id` is recorded.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|known| known == id)
    }

    /// Recorded ids in insertion order.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Number of recorded ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Consumes the ledger, returning the ids.
    #[must_use]
    pub fn into_ids(self) -> Vec<String> {
        self.ids
    }
}
