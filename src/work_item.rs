//! Flat field map exchanged with the host workflow engine.
//!
//! The host owns persistence; this module only reads and writes typed values
//! under the documented field names. Absence of [`fields::ERROR`] after a call
//! signals success.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ledger::MachineLedger;

/// Field names understood by the worker.
pub mod fields {
    /// Provider or API id.
    pub const TYPE: &str = "type";
    /// Provider identity.
    pub const KEY_ID: &str = "key_id";
    /// Provider credential.
    pub const KEY: &str = "key";
    /// Space-delimited security groups.
    pub const GROUPS: &str = "groups";
    /// Domain for the node's `Name` tag.
    pub const DOMAIN: &str = "domain";
    /// Key pair name.
    pub const KEY_NAME: &str = "key_name";
    /// Image id.
    pub const IMAGE_ID: &str = "image_id";
    /// Hardware or flavour id.
    pub const FLAVOR_ID: &str = "flavor_id";
    /// Availability zone.
    pub const AVAILABILITY_ZONE: &str = "availability_zone";
    /// Ordered remote commands.
    pub const SSH_COMMANDS: &str = "ssh_commands";
    /// Command run after `ssh_commands` when provisioning.
    pub const PROVISION_COMMAND: &str = "provision_command";
    /// Command run after `ssh_commands` when deprovisioning.
    pub const DEPROVISION_COMMAND: &str = "deprovision_command";
    /// Bootstrap script run during creation.
    pub const BOOTSTRAP: &str = "bootstrap";
    /// User-data payload.
    pub const USER_DATA: &str = "user_data";
    /// Host name for the `Name` tag.
    pub const HOSTNAME: &str = "hostname";
    /// Private key path.
    pub const PRIVATE_KEY_PATH: &str = "private_key_path";
    /// Login user.
    pub const SSH_USER: &str = "ssh_user";
    /// Public address of the new node.
    pub const IP: &str = "ip";
    /// Id of the new node.
    pub const INSTANCE_ID: &str = "instance_id";
    /// DNS name of the new node.
    pub const INSTANCE_DNS: &str = "instance_dns";
    /// Free-form status text.
    pub const BODY: &str = "body";
    /// Ledger of provisioned node ids.
    pub const MACHINES: &str = "machines";
    /// Error channel.
    pub const ERROR: &str = "error";
}

/// Errors raised while reading the field map.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WorkItemError {
    /// A required field is absent, null or blank.
    #[error("missing required field {field}")]
    Missing {
        /// Field name.
        field: &'static str,
    },
    /// A field holds a value of the wrong type.
    #[error("field {field} must be {expected}")]
    InvalidType {
        /// Field name.
        field: &'static str,
        /// Description of the expected type.
        expected: &'static str,
    },
}

/// JSON object holding the work item's fields.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WorkItem {
    fields: Map<String, Value>,
}

impl From<Map<String, Value>> for WorkItem {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl WorkItem {
    /// Empty work item.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value stored under `field`.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Stores a raw value under `field`.
    pub fn insert(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_owned(), value.into());
    }

    /// Consumes the work item, returning the underlying map.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    /// String under `field`; absent, null and blank values read as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkItemError::InvalidType`] when the value is not a string.
    pub fn optional_str(&self, field: &'static str) -> Result<Option<&str>, WorkItemError> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.as_str())),
            Some(_) => Err(WorkItemError::InvalidType {
                field,
                expected: "a string",
            }),
        }
    }

    /// Non-blank string under `field`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkItemError::Missing`] when the value is absent or blank
    /// and [`WorkItemError::InvalidType`] when it is not a string.
    pub fn require_str(&self, field: &'static str) -> Result<&str, WorkItemError> {
        self.optional_str(field)?
            .ok_or(WorkItemError::Missing { field })
    }

    /// List of strings under `field`; absent and null values read as empty.
    ///
    /// # Errors
    ///
    /// Returns [`WorkItemError::InvalidType`] when the value is not a list of
    /// strings.
    pub fn string_list(&self, field: &'static str) -> Result<Vec<String>, WorkItemError> {
        let invalid = WorkItemError::InvalidType {
            field,
            expected: "a list of strings",
        };
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_owned).ok_or_else(|| invalid.clone()))
                .collect(),
            Some(_) => Err(invalid),
        }
    }

    /// List of strings under `field`, which must be present.
    ///
    /// # Errors
    ///
    /// Returns [`WorkItemError::Missing`] when the value is absent or null
    /// and [`WorkItemError::InvalidType`] when it is not a list of strings.
    pub fn require_list(&self, field: &'static str) -> Result<Vec<String>, WorkItemError> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Err(WorkItemError::Missing { field }),
            Some(_) => self.string_list(field),
        }
    }

    /// Stores a string under `field`.
    pub fn set_str(&mut self, field: &str, value: impl Into<String>) {
        self.insert(field, Value::String(value.into()));
    }

    /// Ledger stored under [`fields::MACHINES`]; empty when absent.
    ///
    /// # Errors
    ///
    /// Returns [`WorkItemError::InvalidType`] when the field is not a list of
    /// strings.
    pub fn ledger(&self) -> Result<MachineLedger, WorkItemError> {
        self.string_list(fields::MACHINES)
            .map(MachineLedger::from_ids)
    }

    /// Writes `ledger` back under [`fields::MACHINES`].
    pub fn set_ledger(&mut self, ledger: &MachineLedger) {
        let ids = ledger
            .ids()
            .iter()
            .cloned()
            .map(Value::String)
            .collect::<Vec<_>>();
        self.insert(fields::MACHINES, Value::Array(ids));
    }

    /// Error message left by the last call, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.fields.get(fields::ERROR).and_then(Value::as_str)
    }

    /// Records a failure.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.set_str(fields::ERROR, message);
    }

    /// Clears any failure left by an earlier call.
    pub fn clear_error(&mut self) {
        self.fields.remove(fields::ERROR);
    }
}
