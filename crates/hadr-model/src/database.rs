//! Databases in a topology and their secrets.

use crate::types::ObjectState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A password supplied inline. Never shown by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps `value`.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The clear-text value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(********)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("********")
    }
}

/// A database the scenario adds to the group or finds already in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSpec {
    /// Database name.
    pub name: String,
    /// Password of the database master key, when the caller supplied it.
    #[serde(default)]
    pub master_key_password: Option<Secret>,
    /// Whether the database is already part of the group.
    #[serde(default)]
    pub state: ObjectState,
}

impl DatabaseSpec {
    /// A database being added.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            master_key_password: None,
            state: ObjectState::Creating,
        }
    }

    /// A database already in the group.
    pub fn existing(name: impl Into<String>) -> Self {
        Self {
            state: ObjectState::Existing,
            ..Self::new(name)
        }
    }

    /// Supply the master key password.
    pub fn with_master_key_password(mut self, password: impl Into<String>) -> Self {
        self.master_key_password = Some(Secret::new(password));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_redacted() {
        let db = DatabaseSpec::new("Sales").with_master_key_password("hunter2");
        let rendered = format!("{db:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("********"));
        assert_eq!(
            db.master_key_password.as_ref().map(Secret::expose),
            Some("hunter2")
        );
    }
}
