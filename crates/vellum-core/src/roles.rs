//! Named credential sets used to open connections.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::error::{DatabaseError, ErrorKind};

/// A named credential pair used to open a connection with a specific
/// privilege level.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Role {
    pub fn new(
        name: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Role")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An immutable mapping from role name to [`Role`].
///
/// Every entry is keyed by its own name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSet {
    roles: BTreeMap<String, Role>,
}

impl RoleSet {
    /// Builds a role set from an explicit map.
    ///
    /// # Errors
    ///
    /// Returns `error-configuration` if any key differs from the name of the
    /// role it maps to.
    pub fn new(roles: BTreeMap<String, Role>) -> Result<Self, DatabaseError> {
        for (key, role) in &roles {
            if key != &role.name {
                return Err(DatabaseError::new(
                    ErrorKind::Configuration,
                    format!("Bad role map: name '{}' mapped to role '{}'", key, role.name),
                )
                .with_attribute("key", key)
                .with_attribute("role", &role.name));
            }
        }
        Ok(Self { roles })
    }

    /// A role set holding exactly one role.
    pub fn single(role: Role) -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(role.name.clone(), role);
        Self { roles }
    }

    /// Builds a role set from a list of roles.
    ///
    /// # Errors
    ///
    /// Returns `error-configuration` if two roles share a name.
    pub fn from_roles(roles: impl IntoIterator<Item = Role>) -> Result<Self, DatabaseError> {
        let mut map = BTreeMap::new();
        for role in roles {
            if map.contains_key(&role.name) {
                return Err(DatabaseError::new(
                    ErrorKind::Configuration,
                    format!("Role '{}' is defined more than once", role.name),
                )
                .with_attribute("role", &role.name));
            }
            map.insert(role.name.clone(), role);
        }
        Ok(Self { roles: map })
    }

    /// Looks up a role by name.
    ///
    /// # Errors
    ///
    /// Returns `error-configuration` for an unknown name.
    pub fn get(&self, name: &str) -> Result<&Role, DatabaseError> {
        self.roles.get(name).ok_or_else(|| {
            DatabaseError::new(ErrorKind::Configuration, format!("Unknown role: {}", name))
                .with_attribute("role", name)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
