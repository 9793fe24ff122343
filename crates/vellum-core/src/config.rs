//! Engine-independent database configuration.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::DatabaseError;
use crate::roles::{Role, RoleSet};
use crate::telemetry::{NoOpTelemetry, Telemetry};

/// What to do when the database does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreateMode {
    #[default]
    CreateIfMissing,
    FailIfMissing,
}

/// What to do when the stored schema is behind the revision set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeMode {
    #[default]
    PerformUpgrades,
    FailInsteadOfUpgrading,
}

/// Configuration consumed read-only by the factory and the sessions.
#[derive(Clone)]
pub struct DatabaseConfiguration {
    create: CreateMode,
    upgrade: UpgradeMode,
    roles: RoleSet,
    default_role: Role,
    owner_role: Role,
    telemetry: Arc<dyn Telemetry>,
}

impl DatabaseConfiguration {
    /// Creates a configuration that opens working connections as
    /// `default_role` and runs schema upgrades as `owner_role`.
    ///
    /// Telemetry defaults to [`NoOpTelemetry`].
    ///
    /// # Errors
    ///
    /// Returns `error-configuration` if either designated role is missing
    /// from `roles`.
    pub fn new(
        roles: RoleSet,
        default_role: impl Into<String>,
        owner_role: impl Into<String>,
    ) -> Result<Self, DatabaseError> {
        let default_role = roles.get(&default_role.into())?.clone();
        let owner_role = roles.get(&owner_role.into())?.clone();

        Ok(Self {
            create: CreateMode::default(),
            upgrade: UpgradeMode::default(),
            roles,
            default_role,
            owner_role,
            telemetry: Arc::new(NoOpTelemetry),
        })
    }

    /// A configuration with a single role used for both setup and work,
    /// for engines such as SQLite that do not authenticate.
    pub fn single_role(role: Role) -> Self {
        Self {
            create: CreateMode::default(),
            upgrade: UpgradeMode::default(),
            roles: RoleSet::single(role.clone()),
            default_role: role.clone(),
            owner_role: role,
            telemetry: Arc::new(NoOpTelemetry),
        }
    }

    pub fn with_create(mut self, create: CreateMode) -> Self {
        self.create = create;
        self
    }

    pub fn with_upgrade(mut self, upgrade: UpgradeMode) -> Self {
        self.upgrade = upgrade;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn create(&self) -> CreateMode {
        self.create
    }

    pub fn upgrade(&self) -> UpgradeMode {
        self.upgrade
    }

    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    /// The role used by `open_connection` and `open_transaction`.
    pub fn default_role(&self) -> &Role {
        &self.default_role
    }

    /// The elevated role used for schema setup and upgrades.
    pub fn owner_role(&self) -> &Role {
        &self.owner_role
    }

    pub fn telemetry(&self) -> &Arc<dyn Telemetry> {
        &self.telemetry
    }
}

impl fmt::Debug for DatabaseConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfiguration")
            .field("create", &self.create)
            .field("upgrade", &self.upgrade)
            .field("roles", &self.roles)
            .field("default_role", &self.default_role.name)
            .field("owner_role", &self.owner_role.name)
            .field("telemetry_no_op", &self.telemetry.is_no_op())
            .finish()
    }
}
