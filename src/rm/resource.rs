// Transactional resources
//
// A resource is one data source known to the coordinator. Its id is derived
// from the data source name so every process opening the same database
// reports the same id.

use std::fmt;
use std::sync::Arc;

use crate::common::{BranchType, DbType};
use crate::driver::{Conn, Driver};
use crate::error::{AtError, Result};

/// Something the resource manager can enlist in a global transaction
pub trait Resource: Send + Sync {
    fn resource_group_id(&self) -> &str;

    fn resource_id(&self) -> &str;

    fn branch_type(&self) -> BranchType;
}

/// Resource id of a data source name: the part before `?`, with `,` replaced by `|`
pub fn parse_resource_id(dsn: &str) -> String {
    let id = dsn.split('?').next().unwrap_or(dsn);
    id.replace(',', "|")
}

/// A database reachable through a target driver
pub struct DbResource {
    group_id: String,
    resource_id: String,
    branch_type: BranchType,
    db_type: DbType,
    dsn: String,
    driver: Arc<dyn Driver>,
}

impl DbResource {
    pub fn new(
        group_id: impl Into<String>,
        dsn: impl Into<String>,
        db_type: DbType,
        branch_type: BranchType,
        driver: Arc<dyn Driver>,
    ) -> Self {
        let dsn = dsn.into();
        DbResource {
            group_id: group_id.into(),
            resource_id: parse_resource_id(&dsn),
            branch_type,
            db_type,
            dsn,
            driver,
        }
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Fresh connection on the target driver, used for phase-two work
    pub fn connect(&self) -> Result<Box<dyn Conn>> {
        self.driver
            .open(&self.dsn)
            .map_err(|e| AtError::Resource(format!("cannot connect to {}: {}", self.resource_id, e)))
    }
}

impl Resource for DbResource {
    fn resource_group_id(&self) -> &str {
        &self.group_id
    }

    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    fn branch_type(&self) -> BranchType {
        self.branch_type
    }
}

impl fmt::Debug for DbResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbResource")
            .field("group_id", &self.group_id)
            .field("resource_id", &self.resource_id)
            .field("branch_type", &self.branch_type)
            .field("db_type", &self.db_type)
            .finish()
    }
}
