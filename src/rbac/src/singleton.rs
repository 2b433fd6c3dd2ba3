//! Global roles not bound to any domain object

use crate::error::RbacError;
use crate::types::RoleIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const SYSTEM_ADMINISTRATOR: &str = "system_administrator";
pub const SYSTEM_AUDITOR: &str = "system_auditor";

/// The fixed set of singleton roles the engine knows by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingletonRole {
    /// Held implicitly by superusers
    SystemAdministrator,

    /// Held implicitly by system auditors
    SystemAuditor,
}

impl SingletonRole {
    pub const ALL: [SingletonRole; 2] = [SingletonRole::SystemAdministrator, SingletonRole::SystemAuditor];

    pub fn name(self) -> &'static str {
        match self {
            SingletonRole::SystemAdministrator => SYSTEM_ADMINISTRATOR,
            SingletonRole::SystemAuditor => SYSTEM_AUDITOR,
        }
    }

    pub fn identity(self) -> RoleIdentity {
        RoleIdentity::singleton(self.name())
    }
}

impl fmt::Display for SingletonRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SingletonRole {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.name() == s)
            .ok_or_else(|| RbacError::InvalidRoleIdentity(format!("unknown singleton role: {}", s)))
    }
}
