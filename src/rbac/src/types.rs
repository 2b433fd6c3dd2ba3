//! Core role graph types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique role identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub i64);

impl RoleId {
    pub const MIN: RoleId = RoleId(i64::MIN);
    pub const MAX: RoleId = RoleId(i64::MAX);
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "role:{}", self.0)
    }
}

impl From<i64> for RoleId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Unique user identifier (owned by the account layer, opaque here)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    pub const MIN: UserId = UserId(i64::MIN);
    pub const MAX: UserId = UserId(i64::MAX);
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Kind of domain object a role can govern.
///
/// The discriminant is persisted as `content_type_id`, so variants must
/// never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Organization = 1,
    Team = 2,
    Project = 3,
    Inventory = 4,
    Credential = 5,
    JobTemplate = 6,
    WorkflowJobTemplate = 7,
    ExecutionEnvironment = 8,
    InstanceGroup = 9,
    NotificationTemplate = 10,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::Organization,
        ResourceKind::Team,
        ResourceKind::Project,
        ResourceKind::Inventory,
        ResourceKind::Credential,
        ResourceKind::JobTemplate,
        ResourceKind::WorkflowJobTemplate,
        ResourceKind::ExecutionEnvironment,
        ResourceKind::InstanceGroup,
        ResourceKind::NotificationTemplate,
    ];

    /// Persisted `content_type_id` of this kind
    pub fn content_type_id(self) -> i32 {
        self as i32
    }

    /// Inverse of [`ResourceKind::content_type_id`]
    pub fn from_content_type_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.content_type_id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Organization => "organization",
            ResourceKind::Team => "team",
            ResourceKind::Project => "project",
            ResourceKind::Inventory => "inventory",
            ResourceKind::Credential => "credential",
            ResourceKind::JobTemplate => "job_template",
            ResourceKind::WorkflowJobTemplate => "workflow_job_template",
            ResourceKind::ExecutionEnvironment => "execution_environment",
            ResourceKind::InstanceGroup => "instance_group",
            ResourceKind::NotificationTemplate => "notification_template",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the domain object a role governs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: i64,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn organization(id: i64) -> Self {
        Self::new(ResourceKind::Organization, id)
    }

    pub fn team(id: i64) -> Self {
        Self::new(ResourceKind::Team, id)
    }

    pub fn project(id: i64) -> Self {
        Self::new(ResourceKind::Project, id)
    }

    pub fn inventory(id: i64) -> Self {
        Self::new(ResourceKind::Inventory, id)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Identity under which a role is looked up or created
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoleIdentity {
    /// Global role, unique by name
    Singleton { name: String },

    /// Role over one domain object, unique by (object, field)
    Object {
        resource: ResourceRef,
        role_field: String,
    },
}

impl RoleIdentity {
    pub fn singleton(name: impl Into<String>) -> Self {
        RoleIdentity::Singleton { name: name.into() }
    }

    pub fn object(resource: ResourceRef, role_field: impl Into<String>) -> Self {
        RoleIdentity::Object {
            resource,
            role_field: role_field.into(),
        }
    }

    /// Semantic name stored on the role row. Singletons use their name.
    pub fn role_field(&self) -> &str {
        match self {
            RoleIdentity::Singleton { name } => name,
            RoleIdentity::Object { role_field, .. } => role_field,
        }
    }

    pub fn singleton_name(&self) -> Option<&str> {
        match self {
            RoleIdentity::Singleton { name } => Some(name),
            RoleIdentity::Object { .. } => None,
        }
    }

    pub fn resource(&self) -> Option<ResourceRef> {
        match self {
            RoleIdentity::Singleton { .. } => None,
            RoleIdentity::Object { resource, .. } => Some(*resource),
        }
    }
}

impl fmt::Display for RoleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleIdentity::Singleton { name } => write!(f, "singleton:{}", name),
            RoleIdentity::Object {
                resource,
                role_field,
            } => write!(f, "{}.{}", resource, role_field),
        }
    }
}

/// A node in the role graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,

    /// Semantic name ("admin_role", "member_role", ...)
    pub role_field: String,

    /// Set only for global roles
    #[serde(skip_serializing_if = "Option::is_none")]
    pub singleton_name: Option<String>,

    /// Governed domain object, absent for singletons
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
}

impl Role {
    pub fn from_identity(id: RoleId, identity: &RoleIdentity) -> Self {
        Self {
            id,
            role_field: identity.role_field().to_string(),
            singleton_name: identity.singleton_name().map(str::to_string),
            resource: identity.resource(),
        }
    }

    pub fn is_singleton(&self) -> bool {
        self.singleton_name.is_some()
    }

    pub fn identity(&self) -> RoleIdentity {
        match (&self.singleton_name, self.resource) {
            (Some(name), _) => RoleIdentity::singleton(name.clone()),
            (None, Some(resource)) => RoleIdentity::object(resource, self.role_field.clone()),
            // Rows always carry one of the two; fall back to the field name.
            (None, None) => RoleIdentity::singleton(self.role_field.clone()),
        }
    }

    /// Denormalized `content_type_id` column value (0 for singletons)
    pub fn content_type_id(&self) -> i32 {
        self.resource.map(|r| r.kind.content_type_id()).unwrap_or(0)
    }

    /// Denormalized `object_id` column value (0 for singletons)
    pub fn object_id(&self) -> i64 {
        self.resource.map(|r| r.id).unwrap_or(0)
    }
}

/// One row of the ancestor closure table.
///
/// `role_field`, `content_type_id` and `object_id` are copies of the
/// descendent's columns and exist only to serve covering indexes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AncestorEntry {
    pub descendent: RoleId,
    pub ancestor: RoleId,
    pub role_field: String,
    pub content_type_id: i32,
    pub object_id: i64,
}

impl AncestorEntry {
    pub fn new(descendent: &Role, ancestor: RoleId) -> Self {
        Self {
            descendent: descendent.id,
            ancestor,
            role_field: descendent.role_field.clone(),
            content_type_id: descendent.content_type_id(),
            object_id: descendent.object_id(),
        }
    }
}

/// The user an access question is asked about, with the account flags
/// that short-circuit closure lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accessor {
    pub user_id: UserId,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub is_system_auditor: bool,
}

impl Accessor {
    /// Ordinary user without global flags
    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_superuser: false,
            is_system_auditor: false,
        }
    }

    pub fn superuser(user_id: impl Into<UserId>) -> Self {
        Self {
            is_superuser: true,
            ..Self::user(user_id)
        }
    }

    pub fn system_auditor(user_id: impl Into<UserId>) -> Self {
        Self {
            is_system_auditor: true,
            ..Self::user(user_id)
        }
    }
}
