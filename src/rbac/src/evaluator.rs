//! Access evaluation over the ancestor closure
//!
//! Every question is answered from closure rows plus direct memberships.
//! The evaluator never walks parent edges and never triggers a rebuild, so
//! answers given inside an open batch reflect the closure as of the last
//! flush.

use crate::config::RbacConfig;
use crate::error::{RbacError, Result};
use crate::singleton::SYSTEM_AUDITOR;
use crate::store::{GraphTransaction, RoleSet};
use crate::types::{Accessor, ResourceKind, ResourceRef, RoleId};
use std::collections::BTreeSet;
use tracing::debug;

/// Membership and visibility queries
#[derive(Debug, Clone)]
pub struct AccessEvaluator {
    auditor_readable_fields: BTreeSet<String>,
}

impl AccessEvaluator {
    pub fn new<I, S>(auditor_readable_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            auditor_readable_fields: auditor_readable_fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &RbacConfig) -> Self {
        Self::new(config.auditor_readable_fields.iter().cloned())
    }

    /// Whether a system auditor implicitly holds roles with this field
    pub fn is_auditor_readable(&self, role_field: &str) -> bool {
        self.auditor_readable_fields.contains(role_field)
    }

    /// Whether the accessor holds `role`, directly or through an ancestor.
    ///
    /// Superusers hold every role. System auditors hold the
    /// `system_auditor` singleton and every auditor-readable role.
    pub async fn is_member(
        &self,
        tx: &mut dyn GraphTransaction,
        accessor: &Accessor,
        role: RoleId,
    ) -> Result<bool> {
        let role = tx.get_role(role).await?.ok_or(RbacError::RoleNotFound(role))?;

        if accessor.is_superuser {
            return Ok(true);
        }
        if accessor.is_system_auditor
            && (role.singleton_name.as_deref() == Some(SYSTEM_AUDITOR)
                || self.is_auditor_readable(&role.role_field))
        {
            return Ok(true);
        }

        tx.is_member_of_ancestor(accessor.user_id, role.id).await
    }

    /// Roles the accessor may list: ancestors of every role the accessor
    /// holds. Superusers and system auditors see every role.
    pub async fn visible_roles(&self, tx: &mut dyn GraphTransaction, accessor: &Accessor) -> Result<RoleSet> {
        if accessor.is_superuser || accessor.is_system_auditor {
            return tx.all_role_ids().await;
        }

        let visible = tx.visible_role_ids(accessor.user_id).await?;
        debug!("{} can see {} roles", accessor.user_id, visible.len());
        Ok(visible)
    }

    /// Role fields the accessor holds on one domain object
    pub async fn roles_on_resource(
        &self,
        tx: &mut dyn GraphTransaction,
        accessor: &Accessor,
        resource: ResourceRef,
    ) -> Result<BTreeSet<String>> {
        if accessor.is_superuser {
            return tx.role_fields_defined(resource).await;
        }

        let mut fields = tx.role_fields_held(accessor.user_id, resource).await?;
        if accessor.is_system_auditor {
            let defined = tx.role_fields_defined(resource).await?;
            fields.extend(defined.into_iter().filter(|f| self.is_auditor_readable(f)));
        }
        Ok(fields)
    }

    /// Ids of objects of `kind` on which the accessor holds `role_field`
    pub async fn accessible_objects(
        &self,
        tx: &mut dyn GraphTransaction,
        accessor: &Accessor,
        kind: ResourceKind,
        role_field: &str,
    ) -> Result<BTreeSet<i64>> {
        if accessor.is_superuser || (accessor.is_system_auditor && self.is_auditor_readable(role_field)) {
            return tx.object_ids_with_role(kind, role_field).await;
        }
        tx.accessible_object_ids(accessor.user_id, kind, role_field).await
    }
}

impl Default for AccessEvaluator {
    fn default() -> Self {
        Self::from_config(&RbacConfig::default())
    }
}
