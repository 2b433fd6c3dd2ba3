//! Closure maintenance tests against the in-memory store

use cretoai_rbac::{
    Accessor, RbacError, ResourceRef, RoleGraph, RoleId, RoleIdentity, RoleSet, UserId,
};

fn team(id: i64, field: &str) -> RoleIdentity {
    RoleIdentity::object(ResourceRef::team(id), field)
}

fn set(ids: &[RoleId]) -> RoleSet {
    ids.iter().copied().collect()
}

// ============================================================================
// Closure correctness
// ============================================================================

#[tokio::test]
async fn test_new_role_reaches_itself() {
    let graph = RoleGraph::in_memory();
    let mut session = graph.begin().await.unwrap();

    let role = session.create_role(team(1, "member_role")).await.unwrap();

    assert_eq!(session.ancestors(role).await.unwrap(), set(&[role]));
    assert_eq!(session.descendents(role).await.unwrap(), set(&[role]));
    session.commit().await.unwrap();
}

#[tokio::test]
async fn test_membership_flows_down_parent_edges() {
    let graph = RoleGraph::in_memory();
    let org = ResourceRef::organization(1);

    let mut session = graph.begin().await.unwrap();
    let org_member = session.create_role(RoleIdentity::object(org, "member_role")).await.unwrap();
    let org_read = session.create_role(RoleIdentity::object(org, "read_role")).await.unwrap();
    let team_member = session.create_role(team(1, "member_role")).await.unwrap();

    session.add_parent(org_read, org_member).await.unwrap();
    session.add_parent(org_member, team_member).await.unwrap();
    session.add_member(team_member, UserId(42)).await.unwrap();
    session.commit().await.unwrap();

    let user = Accessor::user(42);
    assert!(graph.is_member(&user, org_read).await.unwrap());

    let mut session = graph.begin().await.unwrap();
    assert!(session.remove_parent(org_member, team_member).await.unwrap());
    session.commit().await.unwrap();

    assert!(!graph.is_member(&user, org_read).await.unwrap());
    assert!(graph.is_member(&user, team_member).await.unwrap());
}

#[tokio::test]
async fn test_edge_above_existing_subtree_propagates() {
    let graph = RoleGraph::in_memory();
    let mut session = graph.begin().await.unwrap();

    let a = session.create_role(team(1, "admin_role")).await.unwrap();
    let b = session.create_role(team(1, "member_role")).await.unwrap();
    let c = session.create_role(team(1, "read_role")).await.unwrap();
    session.add_parent(c, b).await.unwrap();

    // Wire the top last: c has to pick up a through b
    let stats_before = graph.metrics().await.unwrap();
    session.add_parent(b, a).await.unwrap();

    assert_eq!(session.ancestors(c).await.unwrap(), set(&[a, b, c]));
    assert_eq!(session.descendents(a).await.unwrap(), set(&[a, b, c]));
    assert!(session.verify_closure().await.unwrap().is_consistent());

    let stats_after = graph.metrics().await.unwrap();
    assert_eq!(stats_after.rebuild_passes, stats_before.rebuild_passes + 1);
    assert_eq!(stats_after.entries_inserted - stats_before.entries_inserted, 2);
}

#[tokio::test]
async fn test_diamond_does_not_duplicate_entries() {
    let graph = RoleGraph::in_memory();
    let mut session = graph.begin().await.unwrap();

    let top = session.create_role(team(1, "admin_role")).await.unwrap();
    let left = session.create_role(team(1, "member_role")).await.unwrap();
    let right = session.create_role(team(1, "execute_role")).await.unwrap();
    let bottom = session.create_role(team(1, "read_role")).await.unwrap();

    session.add_parent(left, top).await.unwrap();
    session.add_parent(right, top).await.unwrap();
    session.add_parent(bottom, left).await.unwrap();
    session.add_parent(bottom, right).await.unwrap();

    assert_eq!(session.ancestors(bottom).await.unwrap(), set(&[top, left, right, bottom]));
    let report = session.verify_closure().await.unwrap();
    assert!(report.is_consistent(), "{:?}", report);

    // 4 + 2 + 2 + 1 rows
    session.commit().await.unwrap();
    let metrics = graph.metrics().await.unwrap();
    assert_eq!(metrics.entries_inserted, 9);
}

// ============================================================================
// Removal
// ============================================================================

#[tokio::test]
async fn test_removal_keeps_alternate_path() {
    let graph = RoleGraph::in_memory();
    let mut session = graph.begin().await.unwrap();

    let top = session.create_role(team(1, "admin_role")).await.unwrap();
    let left = session.create_role(team(1, "member_role")).await.unwrap();
    let right = session.create_role(team(1, "execute_role")).await.unwrap();
    let bottom = session.create_role(team(1, "read_role")).await.unwrap();
    session.add_parent(left, top).await.unwrap();
    session.add_parent(right, top).await.unwrap();
    session.add_parent(bottom, left).await.unwrap();
    session.add_parent(bottom, right).await.unwrap();

    session.remove_parent(bottom, left).await.unwrap();

    // top is still reachable through right
    assert_eq!(session.ancestors(bottom).await.unwrap(), set(&[top, right, bottom]));
    assert_eq!(session.ancestors(left).await.unwrap(), set(&[top, left]));
}

#[tokio::test]
async fn test_monotonic_removal() {
    let graph = RoleGraph::in_memory();
    let mut session = graph.begin().await.unwrap();

    let a = session.create_role(team(1, "admin_role")).await.unwrap();
    let b = session.create_role(team(1, "member_role")).await.unwrap();
    let c = session.create_role(team(2, "member_role")).await.unwrap();
    let d = session.create_role(team(1, "read_role")).await.unwrap();
    let e = session.create_role(team(2, "read_role")).await.unwrap();
    session.add_parent(b, a).await.unwrap();
    session.add_parent(d, b).await.unwrap();
    session.add_parent(d, c).await.unwrap();
    session.add_parent(e, d).await.unwrap();

    let before = session.verify_closure().await.unwrap();
    assert!(before.is_consistent());

    session.remove_parent(d, b).await.unwrap();

    // d and e lose {a, b}; nothing else changes
    assert_eq!(session.ancestors(d).await.unwrap(), set(&[c, d]));
    assert_eq!(session.ancestors(e).await.unwrap(), set(&[c, d, e]));
    assert_eq!(session.ancestors(b).await.unwrap(), set(&[a, b]));
    assert_eq!(session.descendents(a).await.unwrap(), set(&[a, b]));

    let metrics = graph.metrics().await.unwrap();
    assert_eq!(metrics.entries_deleted, 4);
}

#[tokio::test]
async fn test_delete_role_rebuilds_children() {
    let graph = RoleGraph::in_memory();
    let mut session = graph.begin().await.unwrap();

    let a = session.create_role(team(1, "admin_role")).await.unwrap();
    let b = session.create_role(team(1, "member_role")).await.unwrap();
    let c = session.create_role(team(1, "read_role")).await.unwrap();
    session.add_parent(b, a).await.unwrap();
    session.add_parent(c, b).await.unwrap();
    session.add_member(b, UserId(3)).await.unwrap();

    session.delete_role(b).await.unwrap();

    assert!(session.role(b).await.unwrap().is_none());
    assert_eq!(session.ancestors(c).await.unwrap(), set(&[c]));
    assert_eq!(session.descendents(a).await.unwrap(), set(&[a]));
    assert!(session.verify_closure().await.unwrap().is_consistent());
    assert!(matches!(session.delete_role(b).await, Err(RbacError::RoleNotFound(_))));
}

#[tokio::test]
async fn test_delete_resource_roles() {
    let graph = RoleGraph::in_memory();
    let org = ResourceRef::organization(7);
    let mut session = graph.begin().await.unwrap();

    let admin = session.create_role(RoleIdentity::object(org, "admin_role")).await.unwrap();
    let read = session.create_role(RoleIdentity::object(org, "read_role")).await.unwrap();
    let team_read = session.create_role(team(1, "read_role")).await.unwrap();
    session.add_parent(read, admin).await.unwrap();
    session.add_parent(team_read, read).await.unwrap();

    assert_eq!(session.delete_resource_roles(org).await.unwrap(), 2);

    assert!(session.roles_for_resource(org).await.unwrap().is_empty());
    assert_eq!(session.ancestors(team_read).await.unwrap(), set(&[team_read]));
    assert!(session.verify_closure().await.unwrap().is_consistent());
}

// ============================================================================
// Idempotence and full rebuilds
// ============================================================================

#[tokio::test]
async fn test_empty_rebuild_is_noop() {
    let graph = RoleGraph::in_memory();
    let mut session = graph.begin().await.unwrap();
    let a = session.create_role(team(1, "admin_role")).await.unwrap();
    let b = session.create_role(team(1, "member_role")).await.unwrap();
    session.add_parent(b, a).await.unwrap();

    let stats = session.rebuild(RoleSet::new(), RoleSet::new()).await.unwrap();

    assert_eq!(stats.sweeps, 0);
    assert!(stats.is_noop());
}

#[tokio::test]
async fn test_rebuild_all_on_consistent_closure_changes_nothing() {
    let graph = RoleGraph::in_memory();
    let mut session = graph.begin().await.unwrap();
    let a = session.create_role(team(1, "admin_role")).await.unwrap();
    let b = session.create_role(team(1, "member_role")).await.unwrap();
    let c = session.create_role(team(1, "read_role")).await.unwrap();
    session.add_parent(b, a).await.unwrap();
    session.add_parent(c, b).await.unwrap();
    session.commit().await.unwrap();

    let stats = graph.rebuild_all().await.unwrap();

    assert!(stats.is_noop());
    assert_eq!(stats.sweeps, 1);
    assert!(graph.verify_closure().await.unwrap().is_consistent());
}

// ============================================================================
// Cycles
// ============================================================================

#[tokio::test]
async fn test_cycle_fails_and_rolls_back() {
    let graph = RoleGraph::in_memory();

    let mut session = graph.begin().await.unwrap();
    let a = session.create_role(team(1, "admin_role")).await.unwrap();
    let b = session.create_role(team(1, "member_role")).await.unwrap();
    session.add_parent(b, a).await.unwrap();
    session.commit().await.unwrap();

    let mut session = graph.begin().await.unwrap();
    let result = session.add_parent(a, b).await;
    match result {
        Err(e @ RbacError::Convergence { .. }) => assert!(e.is_fatal()),
        other => panic!("Expected convergence error, got {:?}", other),
    }
    assert!(session.is_poisoned());
    assert!(matches!(session.commit().await, Err(RbacError::SessionPoisoned(_))));

    // Committed state is untouched
    let mut session = graph.begin().await.unwrap();
    assert!(session.parents(a).await.unwrap().is_empty());
    assert_eq!(session.ancestors(a).await.unwrap(), set(&[a]));
    assert_eq!(session.ancestors(b).await.unwrap(), set(&[a, b]));
    session.rollback().await.unwrap();

    assert_eq!(graph.metrics().await.unwrap().convergence_failures, 1);
}

#[tokio::test]
async fn test_self_parent_fails() {
    let graph = RoleGraph::in_memory();
    let mut session = graph.begin().await.unwrap();
    let a = session.create_role(team(1, "admin_role")).await.unwrap();

    let result = session.add_parent(a, a).await;

    assert!(matches!(result, Err(RbacError::Convergence { .. })));
    session.rollback().await.unwrap();
}

#[tokio::test]
async fn test_not_found_edges() {
    let graph = RoleGraph::in_memory();
    let mut session = graph.begin().await.unwrap();
    let a = session.create_role(team(1, "admin_role")).await.unwrap();

    let err = session.add_parent(RoleId(500), a).await.unwrap_err();
    assert!(err.is_not_found());
    let err = session.remove_parent(a, RoleId(501)).await.unwrap_err();
    assert!(err.is_not_found());

    // Not-found errors leave the session usable
    assert!(!session.is_poisoned());
    session.commit().await.unwrap();
}
