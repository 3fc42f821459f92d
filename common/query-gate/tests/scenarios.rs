//! End-to-end gate scenarios
//!
//! Each test drives `authorize` the way the MCP server does: a project, an
//! optional dataset and the raw query text from the agent.

use query_gate::{
    authorize, AccessPolicy, GateRequest, LimitAction, PolicySnapshot, PolicyStore, ProjectEntry,
    Rejection, RejectionKind, SecurityPolicy,
};

fn access() -> AccessPolicy {
    AccessPolicy::new(
        "proj1",
        vec![ProjectEntry::new("proj1", vec!["prod_*".into()])],
    )
    .unwrap()
}

fn gate(
    project: &str,
    dataset: &str,
    query: &str,
    security: &SecurityPolicy,
) -> Result<query_gate::Authorized, Rejection> {
    let request = GateRequest::new(query)
        .project(Some(project))
        .dataset(Some(dataset));
    authorize(&request, security, &access())
}

// ============================================================================
// Allowed
// ============================================================================

#[test]
fn allowed_select_gets_default_limit() {
    let security = SecurityPolicy::default();
    let allowed = gate("proj1", "prod_sales", "SELECT 1", &security).unwrap();

    assert_eq!(allowed.query, "SELECT 1 LIMIT 20");
    assert_eq!(allowed.project_id, "proj1");
    assert_eq!(allowed.dataset_id.as_deref(), Some("prod_sales"));
    assert_eq!(allowed.limit, LimitAction::Injected(20));
}

#[test]
fn allowed_limit_clamped_to_maximum() {
    let security = SecurityPolicy::default();
    let allowed = gate(
        "proj1",
        "prod_sales",
        "SELECT * FROM t LIMIT 999999999",
        &security,
    )
    .unwrap();

    assert_eq!(allowed.query, "SELECT * FROM t LIMIT 10000");
    assert_eq!(allowed.limit.applied(), 10_000);
}

// ============================================================================
// Rejected
// ============================================================================

#[test]
fn rejected_dataset_outside_patterns() {
    let err = gate("proj1", "staging_x", "SELECT 1", &SecurityPolicy::default()).unwrap_err();
    assert_eq!(err.kind(), RejectionKind::DatasetAccess);
    assert!(err.suggested_action().contains("list_datasets"));
}

#[test]
fn rejected_unknown_project() {
    let err = gate("proj2", "prod_sales", "SELECT 1", &SecurityPolicy::default()).unwrap_err();
    assert_eq!(err.kind(), RejectionKind::ProjectAccess);
    assert!(err.to_string().contains("proj1"));
    assert!(err.suggested_action().contains("list_projects"));
}

#[test]
fn rejected_drop_statement_names_keyword() {
    let err = gate(
        "proj1",
        "prod_sales",
        "DROP TABLE prod_sales.t",
        &SecurityPolicy::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), RejectionKind::Security);
    assert!(err.to_string().contains("DROP"));
}

#[test]
fn rejected_missing_explicit_limit() {
    let security = SecurityPolicy::default().with_require_explicit_limit(true);
    let err = gate(
        "proj1",
        "prod_sales",
        "SELECT * FROM prod_sales.t",
        &security,
    )
    .unwrap_err();
    assert_eq!(err.kind(), RejectionKind::SqlValidation);
}

#[test]
fn rejected_table_hidden_in_parenthesised_join() {
    let err = gate(
        "proj1",
        "prod_sales",
        "SELECT * FROM (secret.t CROSS JOIN prod_sales.y)",
        &SecurityPolicy::default(),
    )
    .unwrap_err();
    match err {
        Rejection::DatasetAccess { dataset, .. } => assert_eq!(dataset, "secret"),
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn rejected_table_path_with_spaced_dots() {
    for query in [
        "SELECT * FROM secret . t",
        "SELECT * FROM `secret` . t",
        "SELECT * FROM secret/**/.t",
    ] {
        let err = gate("proj1", "prod_sales", query, &SecurityPolicy::default()).unwrap_err();
        assert_eq!(err.kind(), RejectionKind::DatasetAccess, "query: {}", query);
    }
}

#[test]
fn rejected_region_information_schema_on_restricted_project() {
    let err = gate(
        "proj1",
        "prod_sales",
        "SELECT schema_name FROM `region-us`.INFORMATION_SCHEMA.SCHEMATA",
        &SecurityPolicy::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), RejectionKind::DatasetAccess);
}

#[test]
fn rejection_message_does_not_echo_query() {
    let query = "SELECT secret_value FROM t WHERE token = 'abc123'; DELETE FROM t";
    let err = gate("proj1", "prod_sales", query, &SecurityPolicy::default()).unwrap_err();
    let message = err.to_string();
    assert!(!message.contains("abc123"));
    assert!(!message.contains("secret_value"));
}

// ============================================================================
// Determinism and snapshots
// ============================================================================

#[test]
fn authorize_is_idempotent() {
    let security = SecurityPolicy::default();
    for query in [
        "SELECT 1",
        "SELECT * FROM t LIMIT 50000",
        "DROP TABLE t",
        "WITH a AS (SELECT 1) SELECT * FROM a",
    ] {
        let first = gate("proj1", "prod_sales", query, &security);
        let second = gate("proj1", "prod_sales", query, &security);
        assert_eq!(first, second, "query: {}", query);
    }
}

#[test]
fn reload_changes_decisions_for_new_requests_only() {
    let store = PolicyStore::new(PolicySnapshot::new(access(), SecurityPolicy::default()));
    let request = GateRequest::new("SELECT 1")
        .project(Some("proj1"))
        .dataset(Some("prod_sales"));

    let before = store.load();
    assert!(before.authorize(&request).is_ok());

    let narrowed = AccessPolicy::new(
        "proj1",
        vec![ProjectEntry::new("proj1", vec!["shared".into()])],
    )
    .unwrap();
    store.publish(PolicySnapshot::new(narrowed, SecurityPolicy::default()));

    assert!(before.authorize(&request).is_ok());
    assert_eq!(
        store.load().authorize(&request).unwrap_err().kind(),
        RejectionKind::DatasetAccess
    );
}
