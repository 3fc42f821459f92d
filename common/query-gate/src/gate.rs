//! Query gate: access checks, then SQL validation
//!
//! A single synchronous decision per request. Access checks run first since
//! they are map lookups; the lexical scan only runs for an allowed target.
//! Nothing is rewritten unless every check passes.

use tracing::{debug, warn};

use crate::access::AccessPolicy;
use crate::error::Rejection;
use crate::policy::SecurityPolicy;
use crate::validator::{self, LimitAction, TableReference};

/// One authorization request
#[derive(Debug, Clone, Copy, Default)]
pub struct GateRequest<'a> {
    /// Target project; `None` resolves to the billing project
    pub project_id: Option<&'a str>,
    /// Default dataset for unqualified table names
    pub dataset_id: Option<&'a str>,
    pub query: &'a str,
    /// Caller-requested row limit, used when the query has no LIMIT
    pub row_limit: Option<u64>,
}

impl<'a> GateRequest<'a> {
    pub fn new(query: &'a str) -> Self {
        Self {
            query,
            ..Default::default()
        }
    }

    pub fn project(mut self, project_id: Option<&'a str>) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn dataset(mut self, dataset_id: Option<&'a str>) -> Self {
        self.dataset_id = dataset_id;
        self
    }

    pub fn row_limit(mut self, row_limit: Option<u64>) -> Self {
        self.row_limit = row_limit;
        self
    }
}

/// An allowed request: the final SQL plus where to run it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
    pub query: String,
    pub project_id: String,
    pub dataset_id: Option<String>,
    pub limit: LimitAction,
    /// Fully resolved table references that passed the access check
    pub tables: Vec<TableReference>,
}

/// Decide whether `request` may run under the given policies.
///
/// Returns the first rejection encountered, in this order: project access,
/// dataset access, SQL validation, then access for every table the query
/// names explicitly.
pub fn authorize(
    request: &GateRequest<'_>,
    security: &SecurityPolicy,
    access: &AccessPolicy,
) -> Result<Authorized, Rejection> {
    let result = evaluate(request, security, access);
    match &result {
        Ok(allowed) => debug!(
            project = %allowed.project_id,
            dataset = allowed.dataset_id.as_deref().unwrap_or(""),
            limit = allowed.limit.applied(),
            tables = allowed.tables.len(),
            "Query authorized"
        ),
        Err(rejection) => warn!(
            error_type = rejection.kind().as_str(),
            reason = %rejection,
            "Query rejected"
        ),
    }
    result
}

fn evaluate(
    request: &GateRequest<'_>,
    security: &SecurityPolicy,
    access: &AccessPolicy,
) -> Result<Authorized, Rejection> {
    let project_id = access.resolve_project(request.project_id);
    access.check_project(project_id)?;

    let dataset_id = request.dataset_id.filter(|d| !d.is_empty());
    if let Some(dataset_id) = dataset_id {
        access.check_dataset(project_id, dataset_id)?;
    }

    let validated = validator::validate_with_row_limit(request.query, security, request.row_limit)?;

    let mut tables = Vec::with_capacity(validated.table_refs.len());
    for reference in validated.table_refs {
        let resolved = TableReference {
            project: Some(reference.project.unwrap_or_else(|| project_id.to_string())),
            ..reference
        };
        let table_project = resolved.project.as_deref().unwrap_or(project_id);
        match &resolved.dataset {
            Some(dataset) => access.check_dataset(table_project, dataset)?,
            // Project- and region-wide views list every dataset
            None => {
                let entry = access.check_project(table_project)?;
                if !entry.allows_every_dataset() {
                    return Err(Rejection::DatasetAccess {
                        project: table_project.to_string(),
                        dataset: resolved.name.clone(),
                        patterns: entry.pattern_strings(),
                    });
                }
            }
        }
        tables.push(resolved);
    }

    Ok(Authorized {
        query: validated.sql,
        project_id: project_id.to_string(),
        dataset_id: dataset_id.map(str::to_string),
        limit: validated.limit,
        tables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::ProjectEntry;
    use crate::error::RejectionKind;

    fn access() -> AccessPolicy {
        AccessPolicy::new(
            "proj1",
            vec![
                ProjectEntry::new("proj1", vec!["prod_*".into()]),
                ProjectEntry::new("analytics", vec!["reporting".into()]),
            ],
        )
        .unwrap()
    }

    fn run(project: Option<&str>, dataset: Option<&str>, query: &str) -> Result<Authorized, Rejection> {
        let request = GateRequest::new(query).project(project).dataset(dataset);
        authorize(&request, &SecurityPolicy::default(), &access())
    }

    #[test]
    fn test_project_defaults_to_billing() {
        let allowed = run(None, None, "SELECT 1").unwrap();
        assert_eq!(allowed.project_id, "proj1");
        assert_eq!(allowed.dataset_id, None);
    }

    #[test]
    fn test_access_checked_before_sql() {
        // Bad SQL on a forbidden project reports the project problem
        let err = run(Some("nope"), None, "DROP TABLE x").unwrap_err();
        assert_eq!(err.kind(), RejectionKind::ProjectAccess);

        let err = run(Some("proj1"), Some("staging"), "DROP TABLE x").unwrap_err();
        assert_eq!(err.kind(), RejectionKind::DatasetAccess);
    }

    #[test]
    fn test_table_references_resolved_and_checked() {
        let allowed = run(
            Some("proj1"),
            None,
            "SELECT * FROM prod_sales.orders JOIN `analytics.reporting.daily` USING (id)",
        )
        .unwrap();
        let tables: Vec<String> = allowed.tables.iter().map(|t| t.to_string()).collect();
        assert_eq!(tables, vec!["proj1.prod_sales.orders", "analytics.reporting.daily"]);
    }

    #[test]
    fn test_table_reference_outside_allow_list() {
        let err = run(Some("proj1"), Some("prod_sales"), "SELECT * FROM staging.orders").unwrap_err();
        match err {
            Rejection::DatasetAccess { dataset, .. } => assert_eq!(dataset, "staging"),
            other => panic!("unexpected: {:?}", other),
        }

        let err = run(None, None, "SELECT * FROM `other.prod_x.t`").unwrap_err();
        assert_eq!(err.kind(), RejectionKind::ProjectAccess);
    }

    #[test]
    fn test_project_wide_information_schema_needs_full_access() {
        for query in [
            "SELECT schema_name FROM INFORMATION_SCHEMA.SCHEMATA",
            "SELECT schema_name FROM `region-eu`.INFORMATION_SCHEMA.SCHEMATA",
            "SELECT schema_name FROM region-eu.INFORMATION_SCHEMA.SCHEMATA",
            "SELECT * FROM proj1.`region-us`.INFORMATION_SCHEMA.TABLES",
        ] {
            let err = run(Some("proj1"), None, query).unwrap_err();
            assert_eq!(err.kind(), RejectionKind::DatasetAccess, "query: {}", query);
        }

        let open = AccessPolicy::new(
            "proj1",
            vec![ProjectEntry::new("proj1", vec!["*".into()])],
        )
        .unwrap();
        let request = GateRequest::new("SELECT * FROM `region-eu`.INFORMATION_SCHEMA.SCHEMATA");
        let allowed = authorize(&request, &SecurityPolicy::default(), &open).unwrap();
        assert_eq!(
            allowed.tables[0].to_string(),
            "proj1.region-eu.INFORMATION_SCHEMA.SCHEMATA"
        );
    }

    #[test]
    fn test_dataset_information_schema_follows_dataset_patterns() {
        assert!(run(Some("proj1"), None, "SELECT * FROM prod_sales.INFORMATION_SCHEMA.TABLES").is_ok());
        let err = run(Some("proj1"), None, "SELECT * FROM staging.INFORMATION_SCHEMA.TABLES").unwrap_err();
        assert_eq!(err.kind(), RejectionKind::DatasetAccess);
    }

    #[test]
    fn test_unqualified_table_uses_dataset_argument() {
        assert!(run(Some("proj1"), Some("prod_sales"), "SELECT * FROM orders").is_ok());
    }

    #[test]
    fn test_empty_dataset_treated_as_absent() {
        let allowed = run(Some("proj1"), Some(""), "SELECT 1").unwrap();
        assert_eq!(allowed.dataset_id, None);
    }
}
