//! Property tests for matching and limit rewriting

use proptest::prelude::*;
use query_gate::{matches, validate, AccessPolicy, LimitAction, ProjectEntry, SecurityPolicy};

fn identifier() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,15}"
}

/// Identifiers usable as a bare column name
fn column() -> impl Strategy<Value = String> {
    identifier().prop_filter("reserved word", |s| !matches!(s.as_str(), "limit" | "drop"))
}

proptest! {
    // ========================================================================
    // Pattern matching
    // ========================================================================

    /// A pattern without wildcards matches only itself
    #[test]
    fn literal_pattern_is_exact(pattern in identifier(), candidate in identifier()) {
        prop_assert_eq!(matches(&pattern, &candidate), pattern == candidate);
        prop_assert!(matches(&pattern, &pattern));
    }

    /// A lone star matches every non-empty candidate
    #[test]
    fn star_matches_any_non_empty(candidate in ".{0,24}") {
        prop_assert_eq!(matches("*", &candidate), !candidate.is_empty());
    }

    /// `prefix*` behaves like starts_with
    #[test]
    fn prefix_pattern_is_starts_with(prefix in identifier(), candidate in identifier()) {
        let pattern = format!("{}*", prefix);
        prop_assert_eq!(matches(&pattern, &candidate), candidate.starts_with(&prefix));
    }

    /// A project with no patterns denies every dataset
    #[test]
    fn empty_pattern_list_denies(dataset in ".{0,24}") {
        let policy = AccessPolicy::new("p", vec![ProjectEntry::new("p", vec![])]).unwrap();
        prop_assert!(!policy.is_dataset_allowed("p", &dataset));
    }

    // ========================================================================
    // Limit rewriting
    // ========================================================================

    /// Limits above the maximum are rewritten to it; others are untouched
    #[test]
    fn clamp_law(n in 1u64..100_000_000, max in 1u64..50_000) {
        let policy = SecurityPolicy::new(["DROP"], 1, max).unwrap();
        let query = format!("SELECT a FROM t LIMIT {}", n);
        let result = validate(&query, &policy).unwrap();

        if n > max {
            prop_assert_eq!(result.sql, format!("SELECT a FROM t LIMIT {}", max));
            prop_assert_eq!(result.limit, LimitAction::Clamped { requested: n, applied: max });
        } else {
            prop_assert_eq!(result.sql, query);
            prop_assert_eq!(result.limit, LimitAction::Kept(n));
        }
    }

    /// Queries without LIMIT get the default appended
    #[test]
    fn default_injection_law(name in column(), default in 1u64..1_000) {
        let policy = SecurityPolicy::new(["DROP"], default, 1_000).unwrap();
        let query = format!("SELECT {} FROM t", name);
        let result = validate(&query, &policy).unwrap();
        prop_assert_eq!(result.sql, format!("{} LIMIT {}", query, default));
    }

    /// Validation never panics, whatever the input
    #[test]
    fn validate_total(query in "\\PC{0,64}") {
        let _ = validate(&query, &SecurityPolicy::default());
    }
}
