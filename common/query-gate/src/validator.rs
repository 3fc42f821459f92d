//! SQL safety validation
//!
//! Lexical checks over a comment-free token view of the query:
//!
//! 1. Banned keywords anywhere in the text (subqueries included)
//! 2. Exactly one statement
//! 3. Statement must be SELECT or WITH ... SELECT (when `select_only`)
//! 4. Outermost LIMIT required, injected or clamped
//!
//! Table paths after FROM, JOIN and commas in a FROM list are collected for
//! the gate's access check. Paths rooted at a range variable in scope
//! (`FROM t AS o, o.items`) are array columns, not tables.
//!
//! String literals and backtick identifiers are opaque to the keyword scan,
//! so `WHERE action = 'DELETE'` passes while `DELETE FROM t` does not.

use std::fmt;

use crate::error::Rejection;
use crate::lexer::{self, Token, TokenKind};
use crate::policy::SecurityPolicy;

/// Leading keywords of statements that can follow a WITH clause
const STATEMENT_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "MERGE", "CREATE", "DROP", "ALTER", "TRUNCATE",
    "CALL", "EXECUTE", "EXPORT", "LOAD", "DECLARE", "SET", "BEGIN", "GRANT", "REVOKE",
];

/// Clause keywords that close a FROM list
const FROM_LIST_ENDS: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "QUALIFY", "WINDOW", "ORDER", "LIMIT", "UNION", "INTERSECT",
    "EXCEPT", "SELECT",
];

/// Keywords that start a query block with its own range variables
const NEW_SCOPE: &[&str] = &["SELECT", "UNION", "INTERSECT", "EXCEPT"];

/// Keywords that can directly follow a table path
const NOT_ALIASES: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "QUALIFY", "WINDOW", "ORDER", "LIMIT", "UNION", "INTERSECT",
    "EXCEPT", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "ON", "USING", "FOR",
    "TABLESAMPLE", "PIVOT", "UNPIVOT", "WITH",
];

/// Words that may precede a subquery paren without making it a function call
const SUBQUERY_PRECEDERS: &[&str] = &[
    "FROM", "JOIN", "AS", "IN", "EXISTS", "ARRAY", "SELECT", "UNION", "ALL", "DISTINCT",
    "INTERSECT", "EXCEPT", "WITH", "ON", "WHERE", "AND", "OR", "NOT", "ANY", "SOME", "USING",
    "HAVING", "THEN", "ELSE", "WHEN", "CASE", "RECURSIVE", "LATERAL", "BY",
];

/// What happened to the row limit of an accepted query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitAction {
    /// Explicit LIMIT within bounds, left as written
    Kept(u64),
    /// No LIMIT present; one was appended
    Injected(u64),
    /// Explicit LIMIT above the maximum, rewritten down
    Clamped { requested: u64, applied: u64 },
}

impl LimitAction {
    pub fn applied(&self) -> u64 {
        match *self {
            LimitAction::Kept(n) | LimitAction::Injected(n) => n,
            LimitAction::Clamped { applied, .. } => applied,
        }
    }
}

/// A table named after FROM or JOIN, as written in the query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableReference {
    /// `None` resolves to the request's project
    pub project: Option<String>,
    /// `None` for project- or region-scoped INFORMATION_SCHEMA views, which
    /// can see every dataset of the project
    pub dataset: Option<String>,
    pub name: String,
}

impl TableReference {
    fn from_path(parts: &[String]) -> Option<Self> {
        let parts: Vec<&str> = parts
            .iter()
            .map(String::as_str)
            .filter(|p| !p.is_empty())
            .collect();

        if let Some(pos) = parts
            .iter()
            .position(|p| p.eq_ignore_ascii_case("INFORMATION_SCHEMA"))
        {
            let view = parts[pos..].join(".");
            let (project, dataset, name) = match parts[..pos] {
                [] => (None, None, view),
                [scope] if is_region(scope) => (None, None, format!("{}.{}", scope, view)),
                [dataset] => (None, Some(dataset), view),
                [project, scope] if is_region(scope) => {
                    (Some(project), None, format!("{}.{}", scope, view))
                }
                [project, dataset] => (Some(project), Some(dataset), view),
                [project, dataset, ..] => (Some(project), Some(dataset), parts[2..].join(".")),
            };
            return Some(Self {
                project: project.map(str::to_string),
                dataset: dataset.map(str::to_string),
                name,
            });
        }

        match parts[..] {
            [] | [_] => None,
            [dataset, table] => Some(Self {
                project: None,
                dataset: Some(dataset.to_string()),
                name: table.to_string(),
            }),
            // Longer paths are checked on their leading project and dataset
            [project, dataset, ..] => Some(Self {
                project: Some(project.to_string()),
                dataset: Some(dataset.to_string()),
                name: parts[2..].join("."),
            }),
        }
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(project) = &self.project {
            write!(f, "{}.", project)?;
        }
        if let Some(dataset) = &self.dataset {
            write!(f, "{}.", dataset)?;
        }
        f.write_str(&self.name)
    }
}

fn is_region(scope: &str) -> bool {
    scope.len() > 7
        && scope
            .get(..7)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("region-"))
}

/// An accepted query, ready for execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    /// Final SQL text: trailing `;` and comments removed, LIMIT applied
    pub sql: String,
    pub limit: LimitAction,
    /// Qualified tables referenced by the statement (empty when the
    /// reference check is disabled)
    pub table_refs: Vec<TableReference>,
}

/// Validate `query` against `policy` using the policy's default row limit
pub fn validate(query: &str, policy: &SecurityPolicy) -> Result<ValidatedQuery, Rejection> {
    validate_with_row_limit(query, policy, None)
}

/// Validate `query`, injecting `row_limit` (clamped to the policy maximum)
/// instead of the default when the query carries no LIMIT of its own.
pub fn validate_with_row_limit(
    query: &str,
    policy: &SecurityPolicy,
    row_limit: Option<u64>,
) -> Result<ValidatedQuery, Rejection> {
    let sql = query.trim();
    if sql.is_empty() {
        return Err(Rejection::sql("Empty SQL query"));
    }
    if row_limit == Some(0) {
        return Err(Rejection::sql("Row limit must be greater than zero"));
    }

    let tokens = lexer::tokenize(sql)
        .map_err(|e| Rejection::sql(format!("Could not tokenize query: {}", e)))?;
    let code = lexer::meaningful(&tokens);

    check_banned_keywords(&code, policy)?;

    let statement = single_statement(&code)?;
    if policy.select_only() {
        check_statement_type(statement)?;
    }

    let table_refs = if policy.check_table_references() {
        table_references(statement)
    } else {
        Vec::new()
    };

    // Everything after the last meaningful token is comments or `;`
    let body_end = statement.last().map_or(0, |t| t.end());
    let (sql, limit) = apply_limit(&sql[..body_end], statement, policy, row_limit)?;

    Ok(ValidatedQuery {
        sql,
        limit,
        table_refs,
    })
}

fn check_banned_keywords(code: &[&Token<'_>], policy: &SecurityPolicy) -> Result<(), Rejection> {
    match code
        .iter()
        .find(|t| t.kind == TokenKind::Word && policy.is_banned(t.text))
    {
        Some(token) => Err(Rejection::Security {
            keyword: token.text.to_ascii_uppercase(),
        }),
        None => Ok(()),
    }
}

/// Tokens of the only statement; a trailing `;` is allowed
fn single_statement<'c, 't, 'a>(
    code: &'c [&'t Token<'a>],
) -> Result<&'c [&'t Token<'a>], Rejection> {
    let statement = match code.iter().position(|t| t.is_punct(';')) {
        None => code,
        Some(idx) => {
            if code[idx + 1..].iter().any(|t| !t.is_punct(';')) {
                return Err(Rejection::sql(
                    "Multiple statements are not allowed; submit a single SELECT query",
                ));
            }
            &code[..idx]
        }
    };

    if statement.is_empty() {
        return Err(Rejection::sql("Query contains no SQL statement"));
    }
    Ok(statement)
}

fn check_statement_type(statement: &[&Token<'_>]) -> Result<(), Rejection> {
    let Some(idx) = statement.iter().position(|t| !t.is_punct('(')) else {
        return Err(Rejection::sql("Query contains no SQL statement"));
    };
    let first = statement[idx];

    if first.is_word("SELECT") {
        Ok(())
    } else if first.is_word("WITH") {
        check_with_resolves_to_select(&statement[idx + 1..])
    } else {
        Err(Rejection::sql(format!(
            "Only SELECT statements and CTEs (WITH) are allowed, got: {}",
            describe(first)
        )))
    }
}

/// Find the statement a WITH clause introduces: the first statement keyword
/// at paren depth zero, or the first token of a parenthesised query that
/// directly follows the last CTE body.
fn check_with_resolves_to_select(after_with: &[&Token<'_>]) -> Result<(), Rejection> {
    let verdict = |token: &Token<'_>| {
        if token.is_word("SELECT") {
            Ok(())
        } else {
            Err(Rejection::sql(format!(
                "WITH clause must be followed by a SELECT, got: {}",
                describe(token)
            )))
        }
    };

    let mut depth = 0i32;
    let mut prev: Option<&Token<'_>> = None;
    for (i, token) in after_with.iter().enumerate() {
        if token.is_punct('(') {
            if depth == 0 && prev.is_some_and(|p| p.is_punct(')')) {
                if let Some(next) = after_with.get(i + 1) {
                    if is_statement_keyword(next) {
                        return verdict(next);
                    }
                }
            }
            depth += 1;
        } else if token.is_punct(')') {
            depth -= 1;
        } else if depth == 0 && is_statement_keyword(token) {
            return verdict(token);
        }
        prev = Some(token);
    }

    Err(Rejection::sql("WITH clause does not resolve to a SELECT statement"))
}

fn is_statement_keyword(token: &Token<'_>) -> bool {
    token.kind == TokenKind::Word
        && STATEMENT_KEYWORDS
            .iter()
            .any(|kw| token.text.eq_ignore_ascii_case(kw))
}

/// Offending token for messages; never echoes literals
fn describe(token: &Token<'_>) -> String {
    match token.kind {
        TokenKind::Word => token.text.to_ascii_uppercase(),
        TokenKind::Literal => "a string literal".to_string(),
        TokenKind::Number => "a number".to_string(),
        TokenKind::QuotedIdent => "a quoted identifier".to_string(),
        _ => format!("'{}'", token.text),
    }
}

/// Index of the last LIMIT keyword at paren depth zero
fn outer_limit(statement: &[&Token<'_>]) -> Option<usize> {
    let mut depth = 0i32;
    let mut found = None;
    for (i, token) in statement.iter().enumerate() {
        if token.is_punct('(') {
            depth += 1;
        } else if token.is_punct(')') {
            depth -= 1;
        } else if depth == 0 && token.is_word("LIMIT") {
            found = Some(i);
        }
    }
    found
}

fn apply_limit(
    body: &str,
    statement: &[&Token<'_>],
    policy: &SecurityPolicy,
    row_limit: Option<u64>,
) -> Result<(String, LimitAction), Rejection> {
    let max = policy.max_row_limit();

    let Some(idx) = outer_limit(statement) else {
        if policy.require_explicit_limit() {
            return Err(Rejection::sql(
                "Query must include an explicit LIMIT clause (for example: LIMIT 100)",
            ));
        }
        let n = row_limit.unwrap_or(policy.default_row_limit()).min(max);
        return Ok((format!("{} LIMIT {}", body, n), LimitAction::Injected(n)));
    };

    let value = statement
        .get(idx + 1)
        .ok_or_else(|| Rejection::sql("LIMIT must be followed by a positive integer"))?;
    let requested = parse_limit(value)?;

    if requested > max {
        let rewritten = format!("{}{}{}", &body[..value.start], max, &body[value.end()..]);
        Ok((
            rewritten,
            LimitAction::Clamped {
                requested,
                applied: max,
            },
        ))
    } else {
        Ok((body.to_string(), LimitAction::Kept(requested)))
    }
}

fn parse_limit(token: &Token<'_>) -> Result<u64, Rejection> {
    if token.is_punct('-') {
        return Err(Rejection::sql(
            "LIMIT must be a positive integer, got a negative value",
        ));
    }
    if token.kind != TokenKind::Number || !token.text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Rejection::sql("LIMIT must be a positive integer literal"));
    }
    // Digits only, so parsing can only fail on overflow
    let n = token.text.parse::<u64>().unwrap_or(u64::MAX);
    if n == 0 {
        return Err(Rejection::sql("LIMIT must be greater than zero"));
    }
    Ok(n)
}

/// Qualified tables following FROM/JOIN. FROM inside a function call
/// (`EXTRACT(YEAR FROM ts)`) is not a table position and is skipped.
fn table_references(statement: &[&Token<'_>]) -> Vec<TableReference> {
    let mut refs: Vec<TableReference> = Vec::new();
    let mut call_stack: Vec<bool> = Vec::new();
    // Paren depths with an open FROM list, where `,` starts another table
    let mut from_lists: Vec<usize> = Vec::new();
    // Range variables in scope with their paren depth: explicit aliases
    // and bare table names
    let mut aliases: Vec<(usize, String)> = Vec::new();
    // First token inside a parenthesised join
    let mut nested_join: Option<usize> = None;

    for (i, token) in statement.iter().enumerate() {
        if token.is_punct('(') {
            let is_call = i > 0 && {
                let prev = statement[i - 1];
                matches!(prev.kind, TokenKind::Word | TokenKind::QuotedIdent)
                    && !SUBQUERY_PRECEDERS
                        .iter()
                        .any(|w| prev.text.eq_ignore_ascii_case(w))
            };
            call_stack.push(is_call);
            continue;
        }
        if token.is_punct(')') {
            call_stack.pop();
            let depth = call_stack.len();
            from_lists.retain(|&d| d <= depth);
            aliases.retain(|(d, _)| *d <= depth);
            continue;
        }

        let depth = call_stack.len();
        let path_start = if nested_join == Some(i) {
            nested_join = None;
            if from_lists.last() != Some(&depth) {
                from_lists.push(depth);
            }
            Some(i)
        } else if token.is_word("FROM") || token.is_word("JOIN") {
            if call_stack.last().copied().unwrap_or(false) {
                continue;
            }
            // `a IS DISTINCT FROM b.col` compares values
            if i > 0 && statement[i - 1].is_word("DISTINCT") {
                continue;
            }
            if token.is_word("FROM") && from_lists.last() != Some(&depth) {
                from_lists.push(depth);
            }
            Some(i + 1)
        } else if token.is_punct(',') {
            (from_lists.last() == Some(&depth)).then_some(i + 1)
        } else {
            if from_lists.last() == Some(&depth) && is_one_of(token, FROM_LIST_ENDS) {
                from_lists.pop();
            }
            if is_one_of(token, NEW_SCOPE) {
                aliases.retain(|(d, _)| *d < depth);
            }
            None
        };
        let Some(start) = path_start else {
            continue;
        };

        // `FROM (a.t JOIN b.u)` nests a join; `FROM (SELECT ...)` is a
        // subquery whose own FROM is picked up when reached
        let opens = statement[start..]
            .iter()
            .take_while(|t| t.is_punct('('))
            .count();
        if opens > 0 {
            if let Some(first) = statement.get(start + opens) {
                if !first.is_word("SELECT") && !first.is_word("WITH") {
                    nested_join = Some(start + opens);
                }
            }
            continue;
        }

        let (parts, after) = read_path(statement, start);
        if parts.is_empty() {
            continue;
        }
        let correlated = parts.len() > 1
            && aliases
                .iter()
                .any(|(_, a)| a.eq_ignore_ascii_case(&parts[0]));
        if let Some(alias) = alias_after(statement, after) {
            aliases.push((depth, alias));
        }
        if let Some(last) = parts.last() {
            aliases.push((depth, last.clone()));
        }
        // `FROM t AS o, o.items` unnests a column of `o`
        if correlated {
            continue;
        }

        if let Some(reference) = TableReference::from_path(&parts) {
            if !refs.contains(&reference) {
                refs.push(reference);
            }
        }
    }

    refs
}

fn is_one_of(token: &Token<'_>, words: &[&str]) -> bool {
    token.kind == TokenKind::Word && words.iter().any(|w| token.text.eq_ignore_ascii_case(w))
}

/// Alias following a table path, `idx` being the token after the path
fn alias_after(statement: &[&Token<'_>], idx: usize) -> Option<String> {
    let token = *statement.get(idx)?;
    let alias = if token.is_word("AS") {
        statement.get(idx + 1).copied()?
    } else {
        token
    };
    match alias.kind {
        TokenKind::Word if !is_one_of(alias, NOT_ALIASES) => Some(alias.text.to_string()),
        TokenKind::QuotedIdent => Some(alias.text.trim_matches('`').to_string()),
        _ => None,
    }
}

/// Read a dotted path such as `proj-1.ds.t`, `` `proj.ds.t` `` or
/// `` `proj` . ds.`t` `` starting at token `start`. Comments and whitespace
/// around `.` are ignored, as GoogleSQL does. Returns the parts and the
/// index of the first token after the path.
fn read_path(statement: &[&Token<'_>], start: usize) -> (Vec<String>, usize) {
    let mut path = String::new();
    let mut idx = start;
    let mut expect_part = true;

    while let Some(token) = statement.get(idx) {
        match token.kind {
            TokenKind::QuotedIdent if expect_part => {
                path.push_str(token.text.trim_matches('`'));
                expect_part = false;
            }
            TokenKind::Word if expect_part => {
                path.push_str(token.text);
                expect_part = false;
            }
            // Numbers swallow dots: `proj-1.ds.t` lexes as `proj - 1.ds.t`
            // and `ds.1t` as `ds .1t`
            TokenKind::Number if expect_part || token.text.starts_with('.') => {
                path.push_str(token.text);
                expect_part = token.text.ends_with('.');
            }
            TokenKind::Punct if !expect_part && token.is_punct('.') => {
                path.push('.');
                expect_part = true;
            }
            // Dashed project names are written without spaces
            TokenKind::Punct if !expect_part && token.is_punct('-') => {
                let glued = statement.get(idx - 1).is_some_and(|p| p.end() == token.start);
                let Some(next) = statement.get(idx + 1) else {
                    break;
                };
                if !glued
                    || next.start != token.end()
                    || !matches!(next.kind, TokenKind::Word | TokenKind::Number)
                {
                    break;
                }
                path.push('-');
                path.push_str(next.text);
                expect_part = next.text.ends_with('.');
                idx += 1;
            }
            _ => break,
        }
        idx += 1;
    }

    let parts = if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').map(str::to_string).collect()
    };
    (parts, idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RejectionKind;

    fn policy() -> SecurityPolicy {
        SecurityPolicy::default()
    }

    fn kind_of(query: &str, policy: &SecurityPolicy) -> RejectionKind {
        validate(query, policy).unwrap_err().kind()
    }

    #[test]
    fn test_simple_select_gets_default_limit() {
        let result = validate("SELECT 1", &policy()).unwrap();
        assert_eq!(result.sql, "SELECT 1 LIMIT 20");
        assert_eq!(result.limit, LimitAction::Injected(20));
    }

    #[test]
    fn test_trailing_semicolon_and_comment_removed_before_injection() {
        let result = validate("  select a from t; -- trailing note\n", &policy()).unwrap();
        assert_eq!(result.sql, "select a from t LIMIT 20");
    }

    #[test]
    fn test_requested_row_limit_is_injected_and_clamped() {
        let result = validate_with_row_limit("SELECT 1", &policy(), Some(50)).unwrap();
        assert_eq!(result.sql, "SELECT 1 LIMIT 50");

        let result = validate_with_row_limit("SELECT 1", &policy(), Some(50_000)).unwrap();
        assert_eq!(result.sql, "SELECT 1 LIMIT 10000");

        assert_eq!(
            validate_with_row_limit("SELECT 1", &policy(), Some(0))
                .unwrap_err()
                .kind(),
            RejectionKind::SqlValidation
        );
    }

    #[test]
    fn test_cte_allowed() {
        let sql = "WITH active AS (SELECT id FROM users WHERE active) SELECT * FROM active";
        assert!(validate(sql, &policy()).is_ok());

        let sql = "WITH a AS (SELECT 1 AS x), b (y) AS (SELECT 2) (SELECT x FROM a)";
        assert!(validate(sql, &policy()).is_ok());
    }

    #[test]
    fn test_cte_must_resolve_to_select() {
        let relaxed = SecurityPolicy::new(["DROP"], 20, 100).unwrap();
        let err = validate(
            "WITH src AS (SELECT 1) INSERT INTO t SELECT * FROM src",
            &relaxed,
        )
        .unwrap_err();
        assert_eq!(err.kind(), RejectionKind::SqlValidation);
        assert!(err.to_string().contains("INSERT"));
    }

    #[test]
    fn test_parenthesised_union() {
        let result = validate("(SELECT 1) UNION ALL (SELECT 2)", &policy()).unwrap();
        assert_eq!(result.sql, "(SELECT 1) UNION ALL (SELECT 2) LIMIT 20");
    }

    #[test]
    fn test_non_select_statements_rejected() {
        let relaxed = SecurityPolicy::new(["GRANT"], 20, 100).unwrap();
        let err = validate("EXPLAIN SELECT 1", &relaxed).unwrap_err();
        assert_eq!(err.kind(), RejectionKind::SqlValidation);
        assert!(err.to_string().contains("EXPLAIN"));
        assert_eq!(kind_of("DECLARE x INT64", &relaxed), RejectionKind::SqlValidation);
    }

    #[test]
    fn test_select_only_disabled_still_bans_keywords() {
        let relaxed = policy().with_select_only(false);
        assert!(validate("EXPLAIN SELECT 1", &relaxed).is_ok());
        assert_eq!(kind_of("DROP TABLE t", &relaxed), RejectionKind::Security);
    }

    #[test]
    fn test_banned_keyword_in_subquery() {
        let err = validate(
            "SELECT * FROM (SELECT * FROM t WHERE id IN (DELETE FROM x))",
            &policy(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            Rejection::Security {
                keyword: "DELETE".into()
            }
        );
    }

    #[test]
    fn test_banned_keyword_case_insensitive() {
        assert_eq!(kind_of("select 1; drop table t", &policy()), RejectionKind::Security);
        assert_eq!(kind_of("Insert into t values (1)", &policy()), RejectionKind::Security);
    }

    #[test]
    fn test_keywords_hidden_in_comments_literals_and_identifiers_ignored() {
        let sql = "SELECT action /* DROP */ FROM `ds.delete_log` -- TRUNCATE\nWHERE action = 'DELETE'";
        assert!(validate(sql, &policy()).is_ok());
    }

    #[test]
    fn test_keyword_substrings_not_matched() {
        assert!(validate("SELECT updated_at, created_by FROM t", &policy()).is_ok());
    }

    #[test]
    fn test_union_all_is_allowed() {
        let sql = "SELECT 'a' AS name, COUNT(*) FROM `p.d.a` UNION ALL SELECT 'b', COUNT(*) FROM `p.d.b`";
        assert!(validate(sql, &policy()).is_ok());
    }

    #[test]
    fn test_multiple_statements_rejected() {
        assert_eq!(kind_of("SELECT 1; SELECT 2", &policy()), RejectionKind::SqlValidation);
        assert!(validate("SELECT 1;;", &policy()).is_ok());
    }

    #[test]
    fn test_empty_and_comment_only_queries() {
        assert_eq!(kind_of("   ", &policy()), RejectionKind::SqlValidation);
        assert_eq!(kind_of("-- nothing here", &policy()), RejectionKind::SqlValidation);
        assert_eq!(kind_of(";", &policy()), RejectionKind::SqlValidation);
    }

    #[test]
    fn test_unterminated_literal_rejected() {
        assert_eq!(kind_of("SELECT 'oops", &policy()), RejectionKind::SqlValidation);
    }

    #[test]
    fn test_explicit_limit_required() {
        let strict = policy().with_require_explicit_limit(true);
        let err = validate("SELECT * FROM t", &strict).unwrap_err();
        assert_eq!(err.kind(), RejectionKind::SqlValidation);
        assert!(err.to_string().contains("LIMIT"));

        assert!(validate("SELECT * FROM t LIMIT 5", &strict).is_ok());
    }

    #[test]
    fn test_nested_limit_does_not_count_as_outer() {
        let strict = policy().with_require_explicit_limit(true);
        assert!(validate("SELECT * FROM (SELECT * FROM t LIMIT 5)", &strict).is_err());

        let result = validate("SELECT * FROM (SELECT * FROM t LIMIT 5)", &policy()).unwrap();
        assert_eq!(result.sql, "SELECT * FROM (SELECT * FROM t LIMIT 5) LIMIT 20");
    }

    #[test]
    fn test_limit_clamped_to_max() {
        let result = validate("SELECT * FROM t LIMIT 999999999", &policy()).unwrap();
        assert_eq!(result.sql, "SELECT * FROM t LIMIT 10000");
        assert_eq!(
            result.limit,
            LimitAction::Clamped {
                requested: 999_999_999,
                applied: 10_000
            }
        );
    }

    #[test]
    fn test_limit_clamp_keeps_offset() {
        let result = validate("SELECT * FROM t LIMIT 50000 OFFSET 10", &policy()).unwrap();
        assert_eq!(result.sql, "SELECT * FROM t LIMIT 10000 OFFSET 10");
    }

    #[test]
    fn test_limit_overflow_is_clamped() {
        let result = validate("SELECT 1 LIMIT 99999999999999999999999", &policy()).unwrap();
        assert_eq!(result.limit.applied(), 10_000);
    }

    #[test]
    fn test_limit_equal_to_max_is_unchanged() {
        let result = validate("SELECT 1 LIMIT 10000", &policy()).unwrap();
        assert_eq!(result.sql, "SELECT 1 LIMIT 10000");
        assert_eq!(result.limit, LimitAction::Kept(10_000));
    }

    #[test]
    fn test_invalid_limit_values() {
        assert_eq!(kind_of("SELECT 1 LIMIT 0", &policy()), RejectionKind::SqlValidation);
        assert_eq!(kind_of("SELECT 1 LIMIT -5", &policy()), RejectionKind::SqlValidation);
        assert_eq!(kind_of("SELECT 1 LIMIT 2.5", &policy()), RejectionKind::SqlValidation);
        assert_eq!(kind_of("SELECT 1 LIMIT @n", &policy()), RejectionKind::SqlValidation);
        assert_eq!(kind_of("SELECT 1 LIMIT", &policy()), RejectionKind::SqlValidation);
    }

    #[test]
    fn test_table_references() {
        let sql = "SELECT * FROM `proj.sales.orders` o \
                   JOIN prod_sales.customers c ON o.id = c.id \
                   LEFT JOIN my-proj.ds.t USING (id)";
        let refs = validate(sql, &policy()).unwrap().table_refs;
        let rendered: Vec<String> = refs.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["proj.sales.orders", "prod_sales.customers", "my-proj.ds.t"]
        );
        assert_eq!(refs[1].project, None);
    }

    fn rendered_refs(sql: &str) -> Vec<String> {
        validate(sql, &policy())
            .unwrap()
            .table_refs
            .iter()
            .map(|r| r.to_string())
            .collect()
    }

    #[test]
    fn test_parenthesised_join_references() {
        assert_eq!(
            rendered_refs("SELECT * FROM (secret.t CROSS JOIN prod_sales.y)"),
            vec!["secret.t", "prod_sales.y"]
        );
        assert_eq!(
            rendered_refs("SELECT * FROM ((a.t JOIN b.u USING (id)) JOIN c.v USING (id))"),
            vec!["a.t", "b.u", "c.v"]
        );
        assert_eq!(
            rendered_refs("SELECT * FROM x.y JOIN (secret.t, other.u) ON TRUE"),
            vec!["x.y", "secret.t", "other.u"]
        );
        // Subqueries are still read through their own FROM
        assert_eq!(
            rendered_refs("SELECT * FROM ((SELECT * FROM ds.t))"),
            vec!["ds.t"]
        );
    }

    #[test]
    fn test_paths_split_by_comments_and_whitespace() {
        for sql in [
            "SELECT * FROM secret . t",
            "SELECT * FROM `secret` . t",
            "SELECT * FROM secret/**/.t",
            "SELECT * FROM secret -- note\n.t",
            "SELECT * FROM secret.\n`t`",
        ] {
            assert_eq!(rendered_refs(sql), vec!["secret.t"], "sql: {}", sql);
        }
        assert_eq!(
            rendered_refs("SELECT * FROM my-proj-1.ds . `t` AS x"),
            vec!["my-proj-1.ds.t"]
        );
        assert_eq!(rendered_refs("SELECT * FROM ds.1t"), vec!["ds.1t"]);
    }

    #[test]
    fn test_long_paths_are_checked_on_leading_parts() {
        let refs = validate("SELECT * FROM p.secret.t.extra", &policy())
            .unwrap()
            .table_refs;
        assert_eq!(refs[0].project.as_deref(), Some("p"));
        assert_eq!(refs[0].dataset.as_deref(), Some("secret"));
    }

    #[test]
    fn test_table_references_skip_ctes_and_function_from() {
        let sql = "WITH x AS (SELECT EXTRACT(YEAR FROM t.created_at) AS y FROM ds.t) \
                   SELECT * FROM x WHERE x.y IS DISTINCT FROM x.z";
        let refs = validate(sql, &policy()).unwrap().table_refs;
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].to_string(), "ds.t");
    }

    #[test]
    fn test_comma_join_references() {
        let sql = "SELECT * FROM prod_sales.orders o, other.secrets s \
                   JOIN prod_sales.c ON s.id = c.id, third.t \
                   WHERE o.id IN (1, 2) ORDER BY a, b";
        let rendered: Vec<String> = validate(sql, &policy())
            .unwrap()
            .table_refs
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(
            rendered,
            vec!["prod_sales.orders", "other.secrets", "prod_sales.c", "third.t"]
        );
    }

    #[test]
    fn test_correlated_paths_are_not_tables() {
        let sql = "SELECT * FROM ds.orders AS o, o.items, UNNEST(o.tags) AS tag";
        let refs = validate(sql, &policy()).unwrap().table_refs;
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].to_string(), "ds.orders");
    }

    #[test]
    fn test_aliases_do_not_leak_across_query_blocks() {
        let sql = "SELECT a FROM ds.t AS o UNION ALL SELECT a FROM o.secret";
        let rendered: Vec<String> = validate(sql, &policy())
            .unwrap()
            .table_refs
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(rendered, vec!["ds.t", "o.secret"]);

        let sql = "SELECT * FROM (SELECT * FROM ds.t AS o) JOIN o.secret USING (id)";
        let refs = validate(sql, &policy()).unwrap().table_refs;
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn test_information_schema_references() {
        let refs = validate(
            "SELECT * FROM `region-eu`.INFORMATION_SCHEMA.JOBS",
            &policy(),
        )
        .unwrap()
        .table_refs;
        assert_eq!(refs[0].project, None);
        assert_eq!(refs[0].dataset, None);

        let refs = validate("SELECT * FROM INFORMATION_SCHEMA.SCHEMATA", &policy())
            .unwrap()
            .table_refs;
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].dataset, None);

        let refs = validate("SELECT * FROM ds.INFORMATION_SCHEMA.TABLES", &policy())
            .unwrap()
            .table_refs;
        assert_eq!(refs[0].dataset.as_deref(), Some("ds"));
        assert_eq!(refs[0].name, "INFORMATION_SCHEMA.TABLES");
    }

    #[test]
    fn test_reference_check_can_be_disabled() {
        let relaxed = policy().with_table_reference_check(false);
        let refs = validate("SELECT * FROM a.b.c", &relaxed).unwrap().table_refs;
        assert!(refs.is_empty());
    }
}
