//! SQL security policy

use std::collections::BTreeSet;

use crate::error::PolicyError;

/// Keywords rejected anywhere in a statement unless configured otherwise
pub const DEFAULT_BANNED_KEYWORDS: &[&str] = &[
    "CREATE", "DELETE", "DROP", "TRUNCATE", "ALTER", "INSERT", "UPDATE", "GRANT", "REVOKE",
    "MERGE", "CALL", "EXECUTE", "SCRIPT",
];

pub const DEFAULT_ROW_LIMIT: u64 = 20;
pub const MAX_ROW_LIMIT: u64 = 10_000;

/// Rules applied to every query text before it reaches BigQuery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    banned_keywords: BTreeSet<String>,
    select_only: bool,
    require_explicit_limit: bool,
    check_table_references: bool,
    default_row_limit: u64,
    max_row_limit: u64,
}

impl SecurityPolicy {
    /// Build a policy; keywords are uppercased and limits validated
    pub fn new<I, S>(
        banned_keywords: I,
        default_row_limit: u64,
        max_row_limit: u64,
    ) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if default_row_limit == 0 || max_row_limit == 0 {
            return Err(PolicyError::NonPositiveLimit {
                default: default_row_limit,
                max: max_row_limit,
            });
        }
        if default_row_limit > max_row_limit {
            return Err(PolicyError::DefaultExceedsMax {
                default: default_row_limit,
                max: max_row_limit,
            });
        }

        let banned_keywords = banned_keywords
            .into_iter()
            .map(|kw| normalize_keyword(kw.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Self {
            banned_keywords,
            select_only: true,
            require_explicit_limit: false,
            check_table_references: true,
            default_row_limit,
            max_row_limit,
        })
    }

    pub fn with_select_only(mut self, select_only: bool) -> Self {
        self.select_only = select_only;
        self
    }

    pub fn with_require_explicit_limit(mut self, required: bool) -> Self {
        self.require_explicit_limit = required;
        self
    }

    pub fn with_table_reference_check(mut self, enabled: bool) -> Self {
        self.check_table_references = enabled;
        self
    }

    pub fn banned_keywords(&self) -> &BTreeSet<String> {
        &self.banned_keywords
    }

    pub fn is_banned(&self, word: &str) -> bool {
        self.banned_keywords.contains(&word.to_ascii_uppercase())
    }

    pub fn select_only(&self) -> bool {
        self.select_only
    }

    pub fn require_explicit_limit(&self) -> bool {
        self.require_explicit_limit
    }

    pub fn check_table_references(&self) -> bool {
        self.check_table_references
    }

    pub fn default_row_limit(&self) -> u64 {
        self.default_row_limit
    }

    pub fn max_row_limit(&self) -> u64 {
        self.max_row_limit
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            banned_keywords: DEFAULT_BANNED_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            select_only: true,
            require_explicit_limit: false,
            check_table_references: true,
            default_row_limit: DEFAULT_ROW_LIMIT,
            max_row_limit: MAX_ROW_LIMIT,
        }
    }
}

fn normalize_keyword(keyword: &str) -> Result<String, PolicyError> {
    let trimmed = keyword.trim();
    let valid = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(trimmed.to_ascii_uppercase())
    } else {
        Err(PolicyError::InvalidKeyword(keyword.to_string()))
    }
}
