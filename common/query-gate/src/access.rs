//! Project and dataset access policy
//!
//! Built once from configuration and read-only afterwards. A project is
//! accessible only if it has an entry; the billing project is a cost target
//! and grants nothing by itself.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{PolicyError, Rejection};
use crate::pattern::AccessPattern;

/// Allow-list entry for a single project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectEntry {
    pub project_id: String,
    pub project_name: String,
    pub description: String,
    pub allowed_dataset_patterns: Vec<AccessPattern>,
}

impl ProjectEntry {
    pub fn new(project_id: impl Into<String>, patterns: Vec<AccessPattern>) -> Self {
        let project_id = project_id.into();
        Self {
            project_name: project_id.clone(),
            description: String::new(),
            project_id,
            allowed_dataset_patterns: patterns,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// OR across patterns; an empty pattern list admits nothing
    pub fn is_dataset_allowed(&self, dataset_id: &str) -> bool {
        self.allowed_dataset_patterns
            .iter()
            .any(|p| p.matches(dataset_id))
    }

    /// True when some pattern is all stars, so no dataset is hidden
    pub fn allows_every_dataset(&self) -> bool {
        self.allowed_dataset_patterns
            .iter()
            .any(|p| !p.as_str().is_empty() && p.as_str().chars().all(|c| c == '*'))
    }

    pub fn pattern_strings(&self) -> Vec<String> {
        self.allowed_dataset_patterns
            .iter()
            .map(|p| p.as_str().to_string())
            .collect()
    }
}

/// Immutable allow-list of projects and their dataset patterns
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    entries: Vec<ProjectEntry>,
    index: HashMap<String, usize>,
    billing_project: String,
}

impl AccessPolicy {
    pub fn new(
        billing_project: impl Into<String>,
        entries: Vec<ProjectEntry>,
    ) -> Result<Self, PolicyError> {
        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if entry.project_id.is_empty() {
                return Err(PolicyError::EmptyProjectId);
            }
            if index.insert(entry.project_id.clone(), i).is_some() {
                return Err(PolicyError::DuplicateProject(entry.project_id.clone()));
            }
        }

        Ok(Self {
            entries,
            index,
            billing_project: billing_project.into(),
        })
    }

    pub fn billing_project(&self) -> &str {
        &self.billing_project
    }

    /// Configured projects in declaration order
    pub fn projects(&self) -> &[ProjectEntry] {
        &self.entries
    }

    pub fn project(&self, project_id: &str) -> Option<&ProjectEntry> {
        self.index.get(project_id).map(|&i| &self.entries[i])
    }

    pub fn project_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.project_id.clone()).collect()
    }

    /// An omitted project resolves to the billing project
    pub fn resolve_project<'a>(&'a self, project_id: Option<&'a str>) -> &'a str {
        match project_id {
            Some(p) if !p.is_empty() => p,
            _ => &self.billing_project,
        }
    }

    pub fn is_project_allowed(&self, project_id: &str) -> bool {
        self.index.contains_key(project_id)
    }

    pub fn is_dataset_allowed(&self, project_id: &str, dataset_id: &str) -> bool {
        self.project(project_id)
            .is_some_and(|entry| entry.is_dataset_allowed(dataset_id))
    }

    /// Look up a project entry or explain why it is not accessible
    pub fn check_project(&self, project_id: &str) -> Result<&ProjectEntry, Rejection> {
        self.project(project_id)
            .ok_or_else(|| Rejection::ProjectAccess {
                project: project_id.to_string(),
                allowed: self.project_ids(),
            })
    }

    pub fn check_dataset(&self, project_id: &str, dataset_id: &str) -> Result<(), Rejection> {
        let entry = self.check_project(project_id)?;
        if entry.is_dataset_allowed(dataset_id) {
            Ok(())
        } else {
            Err(Rejection::DatasetAccess {
                project: project_id.to_string(),
                dataset: dataset_id.to_string(),
                patterns: entry.pattern_strings(),
            })
        }
    }
}
