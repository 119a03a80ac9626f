use crate::rule::{FilePatchSet, PatchRule, RuleError};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct PatchConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub files: Vec<FileDefinition>,
}

impl PatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.files.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        let mut seen = HashSet::new();
        for file in &self.files {
            if file.path.trim().is_empty() {
                issues.push(ValidationIssue::MissingField { field: "path" });
                continue;
            }

            if !seen.insert(file.path.as_str()) {
                issues.push(ValidationIssue::DuplicateFile {
                    file: file.path.clone(),
                });
            }

            if file.rules.is_empty() {
                issues.push(ValidationIssue::EmptyRuleList {
                    file: file.path.clone(),
                });
            }

            for (index, rule) in file.rules.iter().enumerate() {
                if let Err(reason) = PatchRule::new(rule.search.as_str(), rule.replace.as_str()) {
                    issues.push(ValidationIssue::InvalidRule {
                        file: file.path.clone(),
                        index,
                        reason,
                    });
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Build the in-memory patch set. Paths are kept exactly as written.
    pub fn to_patch_set(&self) -> Result<FilePatchSet, RuleError> {
        let mut set = FilePatchSet::new();
        for file in &self.files {
            let rules = file
                .rules
                .iter()
                .map(|rule| PatchRule::new(rule.search.as_str(), rule.replace.as_str()))
                .collect::<Result<Vec<_>, _>>()?;
            set.insert(&file.path, rules);
        }
        set.ensure_non_empty()?;
        Ok(set)
    }

    pub fn rule_count(&self) -> usize {
        self.files.iter().map(|f| f.rules.len()).sum()
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Resolve file paths against the workspace root instead of the cwd
    #[serde(default)]
    pub workspace_relative: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FileDefinition {
    pub path: String,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RuleDefinition {
    pub search: String,
    pub replace: String,
    /// Free-form note shown by `list`
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyPatchList,
    MissingField {
        field: &'static str,
    },
    EmptyRuleList {
        file: String,
    },
    DuplicateFile {
        file: String,
    },
    InvalidRule {
        file: String,
        index: usize,
        reason: RuleError,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "patch config contains no files"),
            ValidationIssue::MissingField { field } => {
                write!(f, "file entry missing required field '{field}'")
            }
            ValidationIssue::EmptyRuleList { file } => {
                write!(f, "file '{file}' has no rules")
            }
            ValidationIssue::DuplicateFile { file } => {
                write!(f, "file '{file}' is listed more than once")
            }
            ValidationIssue::InvalidRule {
                file,
                index,
                reason,
            } => write!(f, "file '{file}' rule #{}: {reason}", index + 1),
        }
    }
}
