//! Validated rule model: literal search/replace pairs keyed by file path.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// A literal search/replace pair.
///
/// Construction enforces that `search` is non-empty and differs from
/// `replace`, so every rule that reaches the applicator can make progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRule {
    search: String,
    replace: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule search text is empty")]
    EmptySearch,

    #[error("rule is a no-op: search and replace are identical ({0:?})")]
    NoOp(String),

    #[error("patch set contains no files")]
    EmptyPatchSet,
}

impl PatchRule {
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Result<Self, RuleError> {
        let search = search.into();
        let replace = replace.into();

        if search.is_empty() {
            return Err(RuleError::EmptySearch);
        }
        if search == replace {
            return Err(RuleError::NoOp(search));
        }

        Ok(Self { search, replace })
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn replace(&self) -> &str {
        &self.replace
    }

    /// Offsets inside `replace` at which `search` appears verbatim.
    ///
    /// Non-empty for insertion-style rules (`replace` wraps or extends
    /// `search`); those occurrences mark sites that are already patched.
    pub(crate) fn embedded_offsets(&self) -> Vec<usize> {
        if self.replace.len() < self.search.len() {
            return Vec::new();
        }
        (0..=self.replace.len() - self.search.len())
            .filter(|&i| self.replace.is_char_boundary(i))
            .filter(|&i| self.replace[i..].starts_with(&self.search))
            .collect()
    }
}

/// Rules for a single file, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub path: PathBuf,
    pub rules: Vec<PatchRule>,
}

/// Mapping from file path to an ordered list of rules.
///
/// File order is insertion order and is preserved in reports. Adding rules
/// for a path that is already present appends to that path's list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilePatchSet {
    files: Vec<FilePatch>,
}

impl FilePatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `rules` to the entry for `path`, creating it if needed.
    pub fn insert(&mut self, path: impl Into<PathBuf>, rules: impl IntoIterator<Item = PatchRule>) {
        let path = path.into();
        match self.files.iter_mut().find(|f| f.path == path) {
            Some(existing) => existing.rules.extend(rules),
            None => self.files.push(FilePatch {
                path,
                rules: rules.into_iter().collect(),
            }),
        }
    }

    /// Builder form of [`insert`](Self::insert) for raw string pairs.
    pub fn with_file<I, S, R>(mut self, path: impl Into<PathBuf>, pairs: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = (S, R)>,
        S: Into<String>,
        R: Into<String>,
    {
        let rules = pairs
            .into_iter()
            .map(|(search, replace)| PatchRule::new(search, replace))
            .collect::<Result<Vec<_>, _>>()?;
        self.insert(path, rules);
        Ok(self)
    }

    pub fn files(&self) -> &[FilePatch] {
        &self.files
    }

    pub fn get(&self, path: &Path) -> Option<&[PatchRule]> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.rules.as_slice())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn rule_count(&self) -> usize {
        self.files.iter().map(|f| f.rules.len()).sum()
    }

    /// A patch set must name at least one file to be applied.
    pub fn ensure_non_empty(&self) -> Result<(), RuleError> {
        if self.is_empty() {
            Err(RuleError::EmptyPatchSet)
        } else {
            Ok(())
        }
    }
}
