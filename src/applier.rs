//! Applies a [`FilePatchSet`] to the filesystem.
//!
//! Each file is handled independently:
//! - resolve the path (against the workspace root when one is given)
//! - read the content and run the rules in order
//! - write back atomically, only if some rule changed the content
//!
//! Failures are collected per file into the [`PatchReport`]; one broken file
//! never stops the others.

use crate::edit::{self, apply_rules, EditError, RuleMismatch};
use crate::lock::PathLocks;
use crate::rule::{FilePatch, FilePatchSet, RuleError};
use crate::safety::{SafetyError, WorkspaceGuard};
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Knobs for a single [`PatchApplier::apply`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Compute results without writing anything
    pub dry_run: bool,
    /// Fail a file when one of its rules finds nothing to replace
    pub require_exact_match: bool,
    /// Base for relative paths; targets must stay inside it
    pub root: Option<PathBuf>,
    /// Attach a unified diff to every `Applied` result
    pub collect_diffs: bool,
    /// Process files concurrently
    pub parallel: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            require_exact_match: true,
            root: None,
            collect_diffs: false,
            parallel: true,
        }
    }
}

impl ApplyOptions {
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn require_exact_match(mut self, require: bool) -> Self {
        self.require_exact_match = require;
        self
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn collect_diffs(mut self, collect: bool) -> Self {
        self.collect_diffs = collect;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Successful outcome for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchResult should be checked for applied/unchanged"]
pub enum PatchResult {
    /// No rule changed the content; nothing was written
    Unchanged,
    /// `rules` rules changed the content (written unless dry run)
    Applied { rules: usize, diff: Option<String> },
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchResult::Unchanged => write!(f, "unchanged"),
            PatchResult::Applied { rules: 1, .. } => write!(f, "applied 1 rule"),
            PatchResult::Applied { rules, .. } => write!(f, "applied {rules} rules"),
        }
    }
}

/// Per-file failure.
#[derive(Debug)]
pub enum ApplicationError {
    /// Target file does not exist
    NotFound { file: PathBuf },
    /// Target exists but could not be read as UTF-8 text
    Read {
        file: PathBuf,
        source: std::io::Error,
    },
    /// An exact-match rule found nothing; the rule table is stale
    RuleNotMatched {
        file: PathBuf,
        mismatch: RuleMismatch,
    },
    /// Writing the new content failed; the original is untouched
    Write { file: PathBuf, source: EditError },
    /// Path resolves outside the workspace or into a forbidden directory
    OutsideWorkspace { file: PathBuf, source: SafetyError },
}

impl ApplicationError {
    pub fn file(&self) -> &Path {
        match self {
            ApplicationError::NotFound { file }
            | ApplicationError::Read { file, .. }
            | ApplicationError::RuleNotMatched { file, .. }
            | ApplicationError::Write { file, .. }
            | ApplicationError::OutsideWorkspace { file, .. } => file,
        }
    }

    /// Short machine-friendly label.
    pub fn kind(&self) -> &'static str {
        match self {
            ApplicationError::NotFound { .. } => "not-found",
            ApplicationError::Read { .. } => "read-error",
            ApplicationError::RuleNotMatched { .. } => "rule-not-matched",
            ApplicationError::Write { .. } => "write-error",
            ApplicationError::OutsideWorkspace { .. } => "outside-workspace",
        }
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::NotFound { file } => {
                write!(f, "file not found: {}", file.display())
            }
            ApplicationError::Read { file, source } => {
                write!(f, "failed to read {}: {}", file.display(), source)
            }
            ApplicationError::RuleNotMatched { file, mismatch } => {
                write!(
                    f,
                    "rule #{} did not match in {}: search text {:?} not found",
                    mismatch.index + 1,
                    file.display(),
                    mismatch.search
                )
            }
            ApplicationError::Write { file, source } => {
                write!(f, "failed to write {}: {}", file.display(), source)
            }
            ApplicationError::OutsideWorkspace { source, .. } => write!(f, "{source}"),
        }
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplicationError::Read { source, .. } => Some(source),
            ApplicationError::Write { source, .. } => Some(source),
            ApplicationError::OutsideWorkspace { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Setup failures that prevent a run from starting at all.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("invalid workspace root: {0}")]
    Workspace(#[from] SafetyError),
}

/// Per-file results in patch-set order.
#[derive(Debug, Default)]
pub struct PatchReport {
    pub dry_run: bool,
    pub entries: Vec<(PathBuf, Result<PatchResult, ApplicationError>)>,
}

/// Totals over a [`PatchReport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub applied: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub rules_applied: usize,
}

impl std::ops::AddAssign for ReportSummary {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
        self.rules_applied += other.rules_applied;
    }
}

impl PatchReport {
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Result<PatchResult, ApplicationError>)> {
        self.entries.iter().map(|(path, result)| (path.as_path(), result))
    }

    /// Result for `path` as it was spelled in the patch set.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<&Result<PatchResult, ApplicationError>> {
        let path = path.as_ref();
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, result)| result)
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for (_, result) in &self.entries {
            match result {
                Ok(PatchResult::Applied { rules, .. }) => {
                    summary.applied += 1;
                    summary.rules_applied += rules;
                }
                Ok(PatchResult::Unchanged) => summary.unchanged += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|(_, result)| result.is_err())
    }

    /// Process exit status for a command-line wrapper.
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Applies patch sets under a given set of options.
#[derive(Debug)]
pub struct PatchApplier<'l> {
    options: ApplyOptions,
    locks: &'l PathLocks,
}

impl PatchApplier<'static> {
    /// Applier that serializes through the process-wide lock registry.
    pub fn new(options: ApplyOptions) -> Self {
        Self {
            options,
            locks: PathLocks::global(),
        }
    }
}

impl<'l> PatchApplier<'l> {
    pub fn with_locks(options: ApplyOptions, locks: &'l PathLocks) -> Self {
        Self { options, locks }
    }

    pub fn options(&self) -> &ApplyOptions {
        &self.options
    }

    /// Apply every file in `patch_set`.
    ///
    /// Only setup problems (empty set, unusable root) are returned as `Err`;
    /// per-file failures land in the report.
    pub fn apply(&self, patch_set: &FilePatchSet) -> Result<PatchReport, ApplyError> {
        patch_set.ensure_non_empty()?;

        let guard = match &self.options.root {
            Some(root) => Some(WorkspaceGuard::new(root)?),
            None => None,
        };
        let guard = guard.as_ref();

        debug!(
            files = patch_set.len(),
            rules = patch_set.rule_count(),
            dry_run = self.options.dry_run,
            "applying patch set"
        );

        let entries: Vec<_> = if self.options.parallel {
            patch_set
                .files()
                .par_iter()
                .map(|patch| (patch.path.clone(), self.apply_file(guard, patch)))
                .collect()
        } else {
            patch_set
                .files()
                .iter()
                .map(|patch| (patch.path.clone(), self.apply_file(guard, patch)))
                .collect()
        };

        Ok(PatchReport {
            dry_run: self.options.dry_run,
            entries,
        })
    }

    fn apply_file(
        &self,
        guard: Option<&WorkspaceGuard>,
        patch: &FilePatch,
    ) -> Result<PatchResult, ApplicationError> {
        let _span = tracing::debug_span!("patch_file", file = %patch.path.display()).entered();

        let result = self.apply_file_inner(guard, patch);
        if let Err(e) = &result {
            warn!(kind = e.kind(), "{e}");
        }
        result
    }

    fn apply_file_inner(
        &self,
        guard: Option<&WorkspaceGuard>,
        patch: &FilePatch,
    ) -> Result<PatchResult, ApplicationError> {
        let file = match guard {
            Some(guard) => {
                guard
                    .resolve(&patch.path)
                    .map_err(|source| ApplicationError::OutsideWorkspace {
                        file: patch.path.clone(),
                        source,
                    })?
            }
            None => patch.path.clone(),
        };

        // Write through symlinks rather than replacing them
        let target = match file.canonicalize() {
            Ok(target) => target,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ApplicationError::NotFound { file });
            }
            Err(source) => return Err(ApplicationError::Read { file, source }),
        };

        // Dry runs never write, so they read without serializing
        let _lock = (!self.options.dry_run).then(|| self.locks.lock(&target));

        let original = fs::read(&target).map_err(|source| match source.kind() {
            ErrorKind::NotFound => ApplicationError::NotFound { file: file.clone() },
            _ => ApplicationError::Read {
                file: file.clone(),
                source,
            },
        })?;
        let before = edit::fingerprint(&original);
        let text = String::from_utf8(original).map_err(|e| ApplicationError::Read {
            file: file.clone(),
            source: std::io::Error::new(ErrorKind::InvalidData, e.utf8_error()),
        })?;

        let substitution = apply_rules(&text, &patch.rules, self.options.require_exact_match)
            .map_err(|mismatch| ApplicationError::RuleNotMatched {
                file: file.clone(),
                mismatch,
            })?;

        if substitution.is_unchanged() {
            debug!("no rule changed the content");
            return Ok(PatchResult::Unchanged);
        }

        let diff = self
            .options
            .collect_diffs
            .then(|| edit::unified_diff(&file, &text, &substitution.content));

        if self.options.dry_run {
            debug!(rules = substitution.rules_applied, "dry run, not writing");
        } else {
            #[cfg(test)]
            tests::run_before_write_hook(&target);

            if let Some(guard) = guard {
                guard
                    .revalidate(&target)
                    .map_err(|source| ApplicationError::OutsideWorkspace {
                        file: file.clone(),
                        source,
                    })?;
            }

            let write_err = |source: EditError| ApplicationError::Write {
                file: file.clone(),
                source,
            };

            let on_disk = fs::read(&target).map_err(|e| write_err(EditError::Io(e)))?;
            if edit::fingerprint(&on_disk) != before {
                return Err(write_err(EditError::ConcurrentModification(target)));
            }

            edit::atomic_write(&target, substitution.content.as_bytes()).map_err(write_err)?;
            info!(rules = substitution.rules_applied, "patched {}", file.display());
        }

        Ok(PatchResult::Applied {
            rules: substitution.rules_applied,
            diff,
        })
    }
}

/// Apply `patch_set` with the process-wide lock registry.
pub fn apply_patch_set(
    patch_set: &FilePatchSet,
    options: ApplyOptions,
) -> Result<PatchReport, ApplyError> {
    PatchApplier::new(options).apply(patch_set)
}
