//! Literal Patcher: safe, idempotent find-and-replace across files
//!
//! Applies ordered literal search/replace rules to a set of files with the
//! guarantees a hand-run fix-up script usually lacks.
//!
//! # Architecture
//!
//! A [`FilePatchSet`] maps file paths to ordered [`PatchRule`]s. The
//! [`PatchApplier`] runs each file's rules over its content in memory and
//! writes back once, only when something changed. Patch files (TOML or JSON)
//! load into the same structure through [`config`].
//!
//! # Safety
//!
//! - Exact-match rules fail loudly when their search text is gone
//! - Re-applying a patch set is a no-op
//! - Atomic file writes (tempfile + fsync + rename)
//! - Optional workspace boundary enforcement
//! - Per-path locking for concurrent runs
//!
//! # Example
//!
//! ```no_run
//! use literal_patcher::{apply_patch_set, ApplyOptions, FilePatchSet};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let set = FilePatchSet::new().with_file(
//!     "src/components/dashboard/TransactionList.tsx",
//!     [("tx.type === 'expense'", "tx.type === 'EXPENSE'")],
//! )?;
//!
//! let report = apply_patch_set(&set, ApplyOptions::default().dry_run(true))?;
//! for (path, result) in report.iter() {
//!     match result {
//!         Ok(outcome) => println!("{}: {}", path.display(), outcome),
//!         Err(e) => eprintln!("{}: {}", path.display(), e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod applier;
pub mod config;
pub mod edit;
pub mod lock;
pub mod rule;
pub mod safety;

// Re-exports
pub use applier::{
    apply_patch_set, ApplicationError, ApplyError, ApplyOptions, PatchApplier, PatchReport,
    PatchResult, ReportSummary,
};
pub use config::{
    apply_patches, check_patches, load_from_path, load_from_str, ConfigError, PatchConfig,
};
pub use edit::{apply_rules, EditError, NearMiss, RuleMismatch, RuleOutcome, Substitution};
pub use lock::{PathGuard, PathLocks};
pub use rule::{FilePatch, FilePatchSet, PatchRule, RuleError};
pub use safety::{SafetyError, WorkspaceGuard};
