//! Patch-file application
//!
//! Bridges a loaded [`PatchConfig`] to the core applier:
//! - converts file definitions into a validated [`FilePatchSet`]
//! - roots relative paths at the workspace when the file asks for it
//! - offers a read-only check that never touches the workspace

use crate::applier::{ApplyError, ApplyOptions, PatchApplier, PatchReport};
use crate::config::schema::PatchConfig;
use std::path::{Path, PathBuf};

/// Apply a patch configuration to a workspace.
///
/// `options.root` is overridden with `workspace_root` when the config sets
/// `workspace_relative`.
pub fn apply_patches(
    config: &PatchConfig,
    workspace_root: &Path,
    options: ApplyOptions,
) -> Result<PatchReport, ApplyError> {
    let patch_set = config.to_patch_set()?;
    let options = if config.meta.workspace_relative {
        options.root(workspace_root)
    } else {
        options
    };
    PatchApplier::new(options).apply(&patch_set)
}

/// Evaluate a patch configuration without modifying any file.
///
/// `Applied` in the returned report means "would apply".
pub fn check_patches(
    config: &PatchConfig,
    workspace_root: &Path,
    options: ApplyOptions,
) -> Result<PatchReport, ApplyError> {
    apply_patches(config, workspace_root, options.dry_run(true))
}

/// Where a config's file entry lives on disk.
pub fn resolve_target(config: &PatchConfig, workspace_root: &Path, path: &str) -> PathBuf {
    if config.meta.workspace_relative {
        workspace_root.join(path)
    } else {
        PathBuf::from(path)
    }
}
