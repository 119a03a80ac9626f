//! Integration tests for patch files
//!
//! Tests loading, validation, and full application through the library API

use literal_patcher::config::{
    apply_patches, check_patches, load_from_path, load_from_str, ConfigError, ValidationIssue,
};
use literal_patcher::{ApplicationError, ApplyOptions, PatchResult};
use std::fs;
use tempfile::TempDir;

/// Helper to create a temp dir with a couple of source files
fn setup_test_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();

    fs::create_dir_all(dir.path().join("src/context")).unwrap();
    fs::write(
        dir.path().join("src/App.tsx"),
        "import { FinanceProvider } from './context/FinanceContext';\n\nexport default function App() {\n    return <FinanceProvider />;\n}\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("src/context/FinanceContext.tsx"),
        "type TxType = 'income' | 'expense';\nconst DEFAULT: TxType = 'expense';\n",
    )
    .unwrap();

    dir
}

const MULTI_FILE: &str = r#"
[meta]
name = "multi"
workspace_relative = true

[[files]]
path = "src/context/FinanceContext.tsx"

[[files.rules]]
search = "'income' | 'expense'"
replace = "'INCOME' | 'EXPENSE'"

[[files.rules]]
search = "= 'expense'"
replace = "= 'EXPENSE'"

[[files]]
path = "src/App.tsx"

[[files.rules]]
search = "<FinanceProvider />"
replace = "<FinanceProvider><Dashboard /></FinanceProvider>"
"#;

#[test]
fn test_load_patch_config_basic() {
    let config = load_from_str(MULTI_FILE).unwrap();

    assert_eq!(config.meta.name, "multi");
    assert!(config.meta.workspace_relative);
    assert_eq!(config.files.len(), 2);
    assert_eq!(config.rule_count(), 3);

    let set = config.to_patch_set().unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.files()[0].rules[1].search(), "= 'expense'");
}

#[test]
fn test_apply_multi_file() {
    let workspace = setup_test_workspace();
    let config = load_from_str(MULTI_FILE).unwrap();

    let report = apply_patches(&config, workspace.path(), ApplyOptions::default()).unwrap();

    assert_eq!(report.exit_code(), 0);
    let summary = report.summary();
    assert_eq!(summary.applied, 2);
    assert_eq!(summary.rules_applied, 3);

    assert_eq!(
        fs::read_to_string(workspace.path().join("src/context/FinanceContext.tsx")).unwrap(),
        "type TxType = 'INCOME' | 'EXPENSE';\nconst DEFAULT: TxType = 'EXPENSE';\n"
    );
    assert!(fs::read_to_string(workspace.path().join("src/App.tsx"))
        .unwrap()
        .contains("<FinanceProvider><Dashboard /></FinanceProvider>"));
}

#[test]
fn test_idempotent_reapplication() {
    let workspace = setup_test_workspace();
    let config = load_from_str(MULTI_FILE).unwrap();

    apply_patches(&config, workspace.path(), ApplyOptions::default()).unwrap();
    let first = fs::read(workspace.path().join("src/App.tsx")).unwrap();

    let report = apply_patches(&config, workspace.path(), ApplyOptions::default()).unwrap();
    for (path, result) in report.iter() {
        assert!(
            matches!(result, Ok(PatchResult::Unchanged)),
            "{} was not unchanged: {:?}",
            path.display(),
            result
        );
    }
    assert_eq!(fs::read(workspace.path().join("src/App.tsx")).unwrap(), first);
}

#[test]
fn test_check_patches_never_writes() {
    let workspace = setup_test_workspace();
    let before = fs::read(workspace.path().join("src/App.tsx")).unwrap();
    let config = load_from_str(MULTI_FILE).unwrap();

    let report = check_patches(&config, workspace.path(), ApplyOptions::default()).unwrap();

    assert!(report.dry_run);
    assert_eq!(report.summary().applied, 2);
    assert_eq!(fs::read(workspace.path().join("src/App.tsx")).unwrap(), before);
}

#[test]
fn test_stale_rule_isolated_to_its_file() {
    let workspace = setup_test_workspace();
    fs::write(
        workspace.path().join("src/context/FinanceContext.tsx"),
        "type TxType = string;\n",
    )
    .unwrap();
    let config = load_from_str(MULTI_FILE).unwrap();

    let report = apply_patches(&config, workspace.path(), ApplyOptions::default()).unwrap();

    assert!(matches!(
        report.get("src/context/FinanceContext.tsx"),
        Some(Err(ApplicationError::RuleNotMatched { .. }))
    ));
    assert!(matches!(
        report.get("src/App.tsx"),
        Some(Ok(PatchResult::Applied { rules: 1, .. }))
    ));
    assert_eq!(report.exit_code(), 1);
    assert_eq!(
        fs::read_to_string(workspace.path().join("src/context/FinanceContext.tsx")).unwrap(),
        "type TxType = string;\n"
    );
}

#[test]
fn test_absolute_paths_without_workspace_relative() {
    let workspace = setup_test_workspace();
    let file = workspace.path().join("src/App.tsx");
    let toml = format!(
        r#"
[[files]]
path = "{}"

[[files.rules]]
search = "App()"
replace = "Root()"
"#,
        file.display().to_string().replace('\\', "\\\\")
    );
    let config = load_from_str(&toml).unwrap();
    assert!(!config.meta.workspace_relative);

    let unrelated = TempDir::new().unwrap();
    let report = apply_patches(&config, unrelated.path(), ApplyOptions::default()).unwrap();

    assert_eq!(report.exit_code(), 0);
    assert!(fs::read_to_string(&file).unwrap().contains("function Root()"));
}

#[test]
fn test_workspace_escape_rejected() {
    let workspace = setup_test_workspace();
    let toml = r#"
[meta]
workspace_relative = true

[[files]]
path = "../../etc/hosts"

[[files.rules]]
search = "localhost"
replace = "pwned"
"#;
    let config = load_from_str(toml).unwrap();
    let report = apply_patches(&config, workspace.path(), ApplyOptions::default()).unwrap();

    assert!(matches!(
        report.get("../../etc/hosts"),
        Some(Err(ApplicationError::OutsideWorkspace { .. }))
    ));
}

#[test]
fn test_load_from_path_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fixes.json");
    fs::write(
        &path,
        r#"{"files": [{"path": "a.ts", "rules": [{"search": "a", "replace": "b", "note": "why"}]}]}"#,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.files[0].rules[0].note.as_deref(), Some("why"));
}

#[test]
fn test_invalid_rules_reported_with_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(
        &path,
        r#"
[[files]]
path = "a.ts"

[[files.rules]]
search = "noop"
replace = "noop"
"#,
    )
    .unwrap();

    let err = load_from_path(&path).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("bad.toml"));
    assert!(message.contains("rule #1"));
    match err {
        ConfigError::Validation { source, .. } => {
            assert!(matches!(
                source.issues.as_slice(),
                [ValidationIssue::InvalidRule { index: 0, .. }]
            ));
        }
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn test_collect_diffs_through_config() {
    let workspace = setup_test_workspace();
    let config = load_from_str(MULTI_FILE).unwrap();

    let report = check_patches(
        &config,
        workspace.path(),
        ApplyOptions::default().collect_diffs(true),
    )
    .unwrap();

    match report.get("src/App.tsx") {
        Some(Ok(PatchResult::Applied {
            diff: Some(diff), ..
        })) => {
            assert!(diff.contains("-    return <FinanceProvider />;"));
            assert!(diff.contains("+    return <FinanceProvider><Dashboard /></FinanceProvider>;"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
