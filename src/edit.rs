use crate::rule::PatchRule;
use similar::TextDiff;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Minimum similarity for a line to be offered as a near-miss hint.
const NEAR_MISS_THRESHOLD: f64 = 0.6;

/// What a single rule did to the content it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    /// `occurrences` pending matches were rewritten
    Replaced { occurrences: usize },
    /// Nothing pending, but the replacement text is already in place
    AlreadyApplied,
    /// Search text absent and exact matching was not required
    Skipped,
}

/// Result of running a rule list over in-memory content.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Substitution holds the new content; it is not written anywhere"]
pub struct Substitution {
    pub content: String,
    /// Number of rules that replaced at least one occurrence
    pub rules_applied: usize,
    pub outcomes: Vec<RuleOutcome>,
}

impl Substitution {
    pub fn is_unchanged(&self) -> bool {
        self.rules_applied == 0
    }
}

/// The line in the target that most resembles a rule's search text.
#[derive(Debug, Clone, PartialEq)]
pub struct NearMiss {
    /// 1-based line number
    pub line: usize,
    pub text: String,
    pub similarity: f64,
}

/// An exact-match rule whose search text is not in the content.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMismatch {
    /// Position of the rule in the file's rule list
    pub index: usize,
    pub search: String,
    pub near_miss: Option<NearMiss>,
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path has no parent directory: {0}")]
    NoParent(PathBuf),

    #[error("File changed on disk since it was read: {0}")]
    ConcurrentModification(PathBuf),
}

/// Apply `rules` to `content` in order, each rule seeing the previous output.
///
/// Returns the first exact-match failure without producing partial content.
pub fn apply_rules(
    content: &str,
    rules: &[PatchRule],
    require_exact_match: bool,
) -> Result<Substitution, RuleMismatch> {
    let mut current = content.to_string();
    let mut rules_applied = 0;
    let mut outcomes = Vec::with_capacity(rules.len());

    for (index, rule) in rules.iter().enumerate() {
        let later = &rules[index + 1..];
        let step = match apply_rule(&current, rule) {
            RuleStep::Missing if rewritten_by_later_rules(&current, rule, later) => {
                RuleStep::AlreadyApplied
            }
            step => step,
        };

        match step {
            RuleStep::Rewrote { content, occurrences } => {
                debug!(rule = index, occurrences, "rule replaced");
                current = content;
                rules_applied += 1;
                outcomes.push(RuleOutcome::Replaced { occurrences });
            }
            RuleStep::AlreadyApplied => {
                debug!(rule = index, "rule already applied");
                outcomes.push(RuleOutcome::AlreadyApplied);
            }
            RuleStep::Missing if require_exact_match => {
                debug!(rule = index, "rule did not match");
                return Err(RuleMismatch {
                    index,
                    search: rule.search().to_string(),
                    near_miss: near_miss(&current, rule.search()),
                });
            }
            RuleStep::Missing => {
                debug!(rule = index, "rule skipped");
                outcomes.push(RuleOutcome::Skipped);
            }
        }
    }

    Ok(Substitution {
        content: current,
        rules_applied,
        outcomes,
    })
}

enum RuleStep {
    Rewrote { content: String, occurrences: usize },
    AlreadyApplied,
    Missing,
}

/// Replace every pending, non-overlapping occurrence of the rule's search text.
///
/// An occurrence sitting at its embedded offset inside an occurrence of the
/// replacement text was produced by an earlier run and is left alone.
fn apply_rule(content: &str, rule: &PatchRule) -> RuleStep {
    let search = rule.search();
    let replace = rule.replace();

    let offsets = rule.embedded_offsets();
    let mut applied_sites = HashSet::new();
    if !offsets.is_empty() {
        for (start, _) in content.match_indices(replace) {
            applied_sites.extend(offsets.iter().map(|k| start + k));
        }
    }

    let pending: Vec<usize> = content
        .match_indices(search)
        .map(|(start, _)| start)
        .filter(|start| !applied_sites.contains(start))
        .collect();

    if pending.is_empty() {
        // An empty replacement leaves nothing behind to recognise
        return if !replace.is_empty() && content.contains(replace) {
            RuleStep::AlreadyApplied
        } else {
            RuleStep::Missing
        };
    }

    let mut out = String::with_capacity(content.len() + pending.len() * replace.len());
    let mut last = 0;
    for &start in &pending {
        out.push_str(&content[last..start]);
        out.push_str(replace);
        last = start + search.len();
    }
    out.push_str(&content[last..]);

    RuleStep::Rewrote {
        content: out,
        occurrences: pending.len(),
    }
}

/// Whether the rule's replacement, carried through the rules after it, is
/// already in `content`.
///
/// A later rule may rewrite what this one produced, so on a rerun only the
/// final form of the replacement is visible.
fn rewritten_by_later_rules(content: &str, rule: &PatchRule, later: &[PatchRule]) -> bool {
    if rule.replace().is_empty() || later.is_empty() {
        return false;
    }

    let mut image = rule.replace().to_string();
    for next in later {
        if let RuleStep::Rewrote { content, .. } = apply_rule(&image, next) {
            image = content;
        }
    }

    image != rule.replace() && !image.is_empty() && content.contains(&image)
}

/// Find the line most similar to the first non-blank line of `search`.
fn near_miss(content: &str, search: &str) -> Option<NearMiss> {
    let needle = search.lines().find(|l| !l.trim().is_empty())?.trim();

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| NearMiss {
            line: idx + 1,
            text: line.to_string(),
            similarity: strsim::normalized_levenshtein(needle, line.trim()),
        })
        .filter(|m| m.similarity >= NEAR_MISS_THRESHOLD)
        .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
}

/// xxh3 digest used to detect writes that raced with ours.
pub fn fingerprint(content: &[u8]) -> u64 {
    xxh3_64(content)
}

/// Unified diff between two versions of `file`.
pub fn unified_diff(file: &Path, before: &str, after: &str) -> String {
    let name = file.display().to_string();
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(&format!("{name} (original)"), &format!("{name} (patched)"))
        .to_string()
}

/// Atomic file write: tempfile + fsync + rename.
///
/// The original file is either fully replaced or left untouched; a failed
/// write removes the temporary file. An `Err` always means the target was
/// not replaced. Permissions of an existing target are
/// carried over to the replacement.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), EditError> {
    // Same directory keeps the rename on one filesystem
    let parent = match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Path::new("."),
        Some(p) => p,
        None => return Err(EditError::NoParent(path.to_path_buf())),
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(temp.path(), meta.permissions())?;
    }

    temp.persist(path).map_err(|e| e.error)?;

    // The new content is in place; a failed mtime bump must not report a failed write.
    // Coarse-mtime filesystems can otherwise hide the change from watchers.
    if let Err(e) = filetime::set_file_mtime(path, filetime::FileTime::now()) {
        warn!(path = %path.display(), "could not update mtime: {e}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(search: &str, replace: &str) -> PatchRule {
        PatchRule::new(search, replace).unwrap()
    }

    #[test]
    fn test_replaces_all_occurrences() {
        let result = apply_rules("a-a-a", &[rule("a", "b")], true).unwrap();
        assert_eq!(result.content, "b-b-b");
        assert_eq!(result.rules_applied, 1);
        assert_eq!(result.outcomes, vec![RuleOutcome::Replaced { occurrences: 3 }]);
    }

    #[test]
    fn test_rules_chain_in_order() {
        let rules = [rule("one", "two"), rule("two", "three")];
        let result = apply_rules("one", &rules, true).unwrap();
        assert_eq!(result.content, "three");
        assert_eq!(result.rules_applied, 2);
    }

    #[test]
    fn test_exact_match_failure_reports_index() {
        let rules = [rule("alpha", "ALPHA"), rule("missing", "found")];
        let err = apply_rules("alpha beta", &rules, true).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.search, "missing");
    }

    #[test]
    fn test_lenient_mode_skips_missing() {
        let rules = [rule("missing", "found"), rule("beta", "BETA")];
        let result = apply_rules("alpha beta", &rules, false).unwrap();
        assert_eq!(result.content, "alpha BETA");
        assert_eq!(
            result.outcomes,
            vec![RuleOutcome::Skipped, RuleOutcome::Replaced { occurrences: 1 }]
        );
    }

    #[test]
    fn test_already_applied_when_replacement_present() {
        let result = apply_rules(
            "tx.type === 'EXPENSE'",
            &[rule("tx.type === 'expense'", "tx.type === 'EXPENSE'")],
            true,
        )
        .unwrap();
        assert!(result.is_unchanged());
        assert_eq!(result.outcomes, vec![RuleOutcome::AlreadyApplied]);
    }

    #[test]
    fn test_chained_rules_rerun_unchanged() {
        let rules = [rule("one", "two"), rule("two", "three")];
        let first = apply_rules("one", &rules, true).unwrap();
        assert_eq!(first.content, "three");

        let second = apply_rules(&first.content, &rules, true).unwrap();
        assert!(second.is_unchanged());
        assert_eq!(second.content, "three");
        assert_eq!(
            second.outcomes,
            vec![RuleOutcome::AlreadyApplied, RuleOutcome::AlreadyApplied]
        );
    }

    #[test]
    fn test_chained_rules_still_report_stale_rule() {
        let rules = [rule("one", "two"), rule("two", "three")];
        let err = apply_rules("four", &rules, true).unwrap_err();
        assert_eq!(err.index, 0);
    }

    #[test]
    fn test_stale_deletion_rule_is_reported() {
        let rules = [rule("console.log(debug);", "")];
        let err = apply_rules("nothing relevant here", &rules, true).unwrap_err();
        assert_eq!(err.index, 0);
        assert_eq!(err.search, "console.log(debug);");

        let lenient = apply_rules("nothing relevant here", &rules, false).unwrap();
        assert_eq!(lenient.outcomes, vec![RuleOutcome::Skipped]);
    }

    #[test]
    fn test_deletion_rule_removes_every_occurrence() {
        let rules = [rule("debug();\n", "")];
        let result = apply_rules("a\ndebug();\nb\ndebug();\n", &rules, true).unwrap();
        assert_eq!(result.content, "a\nb\n");
        assert_eq!(result.outcomes, vec![RuleOutcome::Replaced { occurrences: 2 }]);
    }

    #[test]
    fn test_insertion_rule_is_idempotent() {
        let rules = [rule("use a;", "use a;\nuse b;")];
        let first = apply_rules("use a;\nfn main() {}\n", &rules, true).unwrap();
        assert_eq!(first.content, "use a;\nuse b;\nfn main() {}\n");

        let second = apply_rules(&first.content, &rules, true).unwrap();
        assert!(second.is_unchanged());
        assert_eq!(second.content, first.content);
    }

    #[test]
    fn test_insertion_rule_still_patches_other_sites() {
        let rules = [rule("x", "(x)")];
        let result = apply_rules("(x) x", &rules, true).unwrap();
        assert_eq!(result.content, "(x) (x)");
        assert_eq!(result.outcomes, vec![RuleOutcome::Replaced { occurrences: 1 }]);
    }

    #[test]
    fn test_near_miss_hint() {
        let content = "line one\ntx.type === 'expenses'\nline three\n";
        let err = apply_rules(content, &[rule("tx.type === 'expense'", "X")], true).unwrap_err();
        let hint = err.near_miss.unwrap();
        assert_eq!(hint.line, 2);
        assert!(hint.similarity > 0.9);
    }

    #[test]
    fn test_near_miss_absent_for_unrelated_content() {
        let err = apply_rules("zzz\nqqq\n", &[rule("completely different", "X")], true)
            .unwrap_err();
        assert!(err.near_miss.is_none());
    }

    #[test]
    fn test_fingerprint_distinguishes_content() {
        assert_eq!(fingerprint(b"hello"), fingerprint(b"hello"));
        assert_ne!(fingerprint(b"hello"), fingerprint(b"hellO"));
    }

    #[test]
    fn test_unified_diff_marks_changes() {
        let diff = unified_diff(Path::new("a.ts"), "one\ntwo\n", "one\nTWO\n");
        assert!(diff.contains("-two"));
        assert!(diff.contains("+TWO"));
        assert!(diff.contains("a.ts (original)"));
    }

    #[test]
    fn test_atomic_write_integration() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, b"original content").unwrap();

        atomic_write(&file_path, b"modified content").unwrap();

        let new_content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(new_content, "modified content");
        // Only the target remains; no stray temp files
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_atomic_write_failed_swap_leaves_target_intact() {
        let temp_dir = tempfile::tempdir().unwrap();
        // A non-empty directory cannot be replaced by a rename
        let target = temp_dir.path().join("target");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep.txt"), b"original").unwrap();

        let result = atomic_write(&target, b"new content");

        assert!(matches!(result, Err(EditError::Io(_))));
        assert!(target.is_dir());
        assert_eq!(fs::read(target.join("keep.txt")).unwrap(), b"original");
        // The temporary sibling was cleaned up
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_atomic_write_missing_parent_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();

        let result = atomic_write(&blocker.join("child.txt"), b"content");

        assert!(result.is_err());
        assert_eq!(fs::read(&blocker).unwrap(), b"file");
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_atomic_write_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("script.sh");
        fs::write(&file_path, b"echo hi").unwrap();
        fs::set_permissions(&file_path, fs::Permissions::from_mode(0o755)).unwrap();

        atomic_write(&file_path, b"echo bye").unwrap();

        let mode = fs::metadata(&file_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
