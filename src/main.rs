use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use literal_patcher::config::{check_patches, load_from_path, resolve_target, PatchConfig};
use literal_patcher::{
    apply_patches, ApplicationError, ApplyOptions, PatchReport, PatchResult, ReportSummary,
};
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "literal-patcher")]
#[command(about = "Safe, idempotent literal find-and-replace across files", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Path to workspace root (defaults to the current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Patch files to use (otherwise all .toml/.json files in patches/)
    #[arg(short, long)]
    patches: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patches to a workspace
    Apply {
        #[command(flatten)]
        target: Target,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,

        /// Skip rules whose search text is absent instead of failing the file
        #[arg(long)]
        allow_missing: bool,

        /// Patch files one at a time instead of in parallel
        #[arg(long)]
        sequential: bool,
    },

    /// Show which patches are applied, pending, or failing
    Status {
        #[command(flatten)]
        target: Target,
    },

    /// Exit non-zero unless every patch is already applied
    Verify {
        #[command(flatten)]
        target: Target,
    },

    /// List patch files and the rules they contain
    List {
        #[command(flatten)]
        target: Target,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Commands::Apply {
            target,
            dry_run,
            diff,
            allow_missing,
            sequential,
        } => {
            let options = ApplyOptions::default()
                .dry_run(dry_run)
                .collect_diffs(diff)
                .require_exact_match(!allow_missing)
                .parallel(!sequential);
            cmd_apply(target, options)?
        }

        Commands::Status { target } => cmd_status(target)?,

        Commands::Verify { target } => cmd_verify(target)?,

        Commands::List { target } => cmd_list(target)?,
    };

    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}

/// Logs go to stderr so the report on stdout stays readable.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "error",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

/// Helper: Discover all .toml/.json patch files in a patches/ directory.
///
/// Discovery order:
/// 1. `<workspace>/patches`
/// 2. `./patches` relative to the current working directory
fn discover_patch_files(workspace: &Path) -> Result<Vec<PathBuf>> {
    let cwd_patches_dir = env::current_dir().ok().map(|cwd| cwd.join("patches"));
    let workspace_patches_dir = workspace.join("patches");

    let candidate_dirs: Vec<PathBuf> = std::iter::once(workspace_patches_dir)
        .chain(cwd_patches_dir)
        .collect();

    for patches_dir in candidate_dirs {
        if !patches_dir.exists() {
            continue;
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&patches_dir).max_depth(1) {
            let entry = entry?;
            let is_patch_file = matches!(
                entry.path().extension().and_then(|s| s.to_str()),
                Some("toml") | Some("json")
            );
            if entry.file_type().is_file() && is_patch_file {
                files.push(entry.path().to_path_buf());
            }
        }

        files.sort();

        if !files.is_empty() {
            return Ok(files);
        }
    }

    anyhow::bail!(
        "No .toml or .json patch files found in either ./patches or {}/patches",
        workspace.display()
    )
}

/// Resolve workspace path
///
/// Priority order:
/// 1. Explicit --workspace flag
/// 2. LITERAL_PATCHER_WORKSPACE environment variable
/// 3. Current directory
fn resolve_workspace(cli_workspace: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_workspace {
        return Ok(path.canonicalize()?);
    }

    if let Ok(env_path) = env::var("LITERAL_PATCHER_WORKSPACE") {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(path.canonicalize()?);
        }
        eprintln!(
            "{}",
            format!(
                "Warning: LITERAL_PATCHER_WORKSPACE is set but path doesn't exist: {}",
                env_path
            )
            .yellow()
        );
    }

    Ok(env::current_dir()?.canonicalize()?)
}

/// Workspace plus the patch files to load from it.
fn resolve_target_files(target: Target) -> Result<(PathBuf, Vec<PathBuf>)> {
    let workspace = resolve_workspace(target.workspace)?;
    let patch_files = if target.patches.is_empty() {
        discover_patch_files(&workspace)?
    } else {
        target.patches
    };
    Ok((workspace, patch_files))
}

/// Helper: Print a unified diff with colored +/- lines
fn display_diff(diff: &str) {
    println!();
    for line in diff.lines() {
        let colored_line = if line.starts_with("+++") || line.starts_with("---") {
            line.dimmed()
        } else if line.starts_with('+') {
            line.green()
        } else if line.starts_with('-') {
            line.red()
        } else if line.starts_with("@@") {
            line.cyan()
        } else {
            line.normal()
        };
        println!("{}", colored_line);
    }
}

/// Helper: Explain a failure in terms the rule author can act on
fn explain_failure(error: &ApplicationError) {
    match error {
        ApplicationError::NotFound { file } => {
            eprintln!("  File: {}", file.display());
            eprintln!("  Possible causes:");
            eprintln!("    - File was renamed or removed");
            eprintln!("    - Wrong workspace (try --workspace)");
        }
        ApplicationError::RuleNotMatched { file, mismatch } => {
            eprintln!("  {}", "CONFLICT: Search text not found".red());
            eprintln!("  File: {}", file.display());
            eprintln!("  Rule: #{}", mismatch.index + 1);
            if let Some(hint) = &mismatch.near_miss {
                eprintln!(
                    "  Closest line {} ({:.0}% similar): {}",
                    hint.line,
                    hint.similarity * 100.0,
                    hint.text.trim()
                );
            }
            eprintln!("  Possible causes:");
            eprintln!("    - Code changed since the rule was written");
            eprintln!("    - Whitespace or line endings differ");
            eprintln!("  Action: update the rule, or pass --allow-missing to skip it");
        }
        ApplicationError::Write { source, .. } => {
            eprintln!("  Original file left untouched: {}", source);
        }
        _ => {}
    }
}

fn print_header(workspace: &Path, config: &PatchConfig, patch_file: &Path) {
    println!("Loading patches from {}...", patch_file.display());
    if !config.meta.name.is_empty() {
        println!("  {}", config.meta.name.bold());
    }
    if config.meta.workspace_relative {
        println!("  {}", format!("Paths relative to {}", workspace.display()).dimmed());
    }
}

fn cmd_apply(target: Target, options: ApplyOptions) -> Result<i32> {
    let (workspace, patch_files) = resolve_target_files(target)?;
    let dry_run = options.dry_run;

    println!("Workspace: {}", workspace.display());
    println!();

    let mut totals = ReportSummary::default();

    for patch_file in patch_files {
        let config = load_from_path(&patch_file)?;
        print_header(&workspace, &config, &patch_file);

        if dry_run {
            println!("{}", "  [DRY RUN - showing what would be applied]".cyan());
        }

        let report = apply_patches(&config, &workspace, options.clone())?;

        for (path, result) in report.iter() {
            match result {
                Ok(PatchResult::Applied { rules, diff }) => {
                    let verb = if dry_run { "Would apply" } else { "Applied" };
                    println!(
                        "{} {}: {} {} rule(s)",
                        "✓".green(),
                        path.display(),
                        verb,
                        rules
                    );

                    if let Some(diff) = diff {
                        display_diff(diff);
                    }
                }
                Ok(PatchResult::Unchanged) => {
                    println!("{} {}: Already applied", "⊙".yellow(), path.display());
                }
                Err(e) => {
                    eprintln!("{} {}: {} - {}", "✗".red(), path.display(), e.kind(), e);
                    explain_failure(e);
                }
            }
        }

        totals += report.summary();
        println!();
    }

    println!("{}", "Summary:".bold());
    println!(
        "  {} files applied ({} rules)",
        format!("{}", totals.applied).green(),
        totals.rules_applied
    );
    println!(
        "  {} already applied",
        format!("{}", totals.unchanged).yellow()
    );
    println!("  {} failed", format!("{}", totals.failed).red());

    Ok(if totals.failed > 0 { 1 } else { 0 })
}

/// Read-only evaluation of every patch file.
fn check_all(workspace: &Path, patch_files: &[PathBuf]) -> Result<Vec<PatchReport>> {
    let mut reports = Vec::with_capacity(patch_files.len());
    for patch_file in patch_files {
        let config = load_from_path(patch_file)?;
        reports.push(check_patches(&config, workspace, ApplyOptions::default())?);
    }
    Ok(reports)
}

fn cmd_status(target: Target) -> Result<i32> {
    let (workspace, patch_files) = resolve_target_files(target)?;

    println!("{}", "Patch Status Report".bold());
    println!("Workspace: {}", workspace.display());
    println!();

    let mut applied = Vec::new();
    let mut pending = Vec::new();
    let mut failing = Vec::new();

    for report in check_all(&workspace, &patch_files)? {
        for (path, result) in report.iter() {
            let name = path.display().to_string();
            match result {
                Ok(PatchResult::Unchanged) => applied.push(name),
                Ok(PatchResult::Applied { rules, .. }) => {
                    pending.push((name, format!("{rules} rule(s) would apply")))
                }
                Err(e) => failing.push((name, e.to_string())),
            }
        }
    }

    if !applied.is_empty() {
        println!(
            "{} {} ({} files)",
            "✓".green(),
            "APPLIED".green().bold(),
            applied.len()
        );
        for name in &applied {
            println!("  - {}", name);
        }
        println!();
    }

    if !pending.is_empty() {
        println!(
            "{} {} ({} files)",
            "⊙".yellow(),
            "PENDING".yellow().bold(),
            pending.len()
        );
        for (name, reason) in &pending {
            println!("  - {} ({})", name, reason.dimmed());
        }
        println!();
    }

    if !failing.is_empty() {
        println!(
            "{} {} ({} files)",
            "✗".red(),
            "FAILING".red().bold(),
            failing.len()
        );
        for (name, reason) in &failing {
            println!("  - {} ({})", name, reason.dimmed());
        }
        println!();
    }

    Ok(0)
}

fn cmd_verify(target: Target) -> Result<i32> {
    let (workspace, patch_files) = resolve_target_files(target)?;

    println!("{}", "Verifying patches...".bold());
    println!("Workspace: {}", workspace.display());
    println!();

    let mut verified = 0;
    let mut mismatch = 0;

    for report in check_all(&workspace, &patch_files)? {
        for (path, result) in report.iter() {
            match result {
                Ok(PatchResult::Unchanged) => {
                    println!("{} {}: Verified (already applied)", "✓".green(), path.display());
                    verified += 1;
                }
                Ok(PatchResult::Applied { rules, .. }) => {
                    eprintln!("{} {}: MISMATCH", "✗".red(), path.display());
                    eprintln!("  Expected: patch already applied");
                    eprintln!("  Found: {} rule(s) not yet applied", rules);
                    mismatch += 1;
                }
                Err(e) => {
                    eprintln!("{} {}: MISMATCH", "✗".red(), path.display());
                    eprintln!("  Error: {}", e);
                    mismatch += 1;
                }
            }
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} verified", format!("{}", verified).green());
    println!("  {} mismatch", format!("{}", mismatch).red());

    Ok(if mismatch > 0 { 1 } else { 0 })
}

fn cmd_list(target: Target) -> Result<i32> {
    let (workspace, patch_files) = resolve_target_files(target)?;

    for patch_file in patch_files {
        let config = load_from_path(&patch_file)?;
        print_header(&workspace, &config, &patch_file);
        if let Some(description) = &config.meta.description {
            println!("  {}", description.dimmed());
        }

        for file in &config.files {
            let on_disk = resolve_target(&config, &workspace, &file.path);
            let marker = if on_disk.exists() {
                "•".normal()
            } else {
                "?".yellow()
            };
            println!("  {} {} ({} rule(s))", marker, file.path, file.rules.len());
            for (idx, rule) in file.rules.iter().enumerate() {
                let first_line = rule.search.lines().next().unwrap_or("");
                match &rule.note {
                    Some(note) => println!("      #{} {} - {}", idx + 1, first_line, note.dimmed()),
                    None => println!("      #{} {}", idx + 1, first_line),
                }
            }
        }
        println!();
    }

    Ok(0)
}
