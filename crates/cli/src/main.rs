//! guidevcs command-line tool.
//!
//! Provides subcommands for creating projects and branches, committing guide
//! documents, inspecting history and diffs, and merging branches with
//! explicit conflict resolutions. Also generates and validates the TOML
//! configuration file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use guidevcs_core::config::AppConfig;
use guidevcs_core::{
    ChangeKind, Conflict, DocPath, ProjectOptions, Resolution, ResolutionStrategy, VersionError,
    VersionManager,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// guidevcs command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "guidevcs",
    version,
    about = "Branch, commit and merge step-by-step guide documents"
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when it is absent.
    #[arg(short, long, global = true, default_value = "./guidevcs.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./guidevcs.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Manage branches.
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Commit a JSON document to a branch.
    Commit {
        project: String,
        branch: String,

        /// JSON file holding the full document.
        #[arg(short, long)]
        file: PathBuf,

        /// Commit message.
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Show a commit and its document.
    Show { commit: String },

    /// Show first-parent history of a branch.
    Log {
        project: String,
        branch: String,

        /// Maximum number of commits to show.
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Structural diff between two commits.
    Diff { from: String, to: String },

    /// Compare two branches: ahead/behind counts and predicted conflicts.
    Compare {
        project: String,
        source: String,
        target: String,
    },

    /// Merge SOURCE into TARGET.
    Merge {
        project: String,
        source: String,
        target: String,

        /// Commit message for the merge commit.
        #[arg(short, long, default_value = "")]
        message: String,

        /// Resolution for a conflicting path: `path=strategy[:json]`.
        /// Strategies: source, target, base, manual.
        #[arg(short, long = "resolve")]
        resolve: Vec<String>,

        /// JSON file holding an array of resolutions.
        #[arg(long)]
        resolutions: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectAction {
    /// Create a project with an empty default branch.
    Init {
        id: String,

        /// Author recorded on commits. Defaults to `identity.author`.
        #[arg(short, long)]
        author: Option<String>,

        /// Default branch name. Defaults to `project.default_branch`.
        #[arg(long)]
        default_branch: Option<String>,
    },
    /// Show project details.
    Show { id: String },
}

#[derive(Subcommand, Debug)]
enum BranchAction {
    /// List branches of a project.
    List { project: String },
    /// Create a branch at a commit or at the default branch head.
    Create {
        project: String,
        name: String,

        #[arg(short, long)]
        description: Option<String>,

        /// Commit to fork from.
        #[arg(long)]
        from: Option<String>,
    },
    /// Delete a non-default branch.
    Delete { project: String, name: String },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = expand_tilde(&cli.config);
    match cli.command {
        Commands::Init { output } => {
            init_logging("warn");
            cmd_init(&output)
        }
        Commands::Validate => {
            init_logging("warn");
            cmd_validate(&config_path)
        }
        command => {
            let config = load_config(&config_path)?;
            init_logging(&config.log.level);
            let vm = VersionManager::from_config(&config).context("failed to open store")?;
            dispatch(&vm, &config, command)
        }
    }
}

fn dispatch(vm: &VersionManager, config: &AppConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Project { action } => cmd_project(vm, config, action),
        Commands::Branch { action } => cmd_branch(vm, action),
        Commands::Commit {
            project,
            branch,
            file,
            message,
        } => cmd_commit(vm, &project, &branch, &file, &message),
        Commands::Show { commit } => cmd_show(vm, &commit),
        Commands::Log {
            project,
            branch,
            limit,
        } => cmd_log(vm, &project, &branch, limit),
        Commands::Diff { from, to } => cmd_diff(vm, &from, &to),
        Commands::Compare {
            project,
            source,
            target,
        } => cmd_compare(vm, &project, &source, &target),
        Commands::Merge {
            project,
            source,
            target,
            message,
            resolve,
            resolutions,
        } => {
            let resolutions = collect_resolutions(&resolve, resolutions.as_deref())?;
            cmd_merge(vm, &project, &source, &target, &message, resolutions)
        }
        Commands::Init { .. } | Commands::Validate => Ok(()),
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    AppConfig::load_and_resolve(path).context("failed to load configuration file")
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# guidevcs configuration

[storage]
# "sqlite" persists history under data_dir; "memory" keeps it for one run.
backend = "sqlite"
data_dir = "./.guidevcs"

[log]
level = "info"

[identity]
# author = "Your Name"
# author_env = "GUIDEVCS_AUTHOR"

[project]
default_branch = "main"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Set identity.author (or identity.author_env)");
    println!(
        "  2. Validate with: guidevcs validate --config {}",
        output.display()
    );
    println!(
        "  3. Create a project: guidevcs project init my-guide --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Backend       : {:?}", config.storage.backend);
    println!("  Database      : {}", config.storage.database_path().display());
    println!("  Log level     : {}", config.log.level);
    println!(
        "  Author        : {}",
        config.identity.author.as_deref().unwrap_or("NOT SET")
    );
    println!("  Default branch: {}", config.project.default_branch);
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_project(vm: &VersionManager, config: &AppConfig, action: ProjectAction) -> Result<()> {
    match action {
        ProjectAction::Init {
            id,
            author,
            default_branch,
        } => {
            let author = author
                .or_else(|| config.identity.author.clone())
                .context("no author given: pass --author or set identity.author")?;
            let branch = default_branch.unwrap_or_else(|| config.project.default_branch.clone());
            let project = vm
                .init_project(&id, ProjectOptions::new(author).with_default_branch(branch))
                .with_context(|| format!("failed to create project '{}'", id))?;
            println!(
                "Project {} created with default branch '{}'",
                project.id, project.default_branch
            );
            Ok(())
        }
        ProjectAction::Show { id } => {
            let project = vm.get_project(&id).context("failed to load project")?;
            let branches = vm.get_branches(&id).context("failed to list branches")?;
            println!("Project: {}", project.id);
            println!("=========={}", "=".repeat(project.id.len()));
            println!();
            println!("  Author        : {}", project.author);
            println!("  Default branch: {}", project.default_branch);
            println!("  Branches      : {}", branches.len());
            println!("  Created at    : {}", project.created_at.to_rfc3339());
            Ok(())
        }
    }
}

fn cmd_branch(vm: &VersionManager, action: BranchAction) -> Result<()> {
    match action {
        BranchAction::List { project } => {
            let branches = vm.get_branches(&project).context("failed to list branches")?;

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Branch", "Head", "Fork point", "Updated", "Description"]);

            for branch in &branches {
                table.add_row(vec![
                    Cell::new(&branch.name),
                    Cell::new(short_id(branch.head_commit.as_deref())),
                    Cell::new(short_id(branch.fork_point.as_deref())),
                    Cell::new(branch.updated_at.format("%Y-%m-%d %H:%M:%S")),
                    Cell::new(branch.description.as_deref().unwrap_or("")),
                ]);
            }

            println!("{}", table);
            Ok(())
        }
        BranchAction::Create {
            project,
            name,
            description,
            from,
        } => {
            let branch = vm
                .create_branch(&project, &name, description.as_deref(), from.as_deref())
                .with_context(|| format!("failed to create branch '{}'", name))?;
            println!(
                "Branch {} created at {}",
                branch.name,
                short_id(branch.head_commit.as_deref())
            );
            Ok(())
        }
        BranchAction::Delete { project, name } => {
            vm.delete_branch(&project, &name)
                .with_context(|| format!("failed to delete branch '{}'", name))?;
            println!("Branch {} deleted", name);
            Ok(())
        }
    }
}

fn cmd_commit(
    vm: &VersionManager,
    project: &str,
    branch: &str,
    file: &Path,
    message: &str,
) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let data: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let commit = vm
        .commit(project, branch, message, &data)
        .context("commit failed")?;
    println!("[{} {}] {}", branch, short_id(Some(&commit.id)), commit.message);
    Ok(())
}

fn cmd_show(vm: &VersionManager, id: &str) -> Result<()> {
    let commit = vm.get_commit(id).context("failed to load commit")?;
    let document = vm.get_document(id).context("failed to load document")?;

    println!("commit {}", commit.id);
    if commit.is_merge() {
        println!("Merge:   {}", commit.parents.join(" "));
    } else if let Some(parent) = commit.first_parent() {
        println!("Parent:  {}", parent);
    }
    println!("Author:  {}", commit.author);
    println!("Date:    {}", commit.created_at.to_rfc3339());
    println!("Snapshot: {}", commit.snapshot_id);
    println!();
    println!("    {}", commit.message);
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&document).context("failed to render document")?
    );
    Ok(())
}

fn cmd_log(vm: &VersionManager, project: &str, branch: &str, limit: Option<usize>) -> Result<()> {
    let commits = vm
        .log(project, branch, limit)
        .context("failed to read history")?;

    if commits.is_empty() {
        println!("Branch {} has no commits.", branch);
        return Ok(());
    }

    for commit in &commits {
        let marker = if commit.is_merge() { " (merge)" } else { "" };
        println!(
            "{}  {}  {:<12} {}{}",
            short_id(Some(&commit.id)),
            commit.created_at.format("%Y-%m-%d %H:%M"),
            truncate(&commit.author, 12),
            commit.message,
            marker
        );
    }
    Ok(())
}

fn cmd_diff(vm: &VersionManager, from: &str, to: &str) -> Result<()> {
    let entries = vm.diff_commits(from, to).context("failed to diff commits")?;
    if entries.is_empty() {
        println!("No differences.");
        return Ok(());
    }

    for entry in &entries {
        match entry.kind() {
            ChangeKind::Added => println!("+ {} = {}", entry.path, render(entry.right.as_ref())),
            ChangeKind::Removed => println!("- {} = {}", entry.path, render(entry.left.as_ref())),
            ChangeKind::Modified => println!(
                "~ {}: {} -> {}",
                entry.path,
                render(entry.left.as_ref()),
                render(entry.right.as_ref())
            ),
        }
    }
    println!();
    println!("{} path(s) changed", entries.len());
    Ok(())
}

fn cmd_compare(vm: &VersionManager, project: &str, source: &str, target: &str) -> Result<()> {
    let comparison = vm
        .compare_branches(project, source, target)
        .context("failed to compare branches")?;

    println!("{} vs {}", source, target);
    println!("  Ahead     : {}", comparison.ahead);
    println!("  Behind    : {}", comparison.behind);
    println!(
        "  Merge base: {}",
        short_id(comparison.merge_base.as_deref())
    );
    if comparison.conflicts.is_empty() {
        println!("  Conflicts : none");
    } else {
        println!("  Conflicts : {}", comparison.conflicts.len());
        for path in &comparison.conflicts {
            println!("    {}", path);
        }
    }
    Ok(())
}

fn cmd_merge(
    vm: &VersionManager,
    project: &str,
    source: &str,
    target: &str,
    message: &str,
    resolutions: Vec<Resolution>,
) -> Result<()> {
    let message = if message.is_empty() {
        format!("Merge branch '{}' into {}", source, target)
    } else {
        message.to_string()
    };

    let result = if resolutions.is_empty() {
        vm.merge_branches(project, source, target, &message)
    } else {
        vm.merge_with_resolutions(project, source, target, &resolutions, &message)
    };

    match result {
        Ok(commit) => {
            println!(
                "Merged {} into {} as {}",
                source,
                target,
                short_id(Some(&commit.id))
            );
            Ok(())
        }
        Err(VersionError::MergeConflict { conflicts }) => {
            print_conflicts(&conflicts);
            anyhow::bail!(
                "merge has {} conflict(s); rerun with --resolve path=strategy",
                conflicts.len()
            )
        }
        Err(e) => Err(e).context("merge failed"),
    }
}

fn print_conflicts(conflicts: &[Conflict]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Path", "Base", "Source", "Target"]);

    for conflict in conflicts {
        table.add_row(vec![
            Cell::new(conflict.path.to_string()).fg(Color::Yellow),
            Cell::new(render(conflict.base_value.as_ref())),
            Cell::new(render(conflict.source_value.as_ref())),
            Cell::new(render(conflict.target_value.as_ref())),
        ]);
    }
    println!("{}", table);
}

// ---------------------------------------------------------------------------
// Resolutions
// ---------------------------------------------------------------------------

fn collect_resolutions(specs: &[String], file: Option<&Path>) -> Result<Vec<Resolution>> {
    let mut resolutions = match file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str::<Vec<Resolution>>(&raw)
                .with_context(|| format!("{} is not a resolution list", path.display()))?
        }
        None => Vec::new(),
    };
    for spec in specs {
        resolutions.push(parse_resolution(spec)?);
    }
    Ok(resolutions)
}

/// Parse `path=strategy[:json]`, e.g. `steps.0.title=source` or
/// `title=manual:"Welcome"`. `manual` without a value deletes the path.
fn parse_resolution(spec: &str) -> Result<Resolution> {
    let (path, rest) = spec
        .split_once('=')
        .with_context(|| format!("expected path=strategy, got '{}'", spec))?;
    let (strategy, value) = match rest.split_once(':') {
        Some((strategy, raw)) => {
            let value: Value = serde_json::from_str(raw)
                .with_context(|| format!("invalid JSON value in '{}'", spec))?;
            (strategy, Some(value))
        }
        None => (rest, None),
    };

    let strategy: ResolutionStrategy = strategy.trim().parse()?;
    if value.is_some() && strategy != ResolutionStrategy::Manual {
        anyhow::bail!("only the manual strategy takes a value: '{}'", spec);
    }
    Ok(Resolution {
        path: DocPath::parse(path.trim()),
        resolution: strategy,
        value,
    })
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn short_id(id: Option<&str>) -> String {
    match id {
        Some(id) => id.chars().take(8).collect(),
        None => "-".to_string(),
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        Some(v) => truncate(&v.to_string(), 40),
        None => "(absent)".to_string(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
