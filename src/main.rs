use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ralph_merge_lib::git::GitManager;
use ralph_merge_lib::merge::{MergeConfigManager, MergeOrchestrator, MergeRequest, TaskIntent};

/// Ralph Merge - intent-aware merging of parallel agent worktrees
#[derive(Parser, Debug)]
#[command(name = "ralph-merge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project root holding the `.ralph-ui/` directory
    #[arg(long, env = "RALPH_PROJECT", default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show what merging the tasks would do, without writing anything
    Preview {
        #[arg(required = true)]
        tasks: Vec<String>,
    },

    /// Merge the tasks' captured changes into the project
    Merge {
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Compute the report but leave every file untouched
        #[arg(long)]
        dry_run: bool,

        /// Send every conflict to human review instead of the AI agent
        #[arg(long)]
        no_ai: bool,

        /// Lock scope (defaults to the sorted task ids)
        #[arg(long)]
        scope: Option<String>,
    },

    /// Print the tracked timeline of a file as JSON
    Timeline { file: String },

    /// Start tracking a task that already has a worktree
    Track {
        task: String,
        worktree: PathBuf,

        /// Task title recorded as its intent
        #[arg(long)]
        title: Option<String>,

        /// Branch the worktree forked from (defaults to the project's current branch)
        #[arg(long)]
        target_branch: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let project = cli
        .project
        .canonicalize()
        .with_context(|| format!("Project directory {:?} not found", cli.project))?;

    match cli.command {
        Command::Preview { tasks } => {
            let orchestrator = MergeOrchestrator::from_project(&project)?;
            let preview = orchestrator.preview_merge(&tasks)?;

            println!(
                "{} file(s), {} conflict(s), {} eligible for AI",
                preview.total_files, preview.total_conflicts, preview.ai_eligible_conflicts
            );
            for file in &preview.files {
                println!(
                    "  {} [{}] {} conflict(s) ({})",
                    file.file_path,
                    file.strategy,
                    file.conflict_count,
                    file.tasks.join(", ")
                );
                for conflict in &file.conflicts {
                    println!(
                        "    - {} {}: {}",
                        conflict.severity, conflict.location, conflict.reason
                    );
                }
            }
        }

        Command::Merge {
            tasks,
            dry_run,
            no_ai,
            scope,
        } => {
            let mut config = MergeConfigManager::new(&project)
                .read()
                .map_err(anyhow::Error::msg)?;
            if no_ai {
                config.enable_ai = false;
            }
            let orchestrator = MergeOrchestrator::from_project_with_config(&project, config)?;

            let mut request = MergeRequest::new(tasks).dry_run(dry_run);
            if let Some(scope) = scope {
                request = request.with_scope(scope);
            }
            let report = orchestrator.merge(&request).await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                bail!(
                    "{} unresolved conflict(s) need review",
                    report.unresolved_conflicts().len()
                );
            }
        }

        Command::Timeline { file } => {
            let orchestrator = MergeOrchestrator::from_project(&project)?;
            let tracker = orchestrator.tracker();
            let tracker = tracker
                .lock()
                .map_err(|e| anyhow::anyhow!("Tracker lock poisoned: {}", e))?;
            match tracker.get_timeline(&file) {
                Some(timeline) => println!("{}", serde_json::to_string_pretty(timeline)?),
                None => bail!("No timeline tracked for {}", file),
            }
        }

        Command::Track {
            task,
            worktree,
            title,
            target_branch,
        } => {
            let orchestrator = MergeOrchestrator::from_project(&project)?;
            let tracker = orchestrator.tracker();
            let mut tracker = tracker
                .lock()
                .map_err(|e| anyhow::anyhow!("Tracker lock poisoned: {}", e))?;
            let target_branch = target_branch
                .or_else(|| GitManager::new(&project).ok()?.current_branch_name())
                .unwrap_or_else(|| "main".to_string());
            let intent = title.map(|t| TaskIntent::new(t, ""));
            let files =
                tracker.initialize_from_worktree(&task, &worktree, intent, &target_branch)?;

            println!("Tracking {} file(s) for {}", files.len(), task);
            for file in files {
                println!("  {}", file);
            }
        }
    }

    Ok(())
}
