//! task-scheduler demo: builds a nested group tree of sleeping tasks,
//! runs it, and prints the aggregate outcome.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};

use task_scheduler::tasks::{global, GroupId, TaskManager, TaskManagerConfig};

// ── CLI ─────────────────────────────────────────────────────────────

/// Run a demo workload through the task scheduler.
#[derive(Parser, Debug)]
#[command(name = "task-scheduler", version, about)]
struct Cli {
    /// Path to a TOML scheduler config file.
    #[arg(long, env = "TASK_SCHEDULER_CONFIG")]
    config: Option<PathBuf>,

    /// Number of top-level groups under the root.
    #[arg(long, default_value_t = 3)]
    groups: usize,

    /// Tasks created in every group.
    #[arg(long, default_value_t = 4)]
    tasks_per_group: usize,

    /// Make every K-th task fail (0 disables failures).
    #[arg(long, default_value_t = 5)]
    fail_every: usize,

    /// Nesting depth below each top-level group.
    #[arg(long, default_value_t = 2)]
    depth: usize,

    /// Cancel the whole tree after this many milliseconds.
    #[arg(long)]
    cancel_after_ms: Option<u64>,

    /// Print a debug snapshot of the manager before shutting down.
    #[arg(long)]
    debug: bool,
}

// ── Workload ────────────────────────────────────────────────────────

struct Workload {
    tasks_per_group: usize,
    fail_every: usize,
    created: usize,
}

impl Workload {
    fn fill_group(&mut self, manager: &TaskManager, group_id: GroupId) -> anyhow::Result<()> {
        for _ in 0..self.tasks_per_group {
            self.created += 1;
            let n = self.created;
            let fails = self.fail_every > 0 && n % self.fail_every == 0;
            let delay = Duration::from_millis(50 + (n as u64 * 37) % 200);

            manager.create_task(format!("job-{}", n), Some(group_id), move || async move {
                tokio::time::sleep(delay).await;
                if fails {
                    anyhow::bail!("job {} hit a simulated failure", n);
                }
                Ok(serde_json::json!({ "job": n, "slept_ms": delay.as_millis() as u64 }))
            })?;
        }
        Ok(())
    }
}

fn build_tree(manager: &TaskManager, cli: &Cli) -> anyhow::Result<GroupId> {
    let root = manager.create_group("demo", None)?.id;
    let mut workload = Workload {
        tasks_per_group: cli.tasks_per_group,
        fail_every: cli.fail_every,
        created: 0,
    };

    for g in 0..cli.groups {
        let mut parent = manager.create_group(format!("group-{}", g), Some(root))?.id;
        workload.fill_group(manager, parent)?;

        for level in 1..=cli.depth {
            parent = manager
                .create_group(format!("group-{}.{}", g, level), Some(parent))?
                .id;
            workload.fill_group(manager, parent)?;
        }
    }

    info!("Built workload with {} tasks", workload.created);
    Ok(root)
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TaskManagerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => TaskManagerConfig::default(),
    };

    let manager = Arc::new(TaskManager::with_config(config)?);
    if global::install(Arc::clone(&manager)).is_err() {
        warn!("A task manager was already installed, using it instead");
    }
    let manager = global::get_instance().await;

    let root = build_tree(&manager, &cli)?;
    let handle = manager.submit_group(root)?;

    if let Some(ms) = cli.cancel_after_ms {
        let canceller = Arc::clone(&manager);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            match canceller.cancel_group(root) {
                Ok(count) => info!("Cancelled {} tasks after {}ms", count, ms),
                Err(e) => warn!("Failed to cancel demo tree: {}", e),
            }
        });
    }

    let outcome = handle.await;
    info!(
        "Demo finished: {} ({} tasks, {} failed)",
        outcome.status,
        outcome.outcomes.len(),
        outcome.failed().count()
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if cli.debug {
        manager.print_debug_info(true, true);
    }

    manager.shutdown().await;
    Ok(())
}
