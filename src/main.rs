use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, RwLock};

use taskweave::config::Config;
use taskweave::orchestration::{
    AgentAssignment, AgentInfo, AssignmentConstraints, Coordinator, CoordinatorEvent,
    TaskDescriptor, TaskOrchestrator, TaskOutcome,
};
use taskweave::{wlog, Error, Result};

/// taskweave - dependency-aware task scheduling for agent teams
#[derive(Parser, Debug)]
#[command(name = "taskweave")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    TASKWEAVE_DEBUG=1     Enable debug logging (alternative to --debug)\n    TASKWEAVE_LOG=trace   Set an explicit log level")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.taskweave/taskweave.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Read settings from this file instead of ~/.taskweave/taskweave.toml
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print tasks in execution order
    Order { file: PathBuf },

    /// Print groups of tasks that can run concurrently
    Batches { file: PathBuf },

    /// Print the longest duration-weighted chain
    CriticalPath { file: PathBuf },

    /// Print tasks with the most transitive dependents
    Bottlenecks {
        file: PathBuf,

        /// How many to show
        #[arg(long, default_value_t = 5)]
        top: usize,
    },

    /// Render the graph as a Mermaid flowchart
    Mermaid { file: PathBuf },

    /// Show lifecycle counts and remaining time
    Progress { file: PathBuf },

    /// Suggest schedule improvements
    Optimize { file: PathBuf },

    /// Print graph statistics
    Stats {
        file: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Assign ready tasks to a set of agents
    Assign {
        file: PathBuf,

        /// Agent as TYPE or TYPE:CAPACITY (repeatable)
        #[arg(long = "agent", value_parser = parse_agent_slot, required = true)]
        agents: Vec<AgentSlot>,
    },

    /// Run the whole checklist against simulated agents that always succeed
    Simulate {
        file: PathBuf,

        /// Agent as TYPE or TYPE:CAPACITY (repeatable)
        #[arg(long = "agent", value_parser = parse_agent_slot, required = true)]
        agents: Vec<AgentSlot>,
    },

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentSlot {
    pub agent_type: String,
    pub capacity: usize,
}

fn parse_agent_slot(s: &str) -> std::result::Result<AgentSlot, String> {
    let (agent_type, capacity) = match s.split_once(':') {
        Some((t, c)) => {
            let capacity = c
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid capacity '{c}' in '{s}'"))?;
            (t, capacity)
        }
        None => (s, 1),
    };
    let agent_type = agent_type.trim();
    if agent_type.is_empty() {
        return Err(format!("missing agent type in '{s}'"));
    }
    if capacity == 0 {
        return Err(format!("capacity must be at least 1 in '{s}'"));
    }
    Ok(AgentSlot {
        agent_type: agent_type.to_lowercase(),
        capacity,
    })
}

/// Agents named `<type>-<n>`, numbered per type from 1.
fn build_agents(slots: &[AgentSlot]) -> Vec<AgentInfo> {
    let mut counts = std::collections::HashMap::<&str, usize>::new();
    slots
        .iter()
        .map(|slot| {
            let n = counts.entry(slot.agent_type.as_str()).or_insert(0);
            *n += 1;
            AgentInfo::new(
                &format!("{}-{}", slot.agent_type, n),
                &slot.agent_type,
                slot.capacity,
            )
        })
        .collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    taskweave::log::init(cli.debug);

    if let Command::InitConfig { force } = cli.command {
        return run_init_config(cli.config.as_deref(), force);
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Order { file } => {
            let orch = load(&file, &config)?;
            for (i, id) in orch.graph().get_execution_order()?.iter().enumerate() {
                println!("{:>3}. {}", i + 1, describe(&orch, id));
            }
        }
        Command::Batches { file } => {
            let orch = load(&file, &config)?;
            for batch in orch.graph().get_parallel_batches()? {
                println!(
                    "Level {} ({}m): {}",
                    batch.level,
                    batch.duration,
                    batch.task_ids.join(", ")
                );
            }
        }
        Command::CriticalPath { file } => {
            let orch = load(&file, &config)?;
            let cp = orch.graph().get_critical_path()?;
            println!("Critical path ({}m):", cp.total_duration);
            for id in &cp.path {
                let marker = if cp.bottlenecks.contains(id) { "  !" } else { "   " };
                println!("{} {}", marker, describe(&orch, id));
            }
        }
        Command::Bottlenecks { file, top } => {
            let orch = load(&file, &config)?;
            for b in orch.graph().get_bottlenecks().iter().take(top) {
                println!(
                    "{:<30} {:>3} dependents  {:>4}m  impact {}",
                    b.task_id, b.dependent_count, b.duration, b.impact
                );
            }
        }
        Command::Mermaid { file } => {
            let orch = load(&file, &config)?;
            print!("{}", orch.graph().to_mermaid());
        }
        Command::Progress { file } => {
            let orch = load(&file, &config)?;
            let p = orch.track_progress();
            println!("{:.1}% complete ({} of {})", p.percent_complete, p.completed, p.total);
            println!(
                "  ready {}  running {}  blocked {}  pending {}  failed {}  cancelled {}",
                p.ready, p.running, p.blocked, p.pending, p.failed, p.cancelled
            );
            println!("  ~{}m remaining", p.estimated_remaining_minutes);
        }
        Command::Optimize { file } => {
            let orch = load(&file, &config)?;
            let plan = orch.optimize_schedule()?;
            println!(
                "Critical path: {} ({}m)",
                plan.critical_path.path.join(" -> "),
                plan.critical_path.total_duration
            );
            if plan.recommendations.is_empty() {
                println!("No recommendations.");
            }
            for r in &plan.recommendations {
                println!("  - {}", r);
            }
        }
        Command::Stats { file, json } => {
            let orch = load(&file, &config)?;
            let stats = orch.graph().get_stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Tasks:        {}", stats.task_count);
                println!("Dependencies: {}", stats.dependency_count);
                println!("Roots/leaves: {}/{}", stats.root_count, stats.leaf_count);
                println!(
                    "Batches:      {} (max {} in parallel)",
                    stats.batch_count, stats.max_parallelism
                );
                println!(
                    "Duration:     {}m total, {}m critical path",
                    stats.total_duration, stats.critical_path_duration
                );
            }
        }
        Command::Assign { file, agents } => run_assign(&file, &config, &agents)?,
        Command::Simulate { file, agents } => run_simulate(&file, &config, &agents)?,
        Command::InitConfig { .. } => {}
    }

    Ok(())
}

fn load(file: &Path, config: &Config) -> Result<TaskOrchestrator> {
    let text = std::fs::read_to_string(file)?;
    let mut orch = TaskOrchestrator::new(&config.orchestrator);
    let report = orch.load_document(&text);
    for d in &report.diagnostics {
        eprintln!("warning: {}", d.message);
    }
    wlog!(
        "cli: loaded {} ({} tasks)",
        file.display(),
        report.task_count
    );
    Ok(orch)
}

fn describe(orch: &TaskOrchestrator, id: &str) -> String {
    match orch.get_task(id) {
        Some(t) => format!(
            "[{}] {} ({}, {}m) {}",
            t.status, t.name, t.priority, t.estimated_duration, t.id
        ),
        None => id.to_string(),
    }
}

fn run_assign(file: &Path, config: &Config, slots: &[AgentSlot]) -> Result<()> {
    let orch = load(file, config)?;
    let mut balancer = AgentAssignment::new(config.assignment.clone());
    for agent in build_agents(slots) {
        balancer.register_agent(agent)?;
    }

    let ready = orch.ready_tasks();
    if ready.is_empty() {
        println!("No ready tasks.");
        return Ok(());
    }
    for id in ready {
        let Some(task) = orch.get_task(&id) else {
            continue;
        };
        let descriptor = TaskDescriptor::from(task);
        let constraints = match &descriptor.agent_type {
            Some(t) => AssignmentConstraints::new().prefer_type(t),
            None => AssignmentConstraints::default(),
        };
        let placed = balancer
            .assign_task(&descriptor, &constraints)
            .or_else(|| balancer.assign_task(&descriptor, &AssignmentConstraints::default()));
        match placed {
            Some(a) => println!("{:<30} -> {:<14} {}", id, a.agent_id, a.reason),
            None => println!("{:<30} -> (no agent available)", id),
        }
    }

    let stats = balancer.stats();
    println!(
        "\n{} of {} slots used, mean load {:.0}%",
        stats.used_capacity,
        stats.total_capacity,
        stats.mean_workload * 100.0
    );
    Ok(())
}

fn run_simulate(file: &Path, config: &Config, slots: &[AgentSlot]) -> Result<()> {
    let orch = load(file, config)?;
    let mut balancer = AgentAssignment::new(config.assignment.clone());
    for agent in build_agents(slots) {
        balancer.register_agent(agent)?;
    }

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        let (event_tx, mut event_rx) = mpsc::channel(100);
        let (outcome_tx, mut outcome_rx) = mpsc::channel(100);

        let worker = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    CoordinatorEvent::TaskDispatched { task_id, agent_id, .. } => {
                        println!("start    {:<30} on {}", task_id, agent_id);
                        if outcome_tx
                            .send(TaskOutcome::Completed {
                                task_id,
                                minutes: None,
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    CoordinatorEvent::TaskCompleted { task_id, .. } => {
                        println!("finish   {}", task_id);
                    }
                    CoordinatorEvent::Stalled { remaining } => {
                        println!("stalled  {}", remaining.join(", "));
                    }
                    _ => {}
                }
            }
        });

        let mut coordinator = Coordinator::new(
            Arc::new(RwLock::new(orch)),
            Arc::new(RwLock::new(balancer)),
            event_tx,
        );
        let summary = coordinator.run(&mut outcome_rx).await;
        drop(coordinator);
        let _ = worker.await;
        summary
    })?;

    println!(
        "\n{} dispatched, {} completed, {} failed, {} unfinished",
        summary.dispatched,
        summary.completed.len(),
        summary.failed.len(),
        summary.remaining.len()
    );
    Ok(())
}

fn run_init_config(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => Config::config_path()?,
    };
    if path.exists() && !force {
        return Err(Error::Validation(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    Config::default().save_to(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
