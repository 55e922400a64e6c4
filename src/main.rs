use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tether_agent::{Plan, PlanLeaseRegistry};
use tether_core::config::TetherConfig;
use tether_core::types::ThreadId;
use tether_core::{SystemClock, UuidGenerator};
use tether_memory::{SqliteKvStore, StateStore};

#[derive(Parser)]
#[command(name = "tether", version, about = "Inspect and maintain Tether execution state")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "tether.toml", env = "TETHER_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and sweep plan leases
    Plans {
        #[command(subcommand)]
        action: PlansAction,
    },
    /// Inspect persisted thread states
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum PlansAction {
    /// List plans
    List {
        /// Only show plans of this thread
        #[arg(long)]
        thread: Option<String>,
    },
    /// Pause silent plans and open long-silent ones for takeover
    Sweep {
        /// Thread to sweep (all threads if omitted)
        #[arg(long)]
        thread: Option<String>,
    },
    /// Remove plans past their TTL
    Cleanup {
        /// Thread to clean (all threads if omitted)
        #[arg(long)]
        thread: Option<String>,
    },
    /// Remove one plan regardless of owner
    Remove {
        #[arg(long)]
        thread: String,
        /// Plan id
        plan_id: String,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// List threads with persisted state
    List,
    /// Print a thread's execution state as JSON
    Show {
        /// Thread id
        thread: String,
    },
    /// Delete a thread's execution state
    Evict {
        /// Thread id
        thread: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Completions need neither config nor store
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "tether", &mut std::io::stdout());
        }
        Commands::Config => {
            let config = load_config(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Plans { action } => {
            let config = load_config(&cli.config)?;
            let registry = PlanLeaseRegistry::new(
                open_store(&config)?,
                Arc::new(SystemClock),
                Arc::new(UuidGenerator::new()),
            );
            run_plans(&registry, action).await?;
        }
        Commands::State { action } => {
            let config = load_config(&cli.config)?;
            run_state(&StateStore::new(open_store(&config)?), action).await?;
        }
    }

    Ok(())
}

/// Load the config (defaults if the file is absent) and install the log subscriber.
fn load_config(path: &Path) -> anyhow::Result<TetherConfig> {
    let config = if path.exists() {
        TetherConfig::load(path)?
    } else {
        TetherConfig::default()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using defaults");
    }
    Ok(config)
}

fn open_store(config: &TetherConfig) -> anyhow::Result<Arc<SqliteKvStore>> {
    let store_path = config.store_path();
    let kv = Arc::new(SqliteKvStore::open(&store_path)?);
    info!(path = %store_path.display(), "Store opened");
    Ok(kv)
}

async fn run_plans(registry: &PlanLeaseRegistry, action: PlansAction) -> anyhow::Result<()> {
    match action {
        PlansAction::List { thread } => {
            let plans = match thread {
                Some(t) => registry.get_active_plans(&ThreadId::from_str(&t)).await?,
                None => registry.list_all_plans().await?,
            };
            if plans.is_empty() {
                println!("No plans.");
            }
            for plan in &plans {
                print_plan(registry, plan);
            }
        }
        PlansAction::Sweep { thread } => {
            for thread_id in target_threads(registry, thread).await? {
                let report = registry.check_for_stalled_plans(&thread_id).await?;
                if report.is_empty() {
                    continue;
                }
                println!(
                    "{}: paused [{}], takeover available [{}]",
                    thread_id,
                    report.paused.join(", "),
                    report.takeover_available.join(", ")
                );
            }
        }
        PlansAction::Cleanup { thread } => {
            let mut total = 0;
            for thread_id in target_threads(registry, thread).await? {
                total += registry.cleanup_abandoned_plans(&thread_id).await?;
            }
            println!("Removed {} expired plan(s).", total);
        }
        PlansAction::Remove { thread, plan_id } => {
            if registry
                .remove_plan(&ThreadId::from_str(&thread), &plan_id)
                .await?
            {
                println!("Removed plan {}.", plan_id);
            } else {
                anyhow::bail!("No plan '{}' on thread '{}'", plan_id, thread);
            }
        }
    }
    Ok(())
}

async fn target_threads(
    registry: &PlanLeaseRegistry,
    thread: Option<String>,
) -> anyhow::Result<Vec<ThreadId>> {
    if let Some(t) = thread {
        return Ok(vec![ThreadId::from_str(&t)]);
    }
    let threads: BTreeSet<ThreadId> = registry
        .list_all_plans()
        .await?
        .into_iter()
        .map(|p| p.thread_id)
        .collect();
    Ok(threads.into_iter().collect())
}

fn print_plan(registry: &PlanLeaseRegistry, plan: &Plan) {
    let silent = plan.silence(registry.now()).num_seconds();
    println!(
        "{}  {}  {:<9}  owner={}  beats={}  silent={}s{}",
        plan.thread_id,
        plan.plan_id,
        plan.status.to_string(),
        plan.executor_id,
        plan.heartbeat_count,
        silent,
        if plan.takeover_allowed { "  [takeover]" } else { "" }
    );
    let skill = plan.skill_title.as_deref().or(plan.skill_slug.as_deref());
    match skill {
        Some(skill) => println!("    {} ({})", plan.goal, skill),
        None => println!("    {}", plan.goal),
    }
}

async fn run_state(states: &StateStore, action: StateAction) -> anyhow::Result<()> {
    match action {
        StateAction::List => {
            let threads = states.list_threads().await?;
            if threads.is_empty() {
                println!("No persisted threads.");
            }
            for thread in threads {
                match states.load(&thread).await {
                    Ok(Some(state)) => println!(
                        "{}  at={}  messages={}  iterations={}",
                        thread,
                        state.current_node(),
                        state.messages().len(),
                        state.metadata.total_iteration_count
                    ),
                    Ok(None) => {}
                    Err(e) => println!("{}  <unreadable: {}>", thread, e),
                }
            }
        }
        StateAction::Show { thread } => {
            let thread_id = ThreadId::from_str(&thread);
            match states.load(&thread_id).await? {
                Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                None => anyhow::bail!("No state for thread '{}'", thread),
            }
        }
        StateAction::Evict { thread } => {
            if states.evict(&ThreadId::from_str(&thread)).await? {
                println!("Evicted {}.", thread);
            } else {
                println!("No state for thread '{}'.", thread);
            }
        }
    }
    Ok(())
}
