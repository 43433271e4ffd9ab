// src/main.rs
//
// `taskforged` — a thin CLI front end over `Scheduler`. There is no HTTP
// layer here; each subcommand drives the Core API directly, without an
// intervening service layer.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use uuid::Uuid;

use taskforge::{HandlerRegistry, JobSpec, JobStatus, ListFilter, Priority, Scheduler, SchedulerConfig};

mod handlers;

#[derive(Parser)]
#[command(name = "taskforged", version, about = "Priority + dependency aware task queue scheduler")]
struct Cli {
    /// Path to a YAML config file; falls back to built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler in the foreground, printing events as they occur.
    Start,
    /// Submit a single job and print its assigned id.
    Submit {
        job_type: String,
        #[arg(long, default_value = "normal")]
        priority: String,
        #[arg(long, default_value_t = 1)]
        cpu_units: u32,
        #[arg(long, default_value_t = 128)]
        memory_mb: u32,
        #[arg(long = "depends-on")]
        depends_on: Vec<Uuid>,
        #[arg(long)]
        payload: Option<String>,
        /// Overrides `defaults.max_attempts` from the config for this job.
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Overrides `defaults.backoff_multiplier` from the config for this job.
        #[arg(long)]
        backoff_multiplier: Option<f64>,
        /// Overrides `defaults.timeout_seconds` from the config for this job.
        #[arg(long)]
        timeout_seconds: Option<u64>,
    },
    /// Show a single job's full record.
    Get { id: Uuid },
    /// List jobs, optionally filtered by status, one page at a time.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// `next_cursor` from a previous page's output.
        #[arg(long)]
        cursor: Option<Uuid>,
    },
    /// Request cancellation of a job.
    Cancel { id: Uuid },
    /// List jobs currently in the dead-letter queue.
    DlqList,
    /// Resubmit a dead-lettered job with a fresh attempt budget.
    DlqRetry { id: Uuid },
    /// Print current queue depths, resource usage, and throughput.
    Metrics,
}

fn parse_priority(s: &str) -> Result<Priority> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "critical" => Priority::Critical,
        "high" => Priority::High,
        "normal" => Priority::Normal,
        "low" => Priority::Low,
        other => anyhow::bail!("unknown priority '{other}'"),
    })
}

fn parse_status(s: &str) -> Result<JobStatus> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "pending" => JobStatus::Pending,
        "blocked" => JobStatus::Blocked,
        "ready" => JobStatus::Ready,
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "timeout" => JobStatus::Timeout,
        "cancelled" => JobStatus::Cancelled,
        "deadlettered" | "dead_lettered" | "dlq" => JobStatus::DeadLettered,
        other => anyhow::bail!("unknown status '{other}'"),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SchedulerConfig::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SchedulerConfig::default(),
    };

    let mut registry = HandlerRegistry::new();
    handlers::register_builtin(&mut registry);

    let defaults = config.defaults.clone();
    let scheduler = Scheduler::new(config, registry)
        .await
        .context("failed to initialize scheduler")?;

    match cli.command {
        Commands::Start => {
            info!("taskforged scheduler running, press ctrl-c to stop");
            let mut events = scheduler.subscribe();
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(ev) => println!("{}", serde_json::to_string(&ev)?),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("event subscriber lagged, dropped {n} events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        info!("shutting down");
                        break;
                    }
                }
            }
        }
        Commands::Submit {
            job_type,
            priority,
            cpu_units,
            memory_mb,
            depends_on,
            payload,
            max_attempts,
            backoff_multiplier,
            timeout_seconds,
        } => {
            let mut spec = JobSpec::new(job_type, cpu_units, memory_mb);
            spec.priority = parse_priority(&priority)?;
            spec.depends_on = depends_on.into_iter().collect::<HashSet<_>>();
            spec.payload = payload.map(String::into_bytes).unwrap_or_default();
            spec.max_attempts = max_attempts.unwrap_or(defaults.max_attempts);
            spec.backoff_multiplier = backoff_multiplier.unwrap_or(defaults.backoff_multiplier);
            spec.timeout_seconds = timeout_seconds.unwrap_or(defaults.timeout_seconds);
            let id = scheduler.submit(spec).await?;
            println!("{id}");
        }
        Commands::Get { id } => match scheduler.get(id).await {
            Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
            None => anyhow::bail!("job {id} not found"),
        },
        Commands::List { status, limit, cursor } => {
            let filter = ListFilter {
                status: status.as_deref().map(parse_status).transpose()?,
                limit,
                cursor,
                ..Default::default()
            };
            let page = scheduler.list(filter).await;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Commands::Cancel { id } => {
            scheduler.cancel(id).await?;
            println!("cancel requested for {id}");
        }
        Commands::DlqList => {
            let jobs = scheduler.dlq_list().await;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        Commands::DlqRetry { id } => {
            scheduler.dlq_retry(id).await?;
            println!("{id} resubmitted from the dead-letter queue");
        }
        Commands::Metrics => {
            let snapshot = scheduler.metrics().await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}
