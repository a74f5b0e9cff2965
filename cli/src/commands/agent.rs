// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent commands
//!
//! - `run`: join the fleet as one agent and serve tasks until Ctrl+C, SIGTERM
//!   or a `shutdown` broadcast
//! - `simulate`: spin up a small fleet inside this process on a private memory
//!   broker, push tasks through it and print where everything ended up

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use fleet_core::domain::agent::{AgentId, AgentStatus};
use fleet_core::domain::events::BroadcastEnvelope;
use fleet_core::domain::node_config::NodeConfigManifest;
use fleet_core::domain::task::{TaskId, TaskStatus, TypedTask};
use fleet_core::infrastructure::backend_from_url;
use fleet_core::infrastructure::broker_connection::BrokerConnection;
use fleet_core::infrastructure::memory_broker::MemoryBroker;
use fleet_swarm::application::{Coordinator, LockManager, TaskOutcome};

/// Lock taken by the built-in `sleep` handler while it sleeps.
const SLEEP_LOCK: &str = "builtin-sleep";

#[derive(Subcommand)]
pub enum AgentCommand {
    /// Join the fleet and handle tasks until stopped
    Run {
        /// Agent ID (overrides spec.agent.id)
        #[arg(long, env = "FLEET_AGENT_ID", value_name = "AGENT_ID")]
        agent_id: Option<String>,

        /// Serve Prometheus metrics on this port
        #[arg(long, value_name = "PORT")]
        metrics_port: Option<u16>,
    },

    /// Run an in-process fleet end to end
    Simulate {
        /// Number of worker agents
        #[arg(long, default_value_t = 3)]
        agents: usize,

        /// Number of tasks to distribute
        #[arg(long, default_value_t = 10)]
        tasks: usize,

        /// How long to wait for all tasks to finish, in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

pub async fn handle_command(command: AgentCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        AgentCommand::Run {
            agent_id,
            metrics_port,
        } => run(config_path, agent_id, metrics_port).await,
        AgentCommand::Simulate {
            agents,
            tasks,
            timeout_secs,
        } => simulate(agents, tasks, Duration::from_secs(timeout_secs)).await,
    }
}

/// Payload of the built-in `echo` task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoTask {
    pub message: String,
}

impl TypedTask for EchoTask {
    const TYPE: &'static str = "echo";
}

/// Payload of the built-in `sleep` task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepTask {
    pub millis: u64,
}

impl TypedTask for SleepTask {
    const TYPE: &'static str = "sleep";
}

/// Install the `echo` and `sleep` handlers every CLI agent understands.
pub fn register_builtin_handlers(coordinator: &Coordinator, lock_ttl: Duration) {
    let agent_id = coordinator.agent_id().clone();
    coordinator.register_typed(move |task: EchoTask| {
        let agent_id = agent_id.clone();
        async move {
            info!(%agent_id, message = %task.message, "echo");
            Ok(())
        }
    });

    let locks = coordinator.locks();
    coordinator.register_typed(move |task: SleepTask| sleep_holding_lock(locks.clone(), task, lock_ttl));
}

/// Sleeps are serialized fleet-wide through [`SLEEP_LOCK`].
async fn sleep_holding_lock(locks: LockManager, task: SleepTask, lock_ttl: Duration) -> Result<()> {
    let acquired = locks
        .acquire_with_retry(SLEEP_LOCK, lock_ttl, lock_ttl, Duration::from_millis(20))
        .await?;
    anyhow::ensure!(acquired, "timed out waiting for lock '{}'", SLEEP_LOCK);

    tokio::time::sleep(Duration::from_millis(task.millis)).await;
    locks.release(SLEEP_LOCK).await?;
    Ok(())
}

async fn run(config_path: Option<PathBuf>, agent_id: Option<String>, metrics_port: Option<u16>) -> Result<()> {
    let mut config = NodeConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    if let Some(agent_id) = agent_id {
        config.spec.agent.id = agent_id;
    }
    config
        .validate()
        .context("Configuration validation failed")?;

    let metrics_port = metrics_port.or_else(|| {
        config
            .spec
            .observability
            .as_ref()
            .and_then(|o| o.metrics.as_ref())
            .filter(|m| m.enabled)
            .map(|m| m.port)
    });
    if let Some(port) = metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to start Prometheus exporter")?;
        info!("Prometheus metrics on http://{}/metrics", addr);
    }

    let agent_id = config.agent_id()?;
    let backend = backend_from_url(&config.spec.broker.url)
        .with_context(|| format!("Unusable broker URL '{}'", config.spec.broker.url))?;
    let connection = Arc::new(BrokerConnection::new(backend));
    let coordinator = Coordinator::new(agent_id, connection);

    let coordination = &config.spec.coordination;
    register_builtin_handlers(&coordinator, Duration::from_secs(coordination.lock_ttl_secs));

    coordinator
        .connect()
        .await
        .context("Failed to connect to broker")?;
    coordinator
        .spawn_status_loop(Duration::from_secs(coordination.status_interval_secs))
        .await?;
    coordinator
        .spawn_heartbeat_loop(Duration::from_secs(coordination.heartbeat_interval_secs))
        .await?;

    println!(
        "{}",
        format!(
            "✓ Agent {} online ({}), handling: {}",
            coordinator.agent_id(),
            coordinator.connection().describe(),
            coordinator.task_types().join(", ")
        )
        .green()
    );

    tokio::select! {
        _ = shutdown_signal() => {},
        _ = coordinator.shutdown_requested() => {
            info!("Stopping after shutdown broadcast");
        },
    }

    coordinator.disconnect().await;
    println!("{}", "Agent stopped".yellow());
    Ok(())
}

/// What an in-process simulation ended with.
#[derive(Debug)]
pub struct SimulationReport {
    pub tasks: Vec<(TaskId, Option<TaskStatus>)>,
    pub agents: Vec<AgentStatus>,
}

impl SimulationReport {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks
            .iter()
            .filter(|(_, s)| *s == Some(status))
            .count()
    }
}

/// Run `agents` workers plus a dispatcher on one private memory broker and
/// distribute `tasks` tasks round-robin across the workers.
pub async fn run_simulation(agents: usize, tasks: usize, timeout: Duration) -> Result<SimulationReport> {
    anyhow::ensure!(agents > 0, "--agents must be at least 1");

    let broker = MemoryBroker::named("simulation");
    let coordinator_for = |id: String| -> Result<Coordinator> {
        let agent_id = AgentId::new(id)?;
        Ok(Coordinator::new(
            agent_id,
            Arc::new(BrokerConnection::new(Arc::new(broker.clone()))),
        ))
    };

    let mut workers = Vec::with_capacity(agents);
    for n in 1..=agents {
        let worker = coordinator_for(format!("worker-{n}"))?;
        register_builtin_handlers(&worker, Duration::from_secs(5));
        worker.connect().await?;
        workers.push(worker);
    }
    let dispatcher = coordinator_for("dispatcher".to_string())?;
    dispatcher.connect().await?;

    let mut published = Vec::with_capacity(tasks);
    for n in 0..tasks {
        let target = workers[n % workers.len()].agent_id();
        let id = if n % 2 == 0 {
            let echo = EchoTask {
                message: format!("hello #{n}"),
            };
            dispatcher.publish_typed(target, &echo, 5).await?
        } else {
            let sleep = SleepTask {
                millis: 10 * (n as u64 % 3 + 1),
            };
            dispatcher.publish_typed(target, &sleep, 3).await?
        };
        published.push(id);
    }

    let mut results = Vec::with_capacity(published.len());
    for id in published {
        let status = match dispatcher
            .wait_for_terminal(&id, timeout, Duration::from_millis(10))
            .await?
        {
            TaskOutcome::Finished(status) => Some(status),
            TaskOutcome::TimedOut(last) => last,
        };
        results.push((id, status));
    }

    dispatcher
        .broadcast(&BroadcastEnvelope::status_check())
        .await?;
    let agents = dispatcher.get_all_agent_statuses().await?;

    dispatcher
        .broadcast(&BroadcastEnvelope::shutdown(Some("simulation finished".to_string())))
        .await?;
    for worker in &workers {
        worker.disconnect().await;
    }
    dispatcher.disconnect().await;

    Ok(SimulationReport {
        tasks: results,
        agents,
    })
}

async fn simulate(agents: usize, tasks: usize, timeout: Duration) -> Result<()> {
    println!(
        "Simulating {} agent(s) and {} task(s) on an in-memory broker...",
        agents, tasks
    );
    let report = run_simulation(agents, tasks, timeout).await?;

    println!();
    println!("{}", "Tasks:".bold());
    for (id, status) in &report.tasks {
        let label = match status {
            Some(TaskStatus::Completed) => "completed".green(),
            Some(TaskStatus::Failed) => "failed".red(),
            Some(other) => other.as_str().yellow(),
            None => "missing".red(),
        };
        println!("  {}  {}", id, label);
    }

    let mut totals: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, status) in &report.tasks {
        *totals
            .entry(status.map(|s| s.as_str()).unwrap_or("missing"))
            .or_default() += 1;
    }
    println!();
    println!("{}", "Summary:".bold());
    for (status, count) in totals {
        println!("  {:<12} {}", status, count);
    }

    println!();
    println!("{}", "Agents:".bold());
    for agent in &report.agents {
        println!(
            "  {:<12} {:<8} tasks completed: {}",
            agent.agent_id.as_str(),
            agent.status.as_str(),
            agent.tasks_completed
        );
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
