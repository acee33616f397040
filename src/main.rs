mod agent;
mod assign;
mod controller;
mod core;
mod graph;
mod motion;
mod sim;
mod steiner;

use crate::agent::Agent;
use crate::controller::{CoordinationController, PoseProvider, RoundReport};
use crate::core::{AgentId, ControllerEvent, Pose, Position};
use crate::graph::CommunicationGraph;
use crate::motion::MotionLimits;
use crate::sim::{PoseRegistry, SimulatedActuator};
use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Структура для зчитування зовнішньої конфігурації.
#[derive(Debug, Deserialize)]
struct Config {
    swarm: SwarmConfig,
    graph: GraphConfig,
    #[serde(default)]
    rounds: Vec<RoundConfig>,
}

#[derive(Debug, Deserialize)]
struct SwarmConfig {
    /// Власний агент координатора, реєструється як звичайний.
    leader_id: AgentId,
    broadcast_capacity: usize,
    event_capacity: usize,
    tick_hz: f64,
    linear_speed: f64,
    angular_speed: f64,
    completion_timeout_secs: u64,
    agents: Vec<AgentConfig>,
}

#[derive(Debug, Deserialize)]
struct AgentConfig {
    id: AgentId,
    x: f64,
    y: f64,
    #[serde(default)]
    heading: f64,
}

#[derive(Debug, Deserialize)]
struct GraphConfig {
    connectivity_threshold: f64,
    vertices: Vec<Position>,
}

#[derive(Debug, Deserialize)]
struct RoundConfig {
    terminals: Vec<Position>,
}

impl SwarmConfig {
    /// Період такту агента; нескінченна чи надто мала частота відхиляється.
    fn tick_period(&self) -> Result<Duration> {
        ensure!(
            self.tick_hz.is_finite() && self.tick_hz > 0.0,
            "tick_hz має бути скінченним і додатнім"
        );
        let period = Duration::try_from_secs_f64(1.0 / self.tick_hz)
            .context("tick_hz задає надто довгий період такту")?;
        ensure!(!period.is_zero(), "tick_hz задає нульовий період такту");
        Ok(period)
    }
}

impl Config {
    fn load() -> Result<Self> {
        Self::from_builder(
            config::Config::builder().add_source(config::File::with_name("Settings.toml")),
        )
        .context("Не знайдено або пошкоджено файл Settings.toml")
    }

    /// Змінні оточення `RELAY_<СЕКЦІЯ>__<КЛЮЧ>` перекривають значення з файлу.
    fn environment() -> config::Environment {
        config::Environment::with_prefix("RELAY")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let settings = builder.add_source(Self::environment()).build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let swarm = &self.swarm;
        swarm.tick_period()?;
        ensure!(swarm.linear_speed > 0.0, "linear_speed має бути додатньою");
        ensure!(swarm.angular_speed > 0.0, "angular_speed має бути додатньою");
        ensure!(swarm.broadcast_capacity > 0, "broadcast_capacity має бути додатньою");
        ensure!(swarm.event_capacity > 0, "event_capacity має бути додатньою");
        ensure!(
            self.graph.connectivity_threshold > 0.0,
            "connectivity_threshold має бути додатнім"
        );

        let mut ids = HashSet::new();
        for agent in &swarm.agents {
            ensure!(ids.insert(agent.id), "Агент {} вказаний двічі", agent.id);
        }
        if !ids.contains(&swarm.leader_id) {
            warn!(leader_id = swarm.leader_id, "Агент координатора відсутній у списку агентів");
        }
        Ok(())
    }
}

fn log_report(index: usize, report: &RoundReport) {
    match report {
        RoundReport::Completed {
            round,
            waypoints,
            assignment,
            undelivered,
        } => {
            info!(
                round,
                waypoints = waypoints.len(),
                agents = assignment.len(),
                total_distance = assignment.total_distance(),
                "Раунд {} завершено",
                index
            );
            for pair in undelivered {
                warn!(
                    round,
                    agent_id = pair.agent,
                    "Точку {} не зайнято: завдання не доставлено",
                    pair.target
                );
            }
        }
        RoundReport::NothingToDispatch { round, waypoints } => info!(
            round,
            waypoints = waypoints.len(),
            "Раунд {} не потребував переміщень",
            index
        ),
        RoundReport::EmptyTerminals => info!("Раунд {}: порожній набір терміналів", index),
        RoundReport::Rejected { error, .. } => {
            error!("Раунд {} відхилено: {}", index, error)
        }
        RoundReport::Dropped { .. } => warn!("Раунд {} відкинуто координатором", index),
        RoundReport::Stalled(error) => error!("Раунд {} зупинився: {}", index, error),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Ініціалізація структурованого логування (tracing)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 2. Завантаження зовнішньої конфігурації
    let config = Config::load()?;
    info!(
        agents = config.swarm.agents.len(),
        rounds = config.rounds.len(),
        "Конфігурація завантажена"
    );

    // 3. Статичний граф зв'язку та симульовані пози
    let graph = Arc::new(CommunicationGraph::build(
        &config.graph.vertices,
        config.graph.connectivity_threshold,
    ));
    info!(
        threshold = graph.threshold(),
        vertices = graph.vertex_count(),
        edges = graph.edge_count(),
        "Граф зв'язку готовий"
    );
    let registry = PoseRegistry::new();
    for agent in &config.swarm.agents {
        registry.report(agent.id, Pose::new(Position::new(agent.x, agent.y), agent.heading));
    }

    // 4. Канали: broadcast для сигналу початку, mpsc для подій координатора та підсумків
    let (start_tx, _) = broadcast::channel(config.swarm.broadcast_capacity);
    let (event_tx, event_rx) = mpsc::channel(config.swarm.event_capacity);
    let (report_tx, mut report_rx) = mpsc::channel(config.swarm.event_capacity);

    let controller = CoordinationController::new(
        graph,
        registry.clone(),
        start_tx.clone(),
        Duration::from_secs(config.swarm.completion_timeout_secs),
    )
    .with_reports(report_tx);
    let controller_task = tokio::spawn(controller.run(event_rx));

    // 5. Запуск агентів; кожен чекає підтвердження реєстрації
    let limits = MotionLimits {
        linear_speed: config.swarm.linear_speed,
        angular_speed: config.swarm.angular_speed,
    };
    let tick = config.swarm.tick_period()?;
    let mut agent_tasks = Vec::with_capacity(config.swarm.agents.len());
    for agent_config in &config.swarm.agents {
        let id = agent_config.id;
        let agent = Agent::new(id, limits, tick);
        let rx = start_tx.subscribe();
        let tx = event_tx.clone();
        let poses: Arc<dyn PoseProvider> = Arc::new(registry.clone());
        let actuator = Box::new(SimulatedActuator::new(id, registry.clone()));
        let (ready_tx, ready_rx) = oneshot::channel();

        agent_tasks.push(tokio::spawn(async move {
            if let Err(e) = agent.run(rx, tx, poses, actuator, Some(ready_tx)).await {
                error!("Роботу агента {} перервано: {}", id, e);
            }
        }));
        if !ready_rx.await.unwrap_or(false) {
            warn!(agent_id = id, "Агент не зареєструвався");
        }
    }

    // 6. Раунди координації строго по одному
    for (index, round) in config.rounds.iter().enumerate() {
        info!("Координатор: розсилка терміналів раунду {}", index + 1);
        event_tx
            .send(ControllerEvent::Terminals(round.terminals.clone()))
            .await
            .context("Координатор недоступний")?;
        match report_rx.recv().await {
            Some(report) => log_report(index + 1, &report),
            None => bail!("Координатор зупинився до завершення раунду"),
        }
    }

    // 7. Завершення роботи
    event_tx
        .send(ControllerEvent::Shutdown)
        .await
        .context("Координатор недоступний")?;
    controller_task.await.context("Таск координатора аварійно завершився")?;
    drop(start_tx);
    for task in agent_tasks {
        task.await.context("Таск агента аварійно завершився")?;
    }

    for agent in &config.swarm.agents {
        if let Some(pose) = registry.pose_of(agent.id) {
            info!(agent_id = agent.id, "Фінальна позиція {}", pose.position);
        }
    }
    info!("Місія завершена. Виконано {} раундів.", config.rounds.len());
    Ok(())
}
