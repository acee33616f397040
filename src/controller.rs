use crate::assign::{assign, Assignment, AssignmentPair, FleetSnapshot};
use crate::core::{
    AgentId, Broadcast, ControllerEvent, CoordinationError, Goal, Pose, Position,
    RegistrationRequest, RoundId,
};
use crate::graph::CommunicationGraph;
use crate::steiner::WaypointSolver;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Джерело поточних поз агентів (зовнішня система координат).
pub trait PoseProvider: Send + Sync {
    fn pose_of(&self, agent: AgentId) -> Option<Pose>;
}

/// Стан автомата координації.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Planning,
    Dispatching,
}

/// Підсумок раунду, який отримує джерело терміналів.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundReport {
    /// Усі агенти, що отримали завдання, дісталися своїх точок.
    ///
    /// `assignment` містить лише доставлені завдання, `undelivered` ті,
    /// що не вдалося надіслати.
    Completed {
        round: RoundId,
        waypoints: Vec<Position>,
        assignment: Assignment,
        undelivered: Vec<AssignmentPair>,
    },
    /// Призначати нікого: немає точок або немає агентів з відомою позою.
    NothingToDispatch {
        round: RoundId,
        waypoints: Vec<Position>,
    },
    EmptyTerminals,
    Rejected {
        terminals: Vec<Position>,
        error: CoordinationError,
    },
    /// Раунд уже виконується, новий набір відкинуто.
    Dropped { terminals: Vec<Position> },
    Stalled(CoordinationError),
}

#[derive(Debug, Default)]
struct RoundState {
    phase: Phase,
    round: RoundId,
    terminals: Vec<Position>,
    waypoints: Vec<Position>,
    assignment: Assignment,
    undelivered: Vec<AssignmentPair>,
    pending: BTreeSet<AgentId>,
    deadline: Option<Instant>,
}

#[derive(Debug)]
struct AgentEndpoint {
    id: AgentId,
    goals: mpsc::Sender<Goal>,
}

/// Координатор: тримає граф, реєстр агентів і стан поточного раунду.
///
/// Усі зміни стану відбуваються в одному таску, що читає вхідний канал подій.
pub struct CoordinationController<P> {
    graph: Arc<CommunicationGraph>,
    poses: P,
    endpoints: Vec<AgentEndpoint>,
    start_tx: broadcast::Sender<Broadcast>,
    reports: Option<mpsc::Sender<RoundReport>>,
    completion_timeout: Duration,
    state: RoundState,
    rounds_started: RoundId,
}

impl<P: PoseProvider> CoordinationController<P> {
    pub fn new(
        graph: Arc<CommunicationGraph>,
        poses: P,
        start_tx: broadcast::Sender<Broadcast>,
        completion_timeout: Duration,
    ) -> Self {
        Self {
            graph,
            poses,
            endpoints: Vec::new(),
            start_tx,
            reports: None,
            completion_timeout,
            state: RoundState::default(),
            rounds_started: 0,
        }
    }

    /// Канал, куди публікуються підсумки раундів.
    pub fn with_reports(mut self, reports: mpsc::Sender<RoundReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.state.pending.len()
    }

    #[cfg(test)]
    pub fn terminals(&self) -> &[Position] {
        &self.state.terminals
    }

    #[cfg(test)]
    pub fn waypoints(&self) -> &[Position] {
        &self.state.waypoints
    }

    #[cfg(test)]
    pub fn assignment(&self) -> &Assignment {
        &self.state.assignment
    }

    #[cfg(test)]
    pub fn registered(&self) -> usize {
        self.endpoints.len()
    }

    /// Приймає будь-який запит. Повторна реєстрація замінює канал, але не порядок.
    pub fn register(&mut self, request: RegistrationRequest) -> bool {
        let RegistrationRequest {
            agent,
            join,
            goals,
            reply,
        } = request;

        if join {
            match self.endpoints.iter_mut().find(|e| e.id == agent) {
                Some(endpoint) => {
                    endpoint.goals = goals;
                    debug!(agent_id = agent, "Повторна реєстрація агента");
                }
                None => {
                    self.endpoints.push(AgentEndpoint { id: agent, goals });
                    info!(agent_id = agent, total = self.endpoints.len(), "Агента зареєстровано");
                }
            }
        }

        if reply.send(true).is_err() {
            warn!(agent_id = agent, "Агент не дочекався відповіді на реєстрацію");
        }
        true
    }

    /// Idle -> Planning -> (Dispatching | Idle). Повертає підсумок, якщо раунд завершився одразу.
    pub fn begin_round(&mut self, terminals: Vec<Position>) -> Option<RoundReport> {
        if self.state.phase != Phase::Idle {
            warn!(
                round = self.state.round,
                "Раунд ще виконується, новий набір терміналів відкинуто"
            );
            return Some(RoundReport::Dropped { terminals });
        }
        if terminals.is_empty() {
            debug!("Порожній набір терміналів, залишаємось в Idle");
            return Some(RoundReport::EmptyTerminals);
        }

        self.enter_planning(terminals);
        let solved = WaypointSolver::new(&self.graph).solve(&self.state.terminals);
        match solved {
            Ok(waypoints) => self.finish_planning(waypoints),
            Err(error) => {
                error!(round = self.state.round, %error, "Планування раунду не вдалося");
                let terminals = std::mem::take(&mut self.state.terminals);
                self.reset();
                Some(RoundReport::Rejected { terminals, error })
            }
        }
    }

    fn enter_planning(&mut self, terminals: Vec<Position>) {
        self.rounds_started += 1;
        self.state.round = self.rounds_started;
        self.state.phase = Phase::Planning;
        info!(
            round = self.state.round,
            terminals = terminals.len(),
            "Idle -> Planning"
        );
        self.state.terminals = terminals;
    }

    fn finish_planning(&mut self, waypoints: Vec<Position>) -> Option<RoundReport> {
        let round = self.state.round;
        let snapshot = self.snapshot();
        if snapshot.is_empty() && !self.endpoints.is_empty() {
            warn!(round, "Жоден зареєстрований агент не має відомої пози");
        }
        let mut assignment = assign(&snapshot, &waypoints);
        self.state.waypoints = waypoints;

        if assignment.is_empty() {
            info!(round, "Planning -> Idle: немає кого призначати");
            let report = RoundReport::NothingToDispatch {
                round,
                waypoints: std::mem::take(&mut self.state.waypoints),
            };
            self.reset();
            return Some(report);
        }

        self.state.phase = Phase::Dispatching;
        self.state.deadline = Some(Instant::now() + self.completion_timeout);
        if self
            .start_tx
            .send(Broadcast::CoordinationStarted { round })
            .is_err()
        {
            warn!(round, "Немає слухачів сигналу початку координації");
        }

        for pair in assignment.pairs() {
            let goal = Goal {
                round,
                target: pair.target,
            };
            let Some(endpoint) = self.endpoints.iter().find(|e| e.id == pair.agent) else {
                continue;
            };
            match endpoint.goals.try_send(goal) {
                Ok(()) => {
                    self.state.pending.insert(pair.agent);
                    debug!(
                        round,
                        agent_id = pair.agent,
                        x = pair.target.x,
                        y = pair.target.y,
                        "Завдання надіслано"
                    );
                }
                Err(e) => error!(round, agent_id = pair.agent, "Не вдалося надіслати завдання: {}", e),
            }
        }

        // у призначенні лишаються тільки агенти, на яких чекаємо
        let pending = &self.state.pending;
        let undelivered = assignment.split_off_where(|pair| pending.contains(&pair.agent));
        if !undelivered.is_empty() {
            warn!(
                round,
                undelivered = undelivered.len(),
                "Частину точок не покрито: завдання не доставлено"
            );
        }

        if self.state.pending.is_empty() {
            let pending = undelivered.iter().map(|p| p.agent).collect();
            self.reset();
            return Some(RoundReport::Stalled(CoordinationError::StalledCompletion {
                round,
                pending,
            }));
        }
        self.state.assignment = assignment;
        self.state.undelivered = undelivered;

        info!(
            round,
            dispatched = self.state.pending.len(),
            total_distance = self.state.assignment.total_distance(),
            "Planning -> Dispatching"
        );
        None
    }

    /// Лічильник лише зменшується; повтори та чужі раунди ігноруються.
    pub fn record_completion(&mut self, agent: AgentId, round: RoundId) -> Option<RoundReport> {
        if self.state.phase != Phase::Dispatching || round != self.state.round {
            warn!(agent_id = agent, round, "Звіт про завершення поза активним раундом");
            return None;
        }
        if !self.state.pending.remove(&agent) {
            warn!(agent_id = agent, round, "Неочікуваний або повторний звіт про завершення");
            return None;
        }

        info!(
            agent_id = agent,
            round,
            remaining = self.state.pending.len(),
            "Агент завершив рух"
        );
        if !self.state.pending.is_empty() {
            return None;
        }

        info!(round, "Dispatching -> Idle: раунд завершено");
        let report = RoundReport::Completed {
            round,
            waypoints: std::mem::take(&mut self.state.waypoints),
            assignment: std::mem::take(&mut self.state.assignment),
            undelivered: std::mem::take(&mut self.state.undelivered),
        };
        self.reset();
        Some(report)
    }

    /// Скасовує раунд, що перевищив час очікування завершень.
    pub fn abandon_round(&mut self) -> Option<RoundReport> {
        if self.state.phase != Phase::Dispatching {
            return None;
        }
        let error = CoordinationError::StalledCompletion {
            round: self.state.round,
            pending: self.state.pending.iter().copied().collect(),
        };
        error!(%error, "Dispatching -> Idle: раунд скасовано за таймаутом");
        self.reset();
        Some(RoundReport::Stalled(error))
    }

    pub fn handle(&mut self, event: ControllerEvent) -> Option<RoundReport> {
        match event {
            ControllerEvent::Register(request) => {
                self.register(request);
                None
            }
            ControllerEvent::Terminals(terminals) => self.begin_round(terminals),
            ControllerEvent::Completed { agent, round } => self.record_completion(agent, round),
            ControllerEvent::Shutdown => None,
        }
    }

    /// Цикл обробки подій, доки канал не закриють або не прийде `Shutdown`.
    pub async fn run(mut self, mut events: mpsc::Receiver<ControllerEvent>) {
        info!("Координатор запущено");
        loop {
            let event = match self.state.deadline {
                Some(deadline) if self.state.phase == Phase::Dispatching => {
                    match timeout_at(deadline, events.recv()).await {
                        Ok(event) => event,
                        Err(_) => {
                            let report = self.abandon_round();
                            self.publish(report).await;
                            continue;
                        }
                    }
                }
                _ => events.recv().await,
            };

            let event = match event {
                Some(ControllerEvent::Shutdown) | None => break,
                Some(event) => event,
            };
            let report = self.handle(event);
            self.publish(report).await;
        }
        info!("Координатор зупинено");
    }

    async fn publish(&self, report: Option<RoundReport>) {
        let (Some(report), Some(reports)) = (report, self.reports.as_ref()) else {
            return;
        };
        if reports.send(report).await.is_err() {
            warn!("Отримувач підсумків раундів відключився");
        }
    }

    /// Знімок поз зареєстрованих агентів у порядку реєстрації.
    fn snapshot(&self) -> FleetSnapshot {
        self.endpoints
            .iter()
            .filter_map(|endpoint| match self.poses.pose_of(endpoint.id) {
                Some(pose) => Some((endpoint.id, pose.position)),
                None => {
                    warn!(agent_id = endpoint.id, "Поза агента невідома, пропускаємо в цьому раунді");
                    None
                }
            })
            .collect()
    }

    fn reset(&mut self) {
        self.state = RoundState::default();
        self.state.round = self.rounds_started;
    }
}
