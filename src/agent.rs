use crate::controller::PoseProvider;
use crate::core::{
    AgentError, AgentId, Broadcast, ControllerEvent, Goal, RegistrationRequest, RoundId,
};
use crate::motion::{self, Actuator, MotionExecutor, MotionLimits};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const GOAL_CAPACITY: usize = 4;

/// Стани агента-ретранслятора в протоколі координації.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    /// Отримано сигнал початку, чекаємо своє завдання.
    Listening(RoundId),
    Executing(RoundId),
}

/// Агент-ретранслятор.
pub struct Agent {
    id: AgentId,
    state: State,
    executor: MotionExecutor,
    tick: Duration,
    held_goal: Option<Goal>,
}

impl Agent {
    /// Створює нового агента в базовому стані.
    pub fn new(id: AgentId, limits: MotionLimits, tick: Duration) -> Self {
        Self {
            id,
            state: State::Idle,
            executor: MotionExecutor::new(limits),
            tick,
            held_goal: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> State {
        self.state
    }

    /// Обробляє широкомовне повідомлення; повертає завдання, якщо його вже можна виконувати.
    pub fn process_broadcast(&mut self, msg: &Broadcast) -> Option<Goal> {
        match *msg {
            Broadcast::CoordinationStarted { round } => {
                if matches!(self.state, State::Executing(_)) {
                    warn!(agent_id = self.id, round, "Сигнал початку під час руху, ігнорую");
                    return None;
                }
                self.state = State::Listening(round);
                debug!(agent_id = self.id, round, "Перехід у стан Listening");
                match self.held_goal.take() {
                    Some(goal) if goal.round == round => self.accept(goal),
                    Some(goal) => {
                        warn!(agent_id = self.id, round = goal.round, "Відкидаю застаріле завдання");
                        None
                    }
                    None => None,
                }
            }
        }
    }

    /// Обробляє персональне завдання. До сигналу початку воно лише зберігається.
    pub fn process_goal(&mut self, goal: Goal) -> Option<Goal> {
        match self.state {
            State::Listening(round) if round == goal.round => self.accept(goal),
            State::Executing(_) => {
                warn!(agent_id = self.id, round = goal.round, "Завдання під час руху, ігнорую");
                None
            }
            _ => {
                debug!(agent_id = self.id, round = goal.round, "Завдання раніше сигналу початку, зберігаю");
                self.held_goal = Some(goal);
                None
            }
        }
    }

    fn accept(&mut self, goal: Goal) -> Option<Goal> {
        self.state = State::Executing(goal.round);
        info!(
            agent_id = self.id,
            round = goal.round,
            "Перехід у стан Executing до {}",
            goal.target
        );
        Some(goal)
    }

    /// Асинхронний життєвий цикл агента.
    ///
    /// `broadcasts` має бути підписаний до реєстрації, щоб не пропустити сигнал початку.
    pub async fn run(
        mut self,
        mut broadcasts: broadcast::Receiver<Broadcast>,
        events: mpsc::Sender<ControllerEvent>,
        poses: Arc<dyn PoseProvider>,
        mut actuator: Box<dyn Actuator>,
        ready: Option<oneshot::Sender<bool>>,
    ) -> Result<(), AgentError> {
        let (goal_tx, mut goal_rx) = mpsc::channel(GOAL_CAPACITY);
        let accepted = self.register(&events, goal_tx).await?;
        if let Some(ready) = ready {
            let _ = ready.send(accepted);
        }
        if !accepted {
            return Err(AgentError::RegistrationRejected(self.id));
        }
        info!(agent_id = self.id, "Агента ініціалізовано та готовий до роботи");

        loop {
            let goal = tokio::select! {
                biased;
                msg = broadcasts.recv() => match msg {
                    Ok(msg) => self.process_broadcast(&msg),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(agent_id = self.id, skipped, "Пропущено широкомовні повідомлення");
                        None
                    }
                    Err(RecvError::Closed) => break,
                },
                goal = goal_rx.recv() => match goal {
                    Some(goal) => self.process_goal(goal),
                    None => break,
                },
            };

            let Some(goal) = goal else {
                continue;
            };
            self.execute(goal, poses.as_ref(), actuator.as_mut()).await?;
            self.state = State::Idle;

            // Відправляємо звіт координатору рівно один раз на завдання
            let report = ControllerEvent::Completed {
                agent: self.id,
                round: goal.round,
            };
            if events.send(report).await.is_err() {
                return Err(AgentError::ChannelError(
                    "Втрачено зв'язок з координатором".into(),
                ));
            }
        }

        info!(agent_id = self.id, "Агент завершує роботу");
        Ok(())
    }

    async fn register(
        &self,
        events: &mpsc::Sender<ControllerEvent>,
        goals: mpsc::Sender<Goal>,
    ) -> Result<bool, AgentError> {
        let (reply, reply_rx) = oneshot::channel();
        let request = RegistrationRequest {
            agent: self.id,
            join: true,
            goals,
            reply,
        };
        events
            .send(ControllerEvent::Register(request))
            .await
            .map_err(|_| AgentError::ChannelError("Координатор недоступний".into()))?;
        reply_rx
            .await
            .map_err(|_| AgentError::ChannelError("Координатор не відповів на реєстрацію".into()))
    }

    /// Поворот, потім рух; по одному сегменту швидкості на такт.
    async fn execute(
        &mut self,
        goal: Goal,
        poses: &dyn PoseProvider,
        actuator: &mut dyn Actuator,
    ) -> Result<(), AgentError> {
        let pose = poses
            .pose_of(self.id)
            .ok_or(AgentError::PoseUnavailable(self.id))?;
        let command = motion::plan(&pose, &goal.target);
        self.executor.start(command);

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !self.executor.is_stopped() {
            ticker.tick().await;
            if let Some(segment) = self.executor.tick(self.tick) {
                actuator.apply(&segment);
            }
        }
        debug!(agent_id = self.id, round = goal.round, "Рух завершено");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Pose, Position};
    use crate::motion::{Velocity, VelocitySegment};
    use crate::sim::{PoseRegistry, SimulatedActuator};
    use std::sync::Mutex;

    fn limits() -> MotionLimits {
        MotionLimits {
            linear_speed: 10.0,
            angular_speed: 10.0,
        }
    }

    fn goal(round: RoundId) -> Goal {
        Goal {
            round,
            target: Position::new(1.0, 1.0),
        }
    }

    #[test]
    fn test_initial_state() {
        let agent = Agent::new(1, limits(), Duration::from_millis(100));
        assert_eq!(agent.state(), State::Idle);
    }

    #[test]
    fn test_state_transitions() {
        let mut agent = Agent::new(2, limits(), Duration::from_millis(100));

        let start = Broadcast::CoordinationStarted { round: 3 };
        assert_eq!(agent.process_broadcast(&start), None);
        assert_eq!(agent.state(), State::Listening(3));

        assert_eq!(agent.process_goal(goal(3)), Some(goal(3)));
        assert_eq!(agent.state(), State::Executing(3));

        assert_eq!(agent.process_goal(goal(4)), None);
        assert_eq!(agent.state(), State::Executing(3));
    }

    #[test]
    fn test_goal_before_start_is_held() {
        let mut agent = Agent::new(3, limits(), Duration::from_millis(100));
        assert_eq!(agent.process_goal(goal(1)), None);
        assert_eq!(agent.state(), State::Idle);

        let start = Broadcast::CoordinationStarted { round: 1 };
        assert_eq!(agent.process_broadcast(&start), Some(goal(1)));
        assert_eq!(agent.state(), State::Executing(1));
    }

    #[test]
    fn test_stale_held_goal_is_dropped() {
        let mut agent = Agent::new(4, limits(), Duration::from_millis(100));
        agent.process_goal(goal(1));
        let start = Broadcast::CoordinationStarted { round: 2 };
        assert_eq!(agent.process_broadcast(&start), None);
        assert_eq!(agent.state(), State::Listening(2));
    }

    struct Recorder(Arc<Mutex<Vec<VelocitySegment>>>);

    impl Actuator for Recorder {
        fn apply(&mut self, segment: &VelocitySegment) {
            self.0.lock().unwrap().push(*segment);
        }
    }

    #[tokio::test]
    async fn test_execute_rotates_before_moving() {
        let registry = PoseRegistry::new();
        registry.report(5, Pose::new(Position::new(0.0, 0.0), 0.0));
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut actuator = Recorder(log.clone());
        let mut agent = Agent::new(5, limits(), Duration::from_millis(5));

        agent
            .execute(goal(1), &registry, &mut actuator)
            .await
            .unwrap();

        let log = log.lock().unwrap();
        let first_linear = log
            .iter()
            .position(|s| matches!(s.velocity, Velocity::Linear(_)))
            .unwrap();
        assert!(log[..first_linear]
            .iter()
            .all(|s| matches!(s.velocity, Velocity::Angular(rate) if rate > 0.0)));
        assert_eq!(log.last().unwrap().velocity, Velocity::Stop);
        assert_eq!(
            log.iter().filter(|s| s.velocity == Velocity::Stop).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_pose_fails() {
        let registry = PoseRegistry::new();
        let mut actuator = SimulatedActuator::new(6, registry.clone());
        let mut agent = Agent::new(6, limits(), Duration::from_millis(5));
        let err = agent
            .execute(goal(1), &registry, &mut actuator)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::PoseUnavailable(6)));
    }

    #[tokio::test]
    async fn test_registration_round_trip() {
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let (start_tx, _) = broadcast::channel(4);
        let registry = PoseRegistry::new();
        let agent = Agent::new(7, limits(), Duration::from_millis(5));
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(agent.run(
            start_tx.subscribe(),
            event_tx,
            Arc::new(registry.clone()),
            Box::new(SimulatedActuator::new(7, registry)),
            Some(ready_tx),
        ));

        let Some(ControllerEvent::Register(request)) = event_rx.recv().await else {
            panic!("очікувався запит реєстрації");
        };
        assert_eq!(request.agent, 7);
        assert!(request.join);
        request.reply.send(true).unwrap();
        assert!(ready_rx.await.unwrap());

        // закриття каналів завершує агента
        drop(request.goals);
        drop(start_tx);
        assert!(task.await.unwrap().is_ok());
    }
}
