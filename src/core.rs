// СЛОВНИК
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Унікальний ідентифікатор агента в рої.
pub type AgentId = u32;

/// Номер раунду координації.
pub type RoundId = u64;

/// Двовимірна позиція у просторі.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Евклідова відстань до іншої точки.
    pub fn distance_to(&self, other: &Position) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Позиція агента разом із курсом (радіани, (-π, π]).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    pub position: Position,
    pub heading: f64,
}

impl Pose {
    pub fn new(position: Position, heading: f64) -> Self {
        Self {
            position,
            heading: normalize_angle(heading),
        }
    }
}

/// Зводить довільний кут у проміжок (-π, π].
pub fn normalize_angle(angle: f64) -> f64 {
    let mut wrapped = angle % (2.0 * PI);
    if wrapped > PI {
        wrapped -= 2.0 * PI;
    } else if wrapped <= -PI {
        wrapped += 2.0 * PI;
    }
    wrapped
}

/// Індивідуальне завдання: зайняти точку-ретранслятор у заданому раунді.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Goal {
    pub round: RoundId,
    pub target: Position,
}

/// Повідомлення, яке координатор розсилає всім агентам одночасно.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Broadcast {
    /// Дозвіл почати слухати персональні завдання цього раунду.
    CoordinationStarted { round: RoundId },
}

/// Запит агента на приєднання до рою.
#[derive(Debug)]
pub struct RegistrationRequest {
    pub agent: AgentId,
    pub join: bool,
    /// Канал, яким координатор надсилатиме агенту завдання.
    pub goals: mpsc::Sender<Goal>,
    pub reply: oneshot::Sender<bool>,
}

/// Вхідні події координатора.
#[derive(Debug)]
pub enum ControllerEvent {
    Register(RegistrationRequest),
    /// Новий набір терміналів від зовнішнього джерела.
    Terminals(Vec<Position>),
    /// Агент дістався своєї точки.
    Completed { agent: AgentId, round: RoundId },
    Shutdown,
}

/// Помилки ядра координації.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinationError {
    #[error("Термінал {0} не є вершиною графа зв'язку")]
    InvalidTerminal(Position),
    #[error("Між терміналами {from} та {to} немає шляху в графі зв'язку")]
    Disconnected { from: Position, to: Position },
    #[error("Раунд {round} зупинився: агенти {pending:?} не звітували про завершення")]
    StalledCompletion { round: RoundId, pending: Vec<AgentId> },
}

/// Помилки життєвого циклу агента.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Координатор відхилив реєстрацію агента {0}")]
    RegistrationRejected(AgentId),
    #[error("Поза агента {0} невідома, рух неможливий")]
    PoseUnavailable(AgentId),
    #[error("Критична помилка каналу зв'язку: {0}")]
    ChannelError(String),
}
