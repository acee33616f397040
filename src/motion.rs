use crate::core::{Pose, Position};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::time::Duration;
use tracing::debug;

/// Команда руху: спершу поворот, потім прямолінійний проїзд.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MotionCommand {
    /// Мінімальний поворот до цілі, (-π, π].
    pub turn_angle: f64,
    pub travel_distance: f64,
}

/// Обчислює поворот і відстань від поточної пози до цілі.
pub fn plan(pose: &Pose, target: &Position) -> MotionCommand {
    let dx = target.x - pose.position.x;
    let dy = target.y - pose.position.y;
    let travel_distance = dx.hypot(dy);
    if travel_distance == 0.0 {
        return MotionCommand {
            turn_angle: 0.0,
            travel_distance,
        };
    }

    let mut turn_angle = dy.atan2(dx) - pose.heading;
    if turn_angle > PI {
        turn_angle -= 2.0 * PI;
    } else if turn_angle <= -PI {
        turn_angle += 2.0 * PI;
    }

    MotionCommand {
        turn_angle,
        travel_distance,
    }
}

/// Швидкість, яку виконавчий механізм тримає протягом сегмента.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Velocity {
    /// Рад/с, знак задає напрям повороту.
    Angular(f64),
    /// М/с уперед.
    Linear(f64),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocitySegment {
    pub velocity: Velocity,
    pub duration: Duration,
}

/// Зовнішній виконавчий механізм агента (колеса, симулятор).
pub trait Actuator: Send {
    fn apply(&mut self, segment: &VelocitySegment);
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MotionLimits {
    pub linear_speed: f64,
    pub angular_speed: f64,
}

/// Стани локального автомата руху.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionPhase {
    Idle,
    Rotating,
    Moving,
    Stopped,
}

/// Розімкнений автомат "поворот, потім рух" з тривалістю кожної фази за часом.
#[derive(Debug)]
pub struct MotionExecutor {
    limits: MotionLimits,
    phase: MotionPhase,
    command: Option<MotionCommand>,
    remaining: Duration,
}

impl MotionExecutor {
    pub fn new(limits: MotionLimits) -> Self {
        Self {
            limits,
            phase: MotionPhase::Idle,
            command: None,
            remaining: Duration::ZERO,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> MotionPhase {
        self.phase
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == MotionPhase::Stopped
    }

    pub fn start(&mut self, command: MotionCommand) {
        self.command = Some(command);
        self.phase = MotionPhase::Rotating;
        self.remaining = phase_time(command.turn_angle.abs(), self.limits.angular_speed);
        debug!(
            turn_angle = command.turn_angle,
            travel_distance = command.travel_distance,
            "Початок виконання команди руху"
        );
    }

    /// Видає сегмент швидкості на один такт, обрізаний до залишку фази.
    pub fn tick(&mut self, tick: Duration) -> Option<VelocitySegment> {
        let command = self.command?;
        loop {
            match self.phase {
                MotionPhase::Idle | MotionPhase::Stopped => return None,
                MotionPhase::Rotating => {
                    if self.remaining.is_zero() {
                        self.phase = MotionPhase::Moving;
                        self.remaining =
                            phase_time(command.travel_distance, self.limits.linear_speed);
                        continue;
                    }
                    let velocity =
                        Velocity::Angular(self.limits.angular_speed.copysign(command.turn_angle));
                    return Some(self.consume(velocity, tick));
                }
                MotionPhase::Moving => {
                    if self.remaining.is_zero() {
                        self.phase = MotionPhase::Stopped;
                        return Some(VelocitySegment {
                            velocity: Velocity::Stop,
                            duration: Duration::ZERO,
                        });
                    }
                    return Some(self.consume(Velocity::Linear(self.limits.linear_speed), tick));
                }
            }
        }
    }

    fn consume(&mut self, velocity: Velocity, tick: Duration) -> VelocitySegment {
        let duration = self.remaining.min(tick);
        self.remaining -= duration;
        VelocitySegment { velocity, duration }
    }
}

fn phase_time(amount: f64, speed: f64) -> Duration {
    Duration::try_from_secs_f64(amount / speed).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    fn pose(x: f64, y: f64, heading: f64) -> Pose {
        Pose::new(Position::new(x, y), heading)
    }

    #[test]
    fn test_target_behind_turns_positive_pi() {
        let command = plan(&pose(0.0, 0.0, 0.0), &Position::new(-1.0, 0.0));
        assert_eq!(command.turn_angle, PI);
        assert_eq!(command.travel_distance, 1.0);
    }

    #[test]
    fn test_turn_wraps_to_short_side() {
        // курс майже -π, ціль трохи вище осі назад: повертати треба мало
        let command = plan(&pose(0.0, 0.0, -3.0), &Position::new(-1.0, -0.2));
        assert!(command.turn_angle.abs() < 0.5);

        let command = plan(&pose(0.0, 0.0, 3.0), &Position::new(-1.0, -0.2));
        assert!(command.turn_angle > 0.0 && command.turn_angle < 0.5);
    }

    #[test]
    fn test_target_ahead() {
        let command = plan(&pose(1.0, 1.0, PI / 2.0), &Position::new(1.0, 4.0));
        assert!(command.turn_angle.abs() < EPS);
        assert!((command.travel_distance - 3.0).abs() < EPS);
    }

    #[test]
    fn test_already_there() {
        let command = plan(&pose(2.0, 2.0, 1.0), &Position::new(2.0, 2.0));
        assert_eq!(command.turn_angle, 0.0);
        assert_eq!(command.travel_distance, 0.0);
    }

    #[test]
    fn test_executor_rotates_then_moves_then_stops() {
        let mut executor = MotionExecutor::new(MotionLimits {
            linear_speed: 1.0,
            angular_speed: 1.0,
        });
        assert_eq!(executor.tick(Duration::from_millis(100)), None);

        executor.start(MotionCommand {
            turn_angle: -0.15,
            travel_distance: 0.25,
        });
        let tick = Duration::from_millis(100);

        let first = executor.tick(tick).unwrap();
        assert_eq!(first.velocity, Velocity::Angular(-1.0));
        assert_eq!(first.duration, tick);
        let second = executor.tick(tick).unwrap();
        assert_eq!(second.velocity, Velocity::Angular(-1.0));
        assert!(second.duration < tick);
        assert_eq!(executor.phase(), MotionPhase::Rotating);

        let mut travelled = Duration::ZERO;
        loop {
            let segment = executor.tick(tick).unwrap();
            match segment.velocity {
                Velocity::Linear(speed) => {
                    assert_eq!(speed, 1.0);
                    travelled += segment.duration;
                }
                Velocity::Stop => break,
                Velocity::Angular(_) => panic!("поворот після початку руху"),
            }
        }
        assert_eq!(travelled, Duration::from_millis(250));
        assert!(executor.is_stopped());
        assert_eq!(executor.tick(tick), None);
    }

    #[test]
    fn test_executor_skips_empty_rotation() {
        let mut executor = MotionExecutor::new(MotionLimits {
            linear_speed: 2.0,
            angular_speed: 1.0,
        });
        executor.start(MotionCommand {
            turn_angle: 0.0,
            travel_distance: 1.0,
        });
        let segment = executor.tick(Duration::from_secs(1)).unwrap();
        assert_eq!(segment.velocity, Velocity::Linear(2.0));
        assert_eq!(segment.duration, Duration::from_millis(500));
    }

    proptest! {
        #[test]
        fn prop_turn_angle_in_half_open_range(
            x in -100.0f64..100.0,
            y in -100.0f64..100.0,
            heading in -PI..PI,
            tx in -100.0f64..100.0,
            ty in -100.0f64..100.0,
        ) {
            let command = plan(&pose(x, y, heading), &Position::new(tx, ty));
            prop_assert!(command.turn_angle > -PI && command.turn_angle <= PI);
            prop_assert!(command.travel_distance >= 0.0);
        }
    }
}
