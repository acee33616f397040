use crate::controller::PoseProvider;
use crate::core::{AgentId, Pose, Position};
use crate::motion::{Actuator, Velocity, VelocitySegment};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

/// Спільна таблиця поз агентів, яку оновлюють симульовані приводи.
#[derive(Debug, Clone, Default)]
pub struct PoseRegistry {
    poses: Arc<RwLock<HashMap<AgentId, Pose>>>,
}

impl PoseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, agent: AgentId, pose: Pose) {
        self.poses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent, pose);
    }
}

impl PoseProvider for PoseRegistry {
    fn pose_of(&self, agent: AgentId) -> Option<Pose> {
        self.poses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&agent)
            .copied()
    }
}

/// Кінематичний привід: інтегрує сегменти швидкості у позу агента.
pub struct SimulatedActuator {
    agent: AgentId,
    registry: PoseRegistry,
}

impl SimulatedActuator {
    pub fn new(agent: AgentId, registry: PoseRegistry) -> Self {
        Self { agent, registry }
    }
}

impl Actuator for SimulatedActuator {
    fn apply(&mut self, segment: &VelocitySegment) {
        let Some(pose) = self.registry.pose_of(self.agent) else {
            return;
        };
        let dt = segment.duration.as_secs_f64();
        let next = match segment.velocity {
            Velocity::Angular(rate) => Pose::new(pose.position, pose.heading + rate * dt),
            Velocity::Linear(speed) => {
                let step = speed * dt;
                Pose {
                    position: Position::new(
                        pose.position.x + step * pose.heading.cos(),
                        pose.position.y + step * pose.heading.sin(),
                    ),
                    heading: pose.heading,
                }
            }
            Velocity::Stop => pose,
        };
        trace!(
            agent_id = self.agent,
            x = next.position.x,
            y = next.position.y,
            heading = next.heading,
            "Поза оновлена"
        );
        self.registry.report(self.agent, next);
    }
}
