use crate::core::{AgentId, Position};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Знімок позицій агентів на момент призначення, у порядку реєстрації.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetSnapshot {
    agents: Vec<(AgentId, Position)>,
}

impl FleetSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Повторний запис для того самого агента оновлює позицію, але не порядок.
    pub fn insert(&mut self, agent: AgentId, position: Position) {
        match self.agents.iter_mut().find(|(id, _)| *id == agent) {
            Some(entry) => entry.1 = position,
            None => self.agents.push((agent, position)),
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(AgentId, Position)> {
        self.agents.iter()
    }
}

impl FromIterator<(AgentId, Position)> for FleetSnapshot {
    fn from_iter<I: IntoIterator<Item = (AgentId, Position)>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for (agent, position) in iter {
            snapshot.insert(agent, position);
        }
        snapshot
    }
}

/// Пара агент-точка в межах одного раунду.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AssignmentPair {
    pub agent: AgentId,
    pub target: Position,
    pub distance: f64,
}

/// Взаємно однозначне призначення точок агентам, у порядку вибору пар.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pairs: Vec<AssignmentPair>,
}

impl Assignment {
    pub fn pairs(&self) -> &[AssignmentPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Лишає пари, для яких `keep` істинне, і повертає решту.
    pub fn split_off_where<F>(&mut self, mut keep: F) -> Vec<AssignmentPair>
    where
        F: FnMut(&AssignmentPair) -> bool,
    {
        let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pairs)
            .into_iter()
            .partition(|pair| keep(pair));
        self.pairs = kept;
        removed
    }

    #[cfg(test)]
    pub fn target_of(&self, agent: AgentId) -> Option<Position> {
        self.pairs
            .iter()
            .find(|pair| pair.agent == agent)
            .map(|pair| pair.target)
    }

    pub fn total_distance(&self) -> f64 {
        self.pairs.iter().map(|pair| pair.distance).sum()
    }
}

/// Жадібне призначення: щоразу береться найближча пара серед усіх вільних.
///
/// Це евристика, а не оптимальне паросполучення. Рівні відстані
/// розв'язуються порядком агента у знімку, потім індексом точки.
pub fn assign(fleet: &FleetSnapshot, waypoints: &[Position]) -> Assignment {
    let mut agent_free = vec![true; fleet.len()];
    let mut waypoint_free = vec![true; waypoints.len()];
    let rounds = fleet.len().min(waypoints.len());
    let mut pairs = Vec::with_capacity(rounds);

    for _ in 0..rounds {
        let mut best: Option<(usize, usize, f64)> = None;
        for (a, (_, position)) in fleet.iter().enumerate() {
            if !agent_free[a] {
                continue;
            }
            for (w, waypoint) in waypoints.iter().enumerate() {
                if !waypoint_free[w] {
                    continue;
                }
                let distance = position.distance_to(waypoint);
                if best.map_or(true, |(_, _, d)| distance < d) {
                    best = Some((a, w, distance));
                }
            }
        }

        let Some((a, w, distance)) = best else {
            break;
        };
        agent_free[a] = false;
        waypoint_free[w] = false;
        pairs.push(AssignmentPair {
            agent: fleet.agents[a].0,
            target: waypoints[w],
            distance,
        });
    }

    if fleet.len() != waypoints.len() {
        info!(
            agents = fleet.len(),
            waypoints = waypoints.len(),
            assigned = pairs.len(),
            "Кількість агентів і точок не збігається, призначення часткове"
        );
    }
    Assignment { pairs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_nearest_pairs_not_crossed() {
        let fleet: FleetSnapshot = [(1, Position::new(0.0, 0.0)), (2, Position::new(10.0, 10.0))]
            .into_iter()
            .collect();
        let assignment = assign(&fleet, &[Position::new(1.0, 0.0), Position::new(9.0, 10.0)]);

        assert_eq!(assignment.len(), 2);
        assert_eq!(assignment.target_of(1), Some(Position::new(1.0, 0.0)));
        assert_eq!(assignment.target_of(2), Some(Position::new(9.0, 10.0)));
        assert_eq!(assignment.total_distance(), 2.0);
    }

    #[test]
    fn test_empty_waypoints() {
        let fleet: FleetSnapshot = [(7, Position::new(0.0, 0.0))].into_iter().collect();
        assert!(assign(&fleet, &[]).is_empty());
    }

    #[test]
    fn test_more_agents_than_waypoints() {
        let fleet: FleetSnapshot = [
            (1, Position::new(5.0, 0.0)),
            (2, Position::new(0.0, 0.0)),
            (3, Position::new(9.0, 0.0)),
        ]
        .into_iter()
        .collect();
        let assignment = assign(&fleet, &[Position::new(1.0, 0.0)]);
        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment.target_of(2), Some(Position::new(1.0, 0.0)));
    }

    #[test]
    fn test_ties_follow_input_order() {
        let fleet: FleetSnapshot = [(4, Position::new(0.0, 0.0)), (2, Position::new(0.0, 0.0))]
            .into_iter()
            .collect();
        let waypoints = [Position::new(1.0, 0.0), Position::new(-1.0, 0.0)];
        let assignment = assign(&fleet, &waypoints);
        assert_eq!(assignment.pairs()[0].agent, 4);
        assert_eq!(assignment.pairs()[0].target, waypoints[0]);
        assert_eq!(assignment.target_of(2), Some(waypoints[1]));
    }

    #[test]
    fn test_split_off_where() {
        let fleet: FleetSnapshot = [(1, Position::new(0.0, 0.0)), (2, Position::new(5.0, 0.0))]
            .into_iter()
            .collect();
        let mut assignment = assign(&fleet, &[Position::new(0.0, 1.0), Position::new(5.0, 1.0)]);
        let removed = assignment.split_off_where(|pair| pair.agent != 2);

        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment.target_of(1), Some(Position::new(0.0, 1.0)));
        assert_eq!(assignment.target_of(2), None);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].agent, 2);
        assert_eq!(removed[0].target, Position::new(5.0, 1.0));
    }

    #[test]
    fn test_snapshot_reinsert_keeps_order() {
        let mut fleet = FleetSnapshot::new();
        fleet.insert(3, Position::new(0.0, 0.0));
        fleet.insert(1, Position::new(1.0, 1.0));
        fleet.insert(3, Position::new(2.0, 2.0));
        let ids: Vec<AgentId> = fleet.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(fleet.len(), 2);
    }

    fn point() -> impl Strategy<Value = Position> {
        (-50i32..50, -50i32..50).prop_map(|(x, y)| Position::new(x as f64, y as f64))
    }

    proptest! {
        #[test]
        fn prop_assignment_is_injective(
            agents in prop::collection::vec(point(), 0..8),
            waypoints in prop::collection::vec(point(), 0..8),
        ) {
            let fleet: FleetSnapshot = agents
                .iter()
                .enumerate()
                .map(|(i, p)| (i as AgentId, *p))
                .collect();
            let assignment = assign(&fleet, &waypoints);

            prop_assert_eq!(assignment.len(), agents.len().min(waypoints.len()));

            let agent_ids: HashSet<AgentId> = assignment.pairs().iter().map(|p| p.agent).collect();
            prop_assert_eq!(agent_ids.len(), assignment.len());

            // однакові координати можуть повторюватись, тому рахуємо використані індекси
            let mut used = vec![false; waypoints.len()];
            for pair in assignment.pairs() {
                let slot = waypoints
                    .iter()
                    .enumerate()
                    .position(|(i, w)| !used[i] && *w == pair.target);
                prop_assert!(slot.is_some());
                if let Some(i) = slot {
                    used[i] = true;
                }
            }
        }

        #[test]
        fn prop_assignment_is_deterministic(
            agents in prop::collection::vec(point(), 0..6),
            waypoints in prop::collection::vec(point(), 0..6),
        ) {
            let fleet: FleetSnapshot = agents
                .iter()
                .enumerate()
                .map(|(i, p)| (i as AgentId, *p))
                .collect();
            prop_assert_eq!(assign(&fleet, &waypoints), assign(&fleet, &waypoints));
        }
    }
}
