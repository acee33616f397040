use crate::core::Position;
use petgraph::graph::{NodeIndex, UnGraph};
use tracing::debug;

/// Статичний граф зв'язку: вершини-кандидати та ребра між парами в межах дальності.
///
/// Будується один раз при старті і далі лише читається, тож його можна
/// спільно використовувати через `Arc` будь-якою кількістю розв'язувачів.
#[derive(Debug, Clone)]
pub struct CommunicationGraph {
    graph: UnGraph<Position, f64>,
    threshold: f64,
}

impl CommunicationGraph {
    /// З'єднує кожну пару позицій, відстань між якими не перевищує `threshold`.
    pub fn build(vertices: &[Position], threshold: f64) -> Self {
        let mut graph = UnGraph::with_capacity(vertices.len(), vertices.len());
        let nodes: Vec<NodeIndex> = vertices.iter().map(|p| graph.add_node(*p)).collect();

        for (i, a) in vertices.iter().enumerate() {
            for (j, b) in vertices.iter().enumerate().skip(i + 1) {
                let distance = a.distance_to(b);
                if distance <= threshold {
                    graph.add_edge(nodes[i], nodes[j], distance);
                }
            }
        }

        debug!(
            vertices = graph.node_count(),
            edges = graph.edge_count(),
            threshold,
            "Граф зв'язку побудовано"
        );
        Self { graph, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Шукає вершину з точно такими координатами.
    pub fn vertex_of(&self, position: &Position) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|idx| self.graph[*idx] == *position)
    }

    pub fn position(&self, node: NodeIndex) -> Position {
        self.graph[node]
    }

    #[cfg(test)]
    pub fn are_adjacent(&self, a: NodeIndex, b: NodeIndex) -> bool {
        self.graph.find_edge(a, b).is_some()
    }

    pub(crate) fn inner(&self) -> &UnGraph<Position, f64> {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Position> {
        vec![
            Position::new(0.0, 0.0),
            Position::new(3.0, 0.0),
            Position::new(3.0, 3.0),
            Position::new(0.0, 3.0),
        ]
    }

    #[test]
    fn test_square_forms_cycle() {
        let graph = CommunicationGraph::build(&square(), 3.5);
        assert_eq!(graph.vertex_count(), 4);
        assert_eq!(graph.edge_count(), 4);

        let v = |x, y| graph.vertex_of(&Position::new(x, y)).unwrap();
        assert!(graph.are_adjacent(v(0.0, 0.0), v(3.0, 0.0)));
        assert!(graph.are_adjacent(v(3.0, 0.0), v(3.0, 3.0)));
        assert!(!graph.are_adjacent(v(0.0, 0.0), v(3.0, 3.0)));
        assert!(!graph.are_adjacent(v(3.0, 0.0), v(0.0, 3.0)));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let graph = CommunicationGraph::build(&square(), 3.0);
        assert_eq!(graph.edge_count(), 4);

        let graph = CommunicationGraph::build(&square(), 2.9);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_edge_weight_is_distance() {
        let graph = CommunicationGraph::build(&[Position::new(0.0, 0.0), Position::new(3.0, 4.0)], 10.0);
        let edge = graph.inner().edge_indices().next().unwrap();
        assert_eq!(graph.inner()[edge], 5.0);
    }

    #[test]
    fn test_unknown_vertex() {
        let graph = CommunicationGraph::build(&square(), 3.5);
        assert!(graph.vertex_of(&Position::new(1.0, 1.0)).is_none());
    }
}
