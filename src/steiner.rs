use crate::core::{CoordinationError, Position};
use crate::graph::CommunicationGraph;
use petgraph::algo::{bellman_ford, min_spanning_tree};
use petgraph::data::Element;
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Дерево найкоротших шляхів з однієї вершини-термінала.
struct ShortestPaths {
    distances: Vec<f64>,
    predecessors: Vec<Option<NodeIndex>>,
}

/// Наближене дерево Штейнера (евристика Коу–Марковського–Бермана).
///
/// 1. Метричне замикання над терміналами (найкоротші шляхи в графі зв'язку).
/// 2. Мінімальне кістякове дерево замикання.
/// 3. Кожне ребро замикання розгортається у свій найкоротший шлях.
/// 4. Кістякове дерево отриманого підграфа, потім відсікання листків, що не є терміналами.
///
/// Вага результату не перевищує `2 * (1 - 1/l)` від оптимуму, де `l` кількість
/// листків оптимального дерева. Для однакових вхідних даних результат однаковий:
/// вершини повертаються у порядку їх індексів у графі.
pub struct WaypointSolver<'g> {
    graph: &'g CommunicationGraph,
}

impl<'g> WaypointSolver<'g> {
    pub fn new(graph: &'g CommunicationGraph) -> Self {
        Self { graph }
    }

    /// Повертає вершини, які мають зайняти агенти, щоб усі термінали були зв'язані.
    pub fn solve(&self, terminals: &[Position]) -> Result<Vec<Position>, CoordinationError> {
        let nodes = self.resolve_terminals(terminals)?;
        if nodes.len() <= 1 {
            return Ok(nodes.iter().map(|n| self.graph.position(*n)).collect());
        }

        let trees = nodes
            .iter()
            .map(|n| self.shortest_paths(*n))
            .collect::<Result<Vec<_>, _>>()?;

        let mut closure = UnGraph::<NodeIndex, f64>::with_capacity(nodes.len(), nodes.len());
        let closure_nodes: Vec<NodeIndex> = nodes.iter().map(|n| closure.add_node(*n)).collect();
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                let distance = trees[i].distances[nodes[j].index()];
                if !distance.is_finite() {
                    return Err(CoordinationError::Disconnected {
                        from: self.graph.position(nodes[i]),
                        to: self.graph.position(nodes[j]),
                    });
                }
                closure.add_edge(closure_nodes[i], closure_nodes[j], distance);
            }
        }

        let mut path_edges = BTreeSet::new();
        for element in min_spanning_tree(&closure) {
            if let Element::Edge { source, target, .. } = element {
                trace_path(&trees[source], nodes[source], nodes[target], &mut path_edges);
            }
        }

        let tree = self.spanning_subtree(&path_edges);
        let terminal_set: BTreeSet<NodeIndex> = nodes.iter().copied().collect();
        let tree = prune_leaves(tree, &terminal_set);

        let waypoints: Vec<Position> = tree.keys().map(|n| self.graph.position(*n)).collect();
        debug!(
            terminals = nodes.len(),
            waypoints = waypoints.len(),
            "Дерево Штейнера обчислено"
        );
        Ok(waypoints)
    }

    /// Перетворює термінали на вершини графа, відкидаючи повтори.
    fn resolve_terminals(&self, terminals: &[Position]) -> Result<Vec<NodeIndex>, CoordinationError> {
        let mut nodes: Vec<NodeIndex> = Vec::with_capacity(terminals.len());
        for terminal in terminals {
            let node = self
                .graph
                .vertex_of(terminal)
                .ok_or(CoordinationError::InvalidTerminal(*terminal))?;
            if !nodes.contains(&node) {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    fn shortest_paths(&self, source: NodeIndex) -> Result<ShortestPaths, CoordinationError> {
        let origin = self.graph.position(source);
        // ваги є відстанями, тож від'ємного циклу не буває
        let paths = bellman_ford(self.graph.inner(), source).map_err(|_| {
            CoordinationError::Disconnected {
                from: origin,
                to: origin,
            }
        })?;
        Ok(ShortestPaths {
            distances: paths.distances,
            predecessors: paths.predecessors,
        })
    }

    /// Кістякове дерево підграфа, утвореного розгорнутими шляхами.
    fn spanning_subtree(
        &self,
        edges: &BTreeSet<(NodeIndex, NodeIndex)>,
    ) -> BTreeMap<NodeIndex, BTreeSet<NodeIndex>> {
        let mut sub = UnGraph::<NodeIndex, f64>::with_capacity(edges.len() + 1, edges.len());
        let mut index: BTreeMap<NodeIndex, NodeIndex> = BTreeMap::new();
        for (a, b) in edges {
            for node in [*a, *b] {
                index.entry(node).or_insert_with(|| sub.add_node(node));
            }
        }
        for (a, b) in edges {
            let weight = self.graph.position(*a).distance_to(&self.graph.position(*b));
            sub.add_edge(index[a], index[b], weight);
        }

        let mut adjacency: BTreeMap<NodeIndex, BTreeSet<NodeIndex>> =
            index.keys().map(|n| (*n, BTreeSet::new())).collect();
        for element in min_spanning_tree(&sub) {
            if let Element::Edge { source, target, .. } = element {
                let a = sub[NodeIndex::new(source)];
                let b = sub[NodeIndex::new(target)];
                adjacency.entry(a).or_default().insert(b);
                adjacency.entry(b).or_default().insert(a);
            }
        }
        adjacency
    }
}

/// Додає до `edges` ребра найкоротшого шляху `from -> to`, відновленого за попередниками.
fn trace_path(
    tree: &ShortestPaths,
    from: NodeIndex,
    to: NodeIndex,
    edges: &mut BTreeSet<(NodeIndex, NodeIndex)>,
) {
    let mut current = to;
    while current != from {
        let Some(previous) = tree.predecessors[current.index()] else {
            break;
        };
        edges.insert((previous.min(current), previous.max(current)));
        current = previous;
    }
}

/// Прибирає листки, які не є терміналами, доки такі лишаються.
fn prune_leaves(
    mut adjacency: BTreeMap<NodeIndex, BTreeSet<NodeIndex>>,
    terminals: &BTreeSet<NodeIndex>,
) -> BTreeMap<NodeIndex, BTreeSet<NodeIndex>> {
    loop {
        let leaves: Vec<NodeIndex> = adjacency
            .iter()
            .filter(|(node, neighbours)| neighbours.len() <= 1 && !terminals.contains(node))
            .map(|(node, _)| *node)
            .collect();
        if leaves.is_empty() {
            return adjacency;
        }
        for leaf in leaves {
            if let Some(neighbours) = adjacency.remove(&leaf) {
                for neighbour in neighbours {
                    if let Some(rest) = adjacency.get_mut(&neighbour) {
                        rest.remove(&leaf);
                    }
                }
            }
        }
    }
}
