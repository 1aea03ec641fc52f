//! Dependency ordering for parsed schema statements.

use crate::error::{MigrateError, Result};
use crate::sqlparse::ddl::{ObjectKind, Statement, refers_to};
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashSet};
use tracing::debug;

/// Statements as graph nodes, with an edge `a -> b` when `b` depends on `a`.
pub struct DependencyGraph {
    graph: DiGraph<usize, ()>,
    statements: Vec<Statement>,
}

/// Ready-queue key: kind priority, then name, then source position.
type ReadyKey = Reverse<(u8, String, usize)>;

impl DependencyGraph {
    pub fn build(statements: Vec<Statement>) -> Self {
        let mut graph = DiGraph::with_capacity(statements.len(), statements.len());
        let nodes: Vec<NodeIndex> = (0..statements.len()).map(|i| graph.add_node(i)).collect();
        let mut seen_edges = HashSet::new();

        for (dependent, statement) in statements.iter().enumerate() {
            for reference in &statement.depends_on {
                // References resolve to relations created in the same batch;
                // anything else is assumed to already exist.
                let targets = statements.iter().enumerate().filter(|(i, candidate)| {
                    *i != dependent
                        && matches!(candidate.kind, ObjectKind::Table | ObjectKind::View)
                        && refers_to(reference, &candidate.name)
                });
                for (dependency, _) in targets {
                    if seen_edges.insert((dependency, dependent)) {
                        graph.add_edge(nodes[dependency], nodes[dependent], ());
                    }
                }
            }
        }

        Self { graph, statements }
    }

    /// Names of the statements `index` must be created after.
    pub fn dependencies_of(&self, index: usize) -> Vec<&str> {
        self.graph
            .neighbors_directed(NodeIndex::new(index), Direction::Incoming)
            .map(|n| self.statements[self.graph[n]].name.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn ready_key(&self, index: usize) -> ReadyKey {
        let statement = &self.statements[index];
        Reverse((
            statement.kind.priority(),
            statement.name.to_lowercase(),
            index,
        ))
    }

    /// Kahn's algorithm with a priority ready-queue, so that output is
    /// deterministic and independent statements follow kind order then name.
    pub fn into_order(self) -> Result<Vec<Statement>> {
        let count = self.statements.len();
        let mut in_degree: Vec<usize> = (0..count)
            .map(|i| {
                self.graph
                    .neighbors_directed(NodeIndex::new(i), Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: BinaryHeap<ReadyKey> = (0..count)
            .filter(|&i| in_degree[i] == 0)
            .map(|i| self.ready_key(i))
            .collect();

        let mut order = Vec::with_capacity(count);
        while let Some(Reverse((_, _, index))) = ready.pop() {
            order.push(index);
            for dependent in self
                .graph
                .neighbors_directed(NodeIndex::new(index), Direction::Outgoing)
            {
                let dependent = self.graph[dependent];
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(self.ready_key(dependent));
                }
            }
        }

        if order.len() < count {
            return Err(MigrateError::Cycle {
                statements: self.cycle_members(),
            });
        }

        debug!(
            "Resolved order for {} statements ({} dependency edges)",
            count,
            self.graph.edge_count()
        );

        let mut slots: Vec<Option<Statement>> = self.statements.into_iter().map(Some).collect();
        Ok(order
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect())
    }

    /// Labels of statements that sit on a cycle, sorted.
    fn cycle_members(&self) -> Vec<String> {
        let mut members: Vec<String> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .flatten()
            .map(|node| self.statements[self.graph[node]].label())
            .collect();
        members.sort();
        members
    }
}

/// Order statements so every statement follows the in-batch objects it
/// references. Fails without a partial result when the references form a cycle.
pub fn resolve_order(statements: Vec<Statement>) -> Result<Vec<Statement>> {
    DependencyGraph::build(statements).into_order()
}
