//! Execution order computation.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::EngineError;
use crate::graph::{Graph, NodeId};

/// Computes a total order over the graph's nodes respecting every edge.
///
/// Kahn's algorithm with a smallest-id-first tie-break, so the order is
/// deterministic for a given graph. Fails when the graph holds a cycle.
pub fn compute_execution_order(graph: &Graph) -> Result<Vec<NodeId>, EngineError> {
    let count = graph.node_count();
    let mut indegree: Vec<usize> = (0..count)
        .map(|id| graph.incoming(id as NodeId).len())
        .collect();
    let mut ready: BinaryHeap<Reverse<NodeId>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| Reverse(id as NodeId))
        .collect();

    let mut order = Vec::with_capacity(count);
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id);
        for &(target, _) in graph.outgoing(id) {
            indegree[target as usize] -= 1;
            if indegree[target as usize] == 0 {
                ready.push(Reverse(target));
            }
        }
    }

    if order.len() != count {
        let stuck: Vec<String> = indegree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(EngineError::CyclicGraph(format!(
            "no execution order covers nodes {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeLabel, IdentityRole, NodeKind};

    fn node(graph: &mut Graph) -> NodeId {
        graph.add_node(
            NodeKind::Identity {
                role: IdentityRole::Organic,
            },
            Vec::new(),
        )
    }

    #[test]
    fn test_order_respects_edges_and_breaks_ties_by_id() {
        let mut graph = Graph::new();
        let a = node(&mut graph);
        let b = node(&mut graph);
        let c = node(&mut graph);
        graph.add_edge(c, a, EdgeLabel::Same).unwrap();
        let order = compute_execution_order(&graph).unwrap();
        assert_eq!(order, vec![b, c, a]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = Graph::new();
        let a = node(&mut graph);
        let b = node(&mut graph);
        graph.add_edge(a, b, EdgeLabel::Same).unwrap();
        graph.add_edge(b, a, EdgeLabel::Same).unwrap();
        let err = compute_execution_order(&graph).unwrap_err();
        assert!(matches!(err, EngineError::CyclicGraph(_)));
    }

    #[test]
    fn test_every_node_appears_exactly_once() {
        let mut graph = Graph::new();
        for _ in 0..5 {
            node(&mut graph);
        }
        graph.add_edge(0, 3, EdgeLabel::Same).unwrap();
        graph.add_edge(3, 4, EdgeLabel::Synthetic).unwrap();
        graph.add_edge(1, 4, EdgeLabel::Synthetic).unwrap();
        let order = compute_execution_order(&graph).unwrap();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
        let pos = |id: NodeId| order.iter().position(|n| *n == id).unwrap();
        assert!(pos(0) < pos(3));
        assert!(pos(3) < pos(4));
        assert!(pos(1) < pos(4));
    }
}
