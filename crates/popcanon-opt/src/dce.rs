//! Dead node pruning.
//!
//! Removes nodes none of whose outputs are (directly or transitively)
//! needed by a graph output or by a node with side effects.

use std::collections::HashSet;

use popcanon_ir::{Graph, Handle, Node};
use popcanon_ops::OpRegistry;

use crate::CanonError;

fn has_side_effects(node: &Node) -> bool {
    OpRegistry::global()
        .get(&node.kind)
        .is_some_and(|schema| schema.side_effects)
}

/// Nodes the graph outputs and side-effecting nodes depend on.
pub(crate) fn live_nodes(graph: &Graph) -> HashSet<Handle<Node>> {
    // 1. Roots: producers of graph outputs and side-effecting nodes.
    let mut live: HashSet<Handle<Node>> = graph
        .outputs()
        .iter()
        .filter_map(|&v| graph.producer_node(v))
        .collect();
    live.extend(
        graph
            .nodes()
            .filter(|(_, n)| has_side_effects(n))
            .map(|(h, _)| h),
    );

    // 2. Transitively mark producers of inputs of live nodes.
    let mut worklist: Vec<Handle<Node>> = live.iter().copied().collect();
    while let Some(h) = worklist.pop() {
        for &input in graph.node(h).inputs() {
            if let Some(producer) = graph.producer_node(input)
                && live.insert(producer)
            {
                worklist.push(producer);
            }
        }
    }
    live
}

/// Removes every node not in [`live_nodes`]. Returns how many were removed.
pub fn prune_dead_nodes(graph: &mut Graph) -> Result<usize, CanonError> {
    let live = live_nodes(graph);
    let dead: Vec<Handle<Node>> = graph
        .node_order()
        .into_iter()
        .filter(|h| !live.contains(h))
        .collect();

    // Consumers before producers, so no dead node still has uses when it goes.
    for &h in dead.iter().rev() {
        log::trace!("pruning dead {}", graph.node(h).kind);
        graph.destroy_node(h)?;
    }
    Ok(dead.len())
}

#[cfg(test)]
mod tests {
    use popcanon_ir::{Attribute, ElementType, NodeKind, ValueType};

    use super::*;

    fn f32(dims: &[usize]) -> ValueType {
        ValueType::tensor(ElementType::Float32, dims)
    }

    #[test]
    fn removes_unused_chain() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[2]), "x");
        let c = graph.insert_node(
            NodeKind::prim("Constant"),
            vec![],
            vec![ValueType::Scalar(ElementType::Int64)],
        );
        graph.node_mut(c).set_attr("value", Attribute::Int(1));
        let list = graph.insert_node(
            NodeKind::prim("ListConstruct"),
            vec![graph.node(c).output()],
            vec![ValueType::List(popcanon_ir::ListElem::Int)],
        );
        let relu = graph.insert_node(NodeKind::popart("relu"), vec![x], vec![f32(&[2])]);
        graph.register_output(graph.node(relu).output());

        assert_eq!(prune_dead_nodes(&mut graph).unwrap(), 2);
        assert_eq!(graph.node_order(), vec![relu]);
        assert!(!graph.node(list).is_alive());
        graph.verify().unwrap();
    }

    #[test]
    fn keeps_side_effecting_nodes() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[2]), "x");
        let loss = graph.insert_node(NodeKind::poptorch("identity_loss"), vec![x], vec![f32(&[])]);
        graph.node_mut(loss).set_attr("reduction", Attribute::Int(1));

        assert_eq!(prune_dead_nodes(&mut graph).unwrap(), 0);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn keeps_everything_feeding_outputs() {
        let mut graph = Graph::new();
        let x = graph.add_input(f32(&[2]), "x");
        let a = graph.insert_node(NodeKind::popart("relu"), vec![x], vec![f32(&[2])]);
        let a_out = graph.node(a).output();
        let b = graph.insert_node(NodeKind::popart("neg"), vec![a_out], vec![f32(&[2])]);
        graph.register_output(graph.node(b).output());
        assert_eq!(prune_dead_nodes(&mut graph).unwrap(), 0);
    }
}
