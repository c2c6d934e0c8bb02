use std::collections::{HashMap, HashSet};

use crate::dsl::GraphDSL;

/// All node ids `start` depends on (including `start`), following connections backwards.
pub fn upstream_reachable(graph: &GraphDSL, start: &str) -> HashSet<String> {
    let mut incoming: HashMap<&str, Vec<&str>> = HashMap::new();
    for c in &graph.connections {
        incoming
            .entry(c.to.node_id.as_str())
            .or_default()
            .push(c.from.node_id.as_str());
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<&str> = vec![start];
    while let Some(n) = stack.pop() {
        if !visited.insert(n.to_string()) {
            continue;
        }
        if let Some(prevs) = incoming.get(n) {
            for p in prevs {
                stack.push(p);
            }
        }
    }
    visited
}

/// Whether adding `from -> to` would close a cycle.
pub fn would_create_cycle(graph: &GraphDSL, from: &str, to: &str) -> bool {
    from == to || upstream_reachable(graph, from).contains(to)
}

/// Nodes present in the graph that do not feed the field output.
pub fn unreachable_from_output(graph: &GraphDSL) -> Vec<String> {
    let Some(root) = graph.field_output() else {
        return graph.nodes.iter().map(|n| n.id.clone()).collect();
    };
    let reachable = upstream_reachable(graph, root);
    let mut out: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| !reachable.contains(&n.id))
        .map(|n| n.id.clone())
        .collect();
    out.sort();
    out
}
