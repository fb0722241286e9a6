//! Bookkeeping for the processing graph.
//!
//! The ledger records which processing node feeds which other node or parameter
//! so the topology can be printed while debugging. It only ever stores integer
//! handles, never the nodes themselves, and the mixer does not consult it: a
//! disabled ledger leaves audio output untouched.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

/// Handle to a node registered with the ledger.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Receiving end of an edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Node(NodeId),
    /// A named parameter owned by a node. Feeding a parameter does not make the
    /// owner a non-root.
    Param(NodeId, String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub target: Endpoint,
    pub output: usize,
    pub input: usize,
}

#[derive(Debug, Default)]
pub struct AudioGraphLedger {
    disabled: bool,
    next_id: u32,
    names: HashMap<NodeId, String>,
    edges: BTreeMap<NodeId, Vec<Edge>>,
    incoming: HashMap<NodeId, usize>,
}

impl AudioGraphLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger that hands out handles but records no edges.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    pub fn create_node(&mut self, name: impl Into<String>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        if !self.disabled {
            self.names.insert(id, name.into());
        }
        id
    }

    /// Forgets a node: its outgoing edges, every edge pointing at it, and its
    /// name.
    pub fn release_node(&mut self, id: NodeId) {
        if self.disabled {
            return;
        }

        self.disconnect(id);

        let sources: Vec<NodeId> = self
            .edges
            .iter()
            .filter(|(_, edges)| edges.iter().any(|e| targets_node(e, id)))
            .map(|(source, _)| *source)
            .collect();
        for source in sources {
            self.remove_edges(source, |e| targets_node(e, id));
        }

        self.incoming.remove(&id);
        self.names.remove(&id);
    }

    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) {
        if !self.disabled {
            self.names.insert(id, name.into());
        }
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) {
        self.connect_indexed(from, to, 0, 0);
    }

    pub fn connect_indexed(&mut self, from: NodeId, to: NodeId, output: usize, input: usize) {
        self.add_edge(
            from,
            Edge {
                target: Endpoint::Node(to),
                output,
                input,
            },
        );
    }

    pub fn connect_param(&mut self, from: NodeId, owner: NodeId, param: impl Into<String>) {
        self.add_edge(
            from,
            Edge {
                target: Endpoint::Param(owner, param.into()),
                output: 0,
                input: 0,
            },
        );
    }

    fn add_edge(&mut self, from: NodeId, edge: Edge) {
        if self.disabled {
            return;
        }

        let edges = self.edges.entry(from).or_default();
        if edges.contains(&edge) {
            return;
        }
        if let Endpoint::Node(to) = edge.target {
            *self.incoming.entry(to).or_insert(0) += 1;
        }
        edges.push(edge);
    }

    /// Removes every outgoing edge of `from`.
    pub fn disconnect(&mut self, from: NodeId) {
        self.remove_edges(from, |_| true);
    }

    /// Removes every edge from `from` into node `to`.
    pub fn disconnect_from(&mut self, from: NodeId, to: NodeId) {
        self.remove_edges(from, |e| e.target == Endpoint::Node(to));
    }

    /// Removes every outgoing edge of `from` leaving through `output`.
    pub fn disconnect_output(&mut self, from: NodeId, output: usize) {
        self.remove_edges(from, |e| e.output == output);
    }

    pub fn disconnect_indexed(&mut self, from: NodeId, to: NodeId, output: usize, input: usize) {
        self.remove_edges(from, |e| {
            e.target == Endpoint::Node(to) && e.output == output && e.input == input
        });
    }

    pub fn disconnect_param(&mut self, from: NodeId, owner: NodeId, param: &str) {
        self.remove_edges(from, |e| match &e.target {
            Endpoint::Param(o, p) => *o == owner && p == param,
            Endpoint::Node(_) => false,
        });
    }

    fn remove_edges(&mut self, from: NodeId, mut matches: impl FnMut(&Edge) -> bool) {
        if self.disabled {
            return;
        }

        let Some(edges) = self.edges.get_mut(&from) else {
            return;
        };

        let mut released = Vec::new();
        edges.retain(|edge| {
            if matches(edge) {
                if let Endpoint::Node(to) = edge.target {
                    released.push(to);
                }
                false
            } else {
                true
            }
        });

        if edges.is_empty() {
            self.edges.remove(&from);
        }

        for to in released {
            if let Some(count) = self.incoming.get_mut(&to) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.incoming.remove(&to);
                }
            }
        }
    }

    pub fn outgoing(&self, from: NodeId) -> &[Edge] {
        self.edges.get(&from).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming_count(&self, id: NodeId) -> usize {
        self.incoming.get(&id).copied().unwrap_or(0)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Nodes with outgoing edges and nothing feeding them.
    pub fn roots(&self) -> Vec<NodeId> {
        self.edges
            .keys()
            .copied()
            .filter(|id| self.incoming_count(*id) == 0)
            .collect()
    }

    /// Renders the graph as an indented tree, one tree per root.
    pub fn print(&self) -> String {
        let mut out = String::new();
        for root in self.roots() {
            let mut path = Vec::new();
            self.print_node(root, 0, &mut path, &mut out);
        }
        out
    }

    fn label(&self, id: NodeId) -> String {
        match self.name(id) {
            Some(name) => format!("{name} ({})", id.0),
            None => format!("node {}", id.0),
        }
    }

    fn print_node(&self, id: NodeId, depth: usize, path: &mut Vec<NodeId>, out: &mut String) {
        let indent = "  ".repeat(depth);
        if path.contains(&id) {
            let _ = writeln!(out, "{indent}{} (cycle)", self.label(id));
            return;
        }
        let _ = writeln!(out, "{indent}{}", self.label(id));

        path.push(id);
        for edge in self.outgoing(id) {
            match &edge.target {
                Endpoint::Node(to) => self.print_node(*to, depth + 1, path, out),
                Endpoint::Param(owner, param) => {
                    let _ = writeln!(out, "{indent}  {}.{param}", self.label(*owner));
                }
            }
        }
        path.pop();
    }
}

fn targets_node(edge: &Edge, id: NodeId) -> bool {
    match &edge.target {
        Endpoint::Node(to) => *to == id,
        Endpoint::Param(owner, _) => *owner == id,
    }
}
