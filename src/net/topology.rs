//! Static view of a net: which places and transitions exist and how they are
//! connected. Used for diagnostics and graph export.
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use petgraph::Direction;
use petgraph::graph::{EdgeIndex, Graph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::net::ids::ActorId;
use crate::net::structure::{ActorKind, Weight};
use crate::net::token::Label;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: ActorId,
    pub name: String,
    pub kind: ActorKind,
    /// Tokens placed at build time, zero for transitions.
    pub initial_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeInfo {
    pub weight: Weight,
    pub label: Label,
}

/// Serialisable listing of a [`Topology`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDescription {
    pub nodes: Vec<NodeInfo>,
    pub arcs: Vec<(ActorId, ActorId, EdgeInfo)>,
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    graph: Graph<NodeInfo, EdgeInfo>,
    index: IndexMap<ActorId, NodeIndex>,
}

impl Topology {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_node(&mut self, info: NodeInfo) {
        let id = info.id;
        let idx = self.graph.add_node(info);
        self.index.insert(id, idx);
    }

    pub(crate) fn add_arc(&mut self, from: ActorId, to: ActorId, edge: EdgeInfo) {
        if let (Some(&a), Some(&b)) = (self.index.get(&from), self.index.get(&to)) {
            self.graph.add_edge(a, b, edge);
        }
    }

    pub fn graph(&self) -> &Graph<NodeInfo, EdgeInfo> {
        &self.graph
    }

    pub fn node(&self, id: ActorId) -> Option<&NodeInfo> {
        self.index.get(&id).map(|idx| &self.graph[*idx])
    }

    /// Nodes in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.index.values().map(|idx| &self.graph[*idx])
    }

    /// Arcs in connection order.
    pub fn arcs(&self) -> impl Iterator<Item = (ActorId, ActorId, EdgeInfo)> + '_ {
        self.graph
            .edge_references()
            .map(|edge| (self.graph[edge.source()].id, self.graph[edge.target()].id, *edge.weight()))
    }

    pub fn input_count(&self, id: ActorId) -> usize {
        self.degree(id, Direction::Incoming)
    }

    pub fn output_count(&self, id: ActorId) -> usize {
        self.degree(id, Direction::Outgoing)
    }

    fn degree(&self, id: ActorId, direction: Direction) -> usize {
        self.index
            .get(&id)
            .map_or(0, |idx| self.graph.edges_directed(*idx, direction).count())
    }

    /// Incoming edges of `idx`, oldest first.
    fn incoming(&self, idx: NodeIndex) -> Vec<(NodeIndex, EdgeInfo)> {
        let mut edges: Vec<(EdgeIndex, NodeIndex, EdgeInfo)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|edge| (edge.id(), edge.source(), *edge.weight()))
            .collect();
        edges.sort_by_key(|(edge, ..)| *edge);
        edges.into_iter().map(|(_, src, info)| (src, info)).collect()
    }

    pub fn describe(&self) -> TopologyDescription {
        TopologyDescription {
            nodes: self.nodes().cloned().collect(),
            arcs: self.arcs().collect(),
        }
    }

    /// Graphviz description in the simulator's presentation style: one
    /// cluster holding every actor, then every arc grouped by destination.
    pub fn generate_graph(&self, net_name: &str) -> String {
        let mut gv = String::new();
        let _ = writeln!(&mut gv, "digraph {} {{", escape_id(net_name));
        let _ = writeln!(&mut gv, "subgraph cluster_0 {{");
        let _ = writeln!(&mut gv, "penwidth=3;");
        for node in self.nodes() {
            let _ = writeln!(&mut gv, "{}", node_definition(node));
        }
        let _ = writeln!(&mut gv, "}}");
        for idx in self.index.values() {
            let dst = &self.graph[*idx];
            for (src, edge) in self.incoming(*idx) {
                let src = &self.graph[src];
                let _ = writeln!(
                    &mut gv,
                    "{}_0 -> {}_0 [fontsize=\"20\",label=\"{}\",minlen=2,penwidth=3];",
                    escape_id(&src.name),
                    escape_id(&dst.name),
                    arc_label(&edge)
                );
            }
        }
        let _ = writeln!(&mut gv, "clusterrank=none;");
        let _ = writeln!(&mut gv, "}}");
        gv
    }

    /// Plain left-to-right DOT rendering with names and initial tokens.
    pub fn to_dot(&self) -> String {
        let mut dot = String::new();
        let _ = writeln!(&mut dot, "digraph PetriNet {{");
        let _ = writeln!(&mut dot, "    rankdir=LR;");
        let _ = writeln!(&mut dot, "    node [fontname=\"Helvetica\"];");

        for node in self.nodes() {
            let name = escape_label(&node.name);
            match node.kind {
                ActorKind::Place | ActorKind::SpecialPlace => {
                    let fill = if node.kind == ActorKind::SpecialPlace {
                        "#c8e6c9"
                    } else {
                        "#e3f2fd"
                    };
                    let _ = writeln!(
                        &mut dot,
                        "    n{} [label=\"{}\\n{}\", shape=circle, style=filled, fillcolor=\"{}\"];",
                        node.id, name, node.initial_tokens, fill
                    );
                }
                ActorKind::Transition => {
                    let _ = writeln!(
                        &mut dot,
                        "    n{} [label=\"{}\", shape=box, style=filled, fillcolor=\"#ffe0b2\"];",
                        node.id, name
                    );
                }
            }
        }

        for (from, to, edge) in self.arcs() {
            if edge.weight == 1 && edge.label.is_generic() {
                let _ = writeln!(&mut dot, "    n{} -> n{};", from, to);
            } else {
                let _ = writeln!(
                    &mut dot,
                    "    n{} -> n{} [label=\"{}\"];",
                    from,
                    to,
                    arc_label(&edge)
                );
            }
        }

        let _ = writeln!(&mut dot, "}}");
        dot
    }

    pub fn write_dot<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_dot())
    }
}

fn node_definition(node: &NodeInfo) -> String {
    let (shape, color, fillcolor, height, width) = match node.kind {
        ActorKind::Place | ActorKind::SpecialPlace => ("circle", "#000000", "#dddddd", 1.0, 1.0),
        ActorKind::Transition => ("box", "#cccccc", "#000000", 0.25, 1.25),
    };
    format!(
        "{}_0 [shape=\"{}\",fontsize=\"20\",style=\"filled\",color=\"{}\",fillcolor=\"{}\",label=\"\",xlabel=\"{}\",height=\"{}\",width=\"{}\",penwidth=3];",
        escape_id(&node.name),
        shape,
        color,
        fillcolor,
        escape_label(&node.name),
        height,
        width
    )
}

fn arc_label(edge: &EdgeInfo) -> String {
    match (edge.weight, edge.label.is_generic()) {
        (1, true) => String::new(),
        (w, true) => w.to_string(),
        (w, false) => format!("{}{{L{}}}", w, edge.label),
    }
}

/// Graphviz ids: anything outside `[A-Za-z0-9_]` becomes `_`.
fn escape_id(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' { ch } else { '_' })
        .collect()
}

fn escape_label(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Topology {
        let mut topology = Topology::new();
        let node = |id, name: &str, kind, initial_tokens| NodeInfo {
            id: ActorId::new(id),
            name: name.to_string(),
            kind,
            initial_tokens,
        };
        topology.add_node(node(1, "p1", ActorKind::Place, 2));
        topology.add_node(node(2, "t1", ActorKind::Transition, 0));
        topology.add_node(node(3, "p2", ActorKind::SpecialPlace, 0));
        let edge = |weight, label| EdgeInfo { weight, label };
        topology.add_arc(ActorId::new(1), ActorId::new(2), edge(2, Label::GENERIC));
        topology.add_arc(ActorId::new(2), ActorId::new(3), edge(1, Label::GENERIC));
        topology.add_arc(ActorId::new(2), ActorId::new(1), edge(1, Label::new(4)));
        topology
    }

    #[test]
    fn degrees_follow_arcs() {
        let topology = sample();
        assert_eq!(topology.input_count(ActorId::new(2)), 1);
        assert_eq!(topology.output_count(ActorId::new(2)), 2);
        assert_eq!(topology.input_count(ActorId::new(9)), 0);
        assert_eq!(topology.node(ActorId::new(3)).unwrap().name, "p2");
        let arcs: Vec<_> = topology.arcs().map(|(a, b, _)| (a.raw(), b.raw())).collect();
        assert_eq!(arcs, vec![(1, 2), (2, 3), (2, 1)]);
    }

    #[test]
    fn description_survives_json_and_ron_files() {
        let description = sample().describe();
        assert_eq!(description.nodes.len(), 3);
        assert_eq!(description.arcs[2].2, EdgeInfo { weight: 1, label: Label::new(4) });

        let dir = tempfile::tempdir().unwrap();
        for name in ["topology.json", "out/topology.ron"] {
            let path = dir.path().join(name);
            crate::net::io::write_value(&path, &description).unwrap();
            let back: TopologyDescription = crate::net::io::read_value(&path).unwrap();
            assert_eq!(back, description);
        }
    }

    #[test]
    fn graph_uses_cluster_layout() {
        let gv = sample().generate_graph("Net");
        let lines: Vec<&str> = gv.lines().collect();
        assert_eq!(lines[0], "digraph Net {");
        assert_eq!(lines[1], "subgraph cluster_0 {");
        assert_eq!(lines[2], "penwidth=3;");
        assert!(lines[3].starts_with("p1_0 [shape=\"circle\""));
        assert!(lines[3].contains("xlabel=\"p1\""));
        assert!(lines[4].starts_with("t1_0 [shape=\"box\""));
        assert!(lines[4].contains("height=\"0.25\",width=\"1.25\""));
        assert_eq!(lines[6], "}");
        assert_eq!(
            lines[7],
            "t1_0 -> p1_0 [fontsize=\"20\",label=\"1{L4}\",minlen=2,penwidth=3];"
        );
        assert!(lines[8].starts_with("p1_0 -> t1_0 [fontsize=\"20\",label=\"2\""));
        assert!(lines[9].starts_with("t1_0 -> p2_0"));
        assert_eq!(lines[10], "clusterrank=none;");
        assert_eq!(lines[11], "}");
    }

    #[test]
    fn dot_lists_nodes_and_weighted_arcs() {
        let dot = sample().to_dot();
        assert!(dot.starts_with("digraph PetriNet {"));
        assert!(dot.contains("n1 [label=\"p1\\n2\", shape=circle"));
        assert!(dot.contains("n1 -> n2 [label=\"2\"];"));
        assert!(dot.contains("n2 -> n3;"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn write_dot_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("net.dot");
        sample().write_dot(&path).unwrap();
        assert!(fs::read_to_string(path).unwrap().contains("rankdir=LR"));
    }
}
