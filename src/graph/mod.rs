//! Knowledge graph: entities and relations extracted from exported Markdown.
//!
//! The graph is hand-off data for an external renderer (an HTML network
//! view, typically). Node and edge fields follow that renderer's
//! vocabulary: `label` is drawn on the node, `title` is the hover text.
//!
//! Two producers exist:
//!
//! * [`GraphExtractor`] asks an LLM, in bounded chunks for long documents.
//! * [`KnowledgeGraph::from_outline`] builds a heading-hierarchy graph
//!   offline, for runs without a model.

mod extract;

pub use extract::{parse_graph_response, split_into_chunks, GraphExtractor};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Colour per heading level (1-based, last one repeats).
pub const LEVEL_COLORS: [&str; 6] = [
    "#ff7f50", "#00bfff", "#32cd32", "#ffd700", "#ff69b4", "#9370db",
];

/// Colour for LLM nodes that do not name one.
pub const DEFAULT_NODE_COLOR: &str = "#00bfff";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub title: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl KnowledgeGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Fold `other` into `self`. Nodes are deduplicated by id (first one
    /// wins) and edges by `(source, target, label)`.
    pub fn merge(&mut self, other: KnowledgeGraph) {
        let mut ids: HashSet<String> = self.nodes.iter().map(|n| n.id.clone()).collect();
        for node in other.nodes {
            if ids.insert(node.id.clone()) {
                self.nodes.push(node);
            }
        }
        let mut seen: HashSet<(String, String, String)> = self
            .edges
            .iter()
            .map(|e| (e.source.clone(), e.target.clone(), e.label.clone()))
            .collect();
        for edge in other.edges {
            let key = (edge.source.clone(), edge.target.clone(), edge.label.clone());
            if ids.contains(&edge.source) && ids.contains(&edge.target) && seen.insert(key) {
                self.edges.push(edge);
            }
        }
    }

    /// Heading hierarchy of `markdown` as a graph.
    ///
    /// Every ATX heading becomes a node coloured by its level; each heading
    /// is linked from the nearest preceding heading of a higher level with a
    /// `contains` edge. A document without headings yields a single
    /// `document` node.
    pub fn from_outline(markdown: &str) -> Self {
        let mut graph = KnowledgeGraph::default();
        // (level, node id) of the open ancestors.
        let mut stack: Vec<(usize, String)> = Vec::new();
        let mut in_math = false;

        for line in markdown.lines().map(str::trim) {
            if line == "$$" {
                in_math = !in_math;
                continue;
            }
            if in_math {
                continue;
            }
            let Some((level, title)) = heading(line) else {
                continue;
            };
            let id = format!("section_{}", graph.nodes.len());
            graph.nodes.push(GraphNode {
                id: id.clone(),
                label: title.to_string(),
                title: format!("Level {level} heading"),
                color: LEVEL_COLORS[(level - 1).min(LEVEL_COLORS.len() - 1)].to_string(),
            });
            while stack.last().is_some_and(|(l, _)| *l >= level) {
                stack.pop();
            }
            if let Some((_, parent)) = stack.last() {
                graph.edges.push(GraphEdge {
                    source: parent.clone(),
                    target: id.clone(),
                    label: "contains".to_string(),
                });
            }
            stack.push((level, id));
        }

        if graph.nodes.is_empty() {
            graph.nodes.push(GraphNode {
                id: "document".to_string(),
                label: "Document".to_string(),
                title: "Document content".to_string(),
                color: LEVEL_COLORS[0].to_string(),
            });
        }
        graph
    }
}

/// `(level, text)` of an ATX heading line.
fn heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(' ') {
        return None;
    }
    let text = rest.trim().trim_end_matches('#').trim();
    (!text.is_empty()).then_some((level, text))
}

/// Why an extraction produced no graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmptyReason {
    /// The Markdown had no text to send.
    EmptyInput,
    /// The model answered with a well-formed but empty graph.
    NoEntities,
    /// No answer could be parsed as a graph.
    Malformed(String),
}

/// Result of a graph extraction. An empty graph is a valid outcome, kept
/// apart from [`crate::error::AdapterError`] failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphExtraction {
    Extracted(KnowledgeGraph),
    Empty { reason: EmptyReason },
}

impl GraphExtraction {
    pub fn is_empty(&self) -> bool {
        matches!(self, GraphExtraction::Empty { .. })
    }

    /// The graph, with `nodes = [], edges = []` for an empty result.
    pub fn into_graph(self) -> KnowledgeGraph {
        match self {
            GraphExtraction::Extracted(graph) => graph,
            GraphExtraction::Empty { .. } => KnowledgeGraph::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outline_builds_hierarchy() {
        let md = "# Paper\n\nintro\n\n## Method\n\n### Encoder\n\n## Results\n";
        let g = KnowledgeGraph::from_outline(md);
        let labels: Vec<&str> = g.nodes.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, ["Paper", "Method", "Encoder", "Results"]);
        let edges: Vec<(&str, &str)> = g
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        assert_eq!(
            edges,
            [
                ("section_0", "section_1"),
                ("section_1", "section_2"),
                ("section_0", "section_3"),
            ]
        );
        assert_eq!(g.nodes[2].color, "#32cd32");
    }

    #[test]
    fn outline_without_headings_is_single_node() {
        let g = KnowledgeGraph::from_outline("just text\n#hashtag\n");
        assert_eq!(g.nodes.len(), 1);
        assert_eq!(g.nodes[0].id, "document");
        assert!(g.edges.is_empty());
    }

    #[test]
    fn merge_dedups_nodes_and_edges() {
        let node = |id: &str| GraphNode {
            id: id.into(),
            label: id.into(),
            title: id.into(),
            color: DEFAULT_NODE_COLOR.into(),
        };
        let edge = |s: &str, t: &str| GraphEdge {
            source: s.into(),
            target: t.into(),
            label: "uses".into(),
        };
        let mut a = KnowledgeGraph {
            nodes: vec![node("bert"), node("transformer")],
            edges: vec![edge("bert", "transformer")],
        };
        a.merge(KnowledgeGraph {
            nodes: vec![node("transformer"), node("attention")],
            edges: vec![edge("bert", "transformer"), edge("transformer", "attention")],
        });
        assert_eq!(a.nodes.len(), 3);
        assert_eq!(a.edges.len(), 2);
    }

    #[test]
    fn empty_extraction_serialises_as_empty_lists() {
        let g = GraphExtraction::Empty {
            reason: EmptyReason::NoEntities,
        }
        .into_graph();
        assert_eq!(
            serde_json::to_string(&g).unwrap(),
            r#"{"nodes":[],"edges":[]}"#
        );
    }
}
