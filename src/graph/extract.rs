//! LLM-backed entity/relation extraction.
//!
//! ## Chunking
//!
//! Long documents are split at heading boundaries into chunks of at most
//! `chunk_chars` characters (an oversized section is split again at blank
//! lines, then hard-cut). Only the first `max_chunks` chunks are sent, so a
//! document never costs more than that many calls. Per-chunk graphs are
//! merged with id-based deduplication.
//!
//! ## Failure semantics
//!
//! Transport failures are retried like any adapter call and, once the budget
//! is spent, returned as `Err`. An answer that cannot be parsed, or parses
//! to no nodes, is a valid *empty* result ([`GraphExtraction::Empty`]).

use super::{
    EmptyReason, GraphEdge, GraphExtraction, GraphNode, KnowledgeGraph, DEFAULT_NODE_COLOR,
};
use crate::adapters::{strip_code_fence, Completion, CompletionRequest};
use crate::config::GraphOptions;
use crate::error::AdapterError;
use crate::pipeline::retry::{with_retry, RetryPolicy};
use crate::prompts::{render_template, DEFAULT_GRAPH_PROMPT};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are a knowledge extraction engine.";
const MAX_RESPONSE_TOKENS: usize = 2000;

pub struct GraphExtractor {
    completion: Arc<dyn Completion>,
    prompt: String,
    options: GraphOptions,
    retry: RetryPolicy,
}

impl GraphExtractor {
    pub fn new(completion: Arc<dyn Completion>) -> Self {
        Self {
            completion,
            prompt: DEFAULT_GRAPH_PROMPT.to_string(),
            options: GraphOptions::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Template with a `{markdown_content}` placeholder.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_options(mut self, options: GraphOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn extract(&self, markdown: &str) -> Result<GraphExtraction, AdapterError> {
        if markdown.trim().is_empty() {
            return Ok(GraphExtraction::Empty {
                reason: EmptyReason::EmptyInput,
            });
        }

        let mut chunks = split_into_chunks(markdown, self.options.chunk_chars);
        if chunks.len() > self.options.max_chunks {
            warn!(
                "Knowledge graph: document has {} chunks; only the first {} are sent",
                chunks.len(),
                self.options.max_chunks
            );
            chunks.truncate(self.options.max_chunks);
        }
        info!("Extracting knowledge graph from {} chunk(s)", chunks.len());

        let mut graph = KnowledgeGraph::default();
        let mut last_malformed: Option<String> = None;
        let mut parsed_any = false;
        for (i, chunk) in chunks.iter().enumerate() {
            let user = render_template(&self.prompt, &[("markdown_content", chunk.as_str())]);
            let request = CompletionRequest {
                system: SYSTEM_PROMPT,
                user: &user,
                max_tokens: Some(MAX_RESPONSE_TOKENS),
            };
            let label = format!("Graph chunk {}/{}", i + 1, chunks.len());
            let response = with_retry(self.retry, &label, || self.completion.complete(&request))
                .await
                .result?;

            match parse_graph_response(&response, i) {
                Ok(part) => {
                    debug!(
                        "{}: {} nodes, {} edges",
                        label,
                        part.nodes.len(),
                        part.edges.len()
                    );
                    parsed_any = true;
                    graph.merge(part);
                }
                Err(reason) => {
                    warn!("{}: unusable answer ({}); skipping", label, reason);
                    last_malformed = Some(reason);
                }
            }
        }

        if !graph.is_empty() {
            return Ok(GraphExtraction::Extracted(graph));
        }
        let reason = match (parsed_any, last_malformed) {
            (false, Some(detail)) => EmptyReason::Malformed(detail),
            _ => EmptyReason::NoEntities,
        };
        Ok(GraphExtraction::Empty { reason })
    }
}

/// Parse and validate one model answer.
///
/// Nodes get defaults for missing fields (label as title,
/// [`DEFAULT_NODE_COLOR`], a positional id); edges are kept only when both
/// ends name known, distinct nodes. `Err` carries a short description of why
/// the answer is unusable.
///
/// A node without an id is `node_{i}` to the model but is stored under an id
/// scoped to `chunk`, so merging chunks never fuses unrelated unnamed nodes.
pub fn parse_graph_response(text: &str, chunk: usize) -> Result<KnowledgeGraph, String> {
    let body = strip_code_fence(text);
    let json = match (body.find('{'), body.rfind('}')) {
        (Some(s), Some(e)) if e > s => &body[s..=e],
        _ => {
            let preview: String = body.chars().take(60).collect();
            return Err(format!("no JSON object in {preview:?}"));
        }
    };
    let value: Value = serde_json::from_str(json).map_err(|e| format!("invalid JSON: {e}"))?;

    let mut graph = KnowledgeGraph::default();
    let mut ids: HashSet<String> = HashSet::new();
    let mut positional: HashMap<String, String> = HashMap::new();
    for (i, node) in array_field(&value, "nodes").iter().enumerate() {
        let Some(obj) = node.as_object() else {
            continue;
        };
        let id = match obj.get("id").and_then(scalar_string) {
            Some(id) => id,
            None => {
                let id = fallback_node_id(chunk, i);
                positional.insert(format!("node_{i}"), id.clone());
                id
            }
        };
        if !ids.insert(id.clone()) {
            continue;
        }
        let label = obj
            .get("label")
            .and_then(scalar_string)
            .unwrap_or_else(|| format!("Node {i}"));
        let title = obj
            .get("title")
            .and_then(scalar_string)
            .unwrap_or_else(|| label.clone());
        let color = obj
            .get("color")
            .and_then(scalar_string)
            .unwrap_or_else(|| DEFAULT_NODE_COLOR.to_string());
        graph.nodes.push(GraphNode {
            id,
            label,
            title,
            color,
        });
    }

    for (i, edge) in array_field(&value, "edges").iter().enumerate() {
        let Some(obj) = edge.as_object() else {
            continue;
        };
        let resolve = |raw: String| match positional.get(&raw) {
            Some(id) if !ids.contains(&raw) => id.clone(),
            _ => raw,
        };
        let (Some(source), Some(target)) = (
            obj.get("source").and_then(scalar_string).map(&resolve),
            obj.get("target").and_then(scalar_string).map(&resolve),
        ) else {
            continue;
        };
        if source == target || !ids.contains(&source) || !ids.contains(&target) {
            continue;
        }
        let label = obj
            .get("label")
            .and_then(scalar_string)
            .unwrap_or_else(|| format!("relation_{i}"));
        graph.edges.push(GraphEdge {
            source,
            target,
            label,
        });
    }
    Ok(graph)
}

fn fallback_node_id(chunk: usize, i: usize) -> String {
    if chunk == 0 {
        format!("node_{i}")
    } else {
        format!("c{chunk}_node_{i}")
    }
}

fn array_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Split Markdown into chunks of at most `max_chars` characters, preferring
/// heading boundaries, then blank lines.
pub fn split_into_chunks(markdown: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut pieces: Vec<String> = Vec::new();
    for section in sections(markdown) {
        if section.chars().count() <= max_chars {
            pieces.push(section);
            continue;
        }
        for para in section.split("\n\n").filter(|p| !p.trim().is_empty()) {
            pieces.extend(hard_split(para, max_chars));
        }
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        let joined_len = current.chars().count() + 2 + piece.chars().count();
        if !current.is_empty() && joined_len > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(piece.trim_matches('\n'));
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Sections starting at each heading line.
fn sections(markdown: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in markdown.lines() {
        if line.starts_with('#') && !current.trim().is_empty() {
            out.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_graph_and_fills_defaults() {
        let text = "```json\n{\"nodes\": [{\"id\": \"bert\", \"label\": \"BERT\"}, {\"label\": \"Transformer\"}],\
                    \"edges\": [{\"source\": \"bert\", \"target\": \"node_1\"}]}\n```";
        let g = parse_graph_response(text, 0).unwrap();
        assert_eq!(g.nodes[0].title, "BERT");
        assert_eq!(g.nodes[0].color, DEFAULT_NODE_COLOR);
        assert_eq!(g.nodes[1].id, "node_1");
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].label, "relation_0");
    }

    #[test]
    fn drops_dangling_and_self_edges() {
        let text = r#"{"nodes": [{"id": "a", "label": "A"}, {"id": "b", "label": "B"}],
                       "edges": [{"source": "a", "target": "zzz", "label": "x"},
                                 {"source": "a", "target": "a", "label": "self"},
                                 {"source": "a", "target": "b", "label": "ok"}]}"#;
        let g = parse_graph_response(text, 0).unwrap();
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].label, "ok");
    }

    #[test]
    fn unnamed_nodes_are_scoped_to_their_chunk() {
        let text = r#"{"nodes": [{"label": "ResNet"}, {"label": "ImageNet"}],
                       "edges": [{"source": "node_0", "target": "node_1", "label": "trained_on"}]}"#;
        let g = parse_graph_response(text, 2).unwrap();
        assert_eq!(g.nodes[0].id, "c2_node_0");
        assert_eq!(g.nodes[1].id, "c2_node_1");
        assert_eq!(g.edges[0].source, "c2_node_0");
        assert_eq!(g.edges[0].target, "c2_node_1");
    }

    #[test]
    fn explicit_id_wins_over_positional_name() {
        let text = r#"{"nodes": [{"id": "node_1", "label": "A"}, {"label": "B"}],
                       "edges": [{"source": "c1_node_1", "target": "node_1", "label": "x"}]}"#;
        let g = parse_graph_response(text, 1).unwrap();
        assert_eq!(g.nodes[1].id, "c1_node_1");
        assert_eq!(g.edges[0].target, "node_1");
    }

    #[test]
    fn prose_answer_is_malformed() {
        assert!(parse_graph_response("I could not find anything.", 0).is_err());
        assert!(parse_graph_response("{not json}", 0).is_err());
    }

    #[test]
    fn chunks_respect_limit_and_headings() {
        let section = |title: &str| format!("## {title}\n\n{}\n", "word ".repeat(40));
        let md = format!("{}{}{}", section("A"), section("B"), section("C"));
        let chunks = split_into_chunks(&md, 450);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 450));
        assert!(chunks[0].starts_with("## A"));
        assert!(chunks[1].starts_with("## C"));
    }

    #[test]
    fn oversized_paragraph_is_hard_cut() {
        let md = "x".repeat(2500);
        let chunks = split_into_chunks(&md, 1000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 500);
    }

    #[test]
    fn short_document_is_one_chunk() {
        assert_eq!(split_into_chunks("# T\n\nbody", 12_000), vec!["# T\n\nbody"]);
    }
}
