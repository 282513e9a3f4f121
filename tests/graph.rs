//! Knowledge-graph extraction: empty results are values, transport failures
//! are errors, and long documents cost a bounded number of calls.

mod common;

use common::{test_config, Harness, MockCompletion};
use paper2md::graph::{GraphExtractor, DEFAULT_NODE_COLOR};
use paper2md::pipeline::RetryPolicy;
use paper2md::{
    AdapterError, EmptyReason, GraphExtraction, GraphOptions, KnowledgeGraph, PipelineConfig,
    PipelineError,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const TRANSFORMER_GRAPH: &str = r##"Here is the graph:
```json
{
  "nodes": [
    {"id": "transformer", "label": "Transformer", "color": "#ff7f50"},
    {"id": "attention", "label": "Self-attention", "title": "Scaled dot-product attention"}
  ],
  "edges": [
    {"source": "transformer", "target": "attention", "label": "uses"},
    {"source": "transformer", "target": "rnn", "label": "replaces"}
  ]
}
```"##;

fn extractor(completion: &Arc<MockCompletion>) -> GraphExtractor {
    GraphExtractor::new(completion.clone()).with_retry(RetryPolicy {
        max_retries: 2,
        backoff_ms: 1,
    })
}

#[tokio::test]
async fn valid_answer_is_extracted_with_defaults() {
    let completion = Arc::new(MockCompletion::answering(TRANSFORMER_GRAPH));
    let result = extractor(&completion)
        .extract("# Attention\n\nThe Transformer uses self-attention.")
        .await
        .unwrap();

    let GraphExtraction::Extracted(graph) = result else {
        panic!("expected a graph, got {result:?}");
    };
    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(graph.nodes[0].title, "Transformer");
    assert_eq!(graph.nodes[1].color, DEFAULT_NODE_COLOR);
    // The edge to the unknown `rnn` node is dropped.
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.edges[0].label, "uses");
}

#[tokio::test]
async fn empty_answer_is_a_valid_empty_graph() {
    let completion = Arc::new(MockCompletion::answering(r#"{"nodes": [], "edges": []}"#));
    let result = extractor(&completion).extract("Some text.").await.unwrap();
    assert_eq!(
        result,
        GraphExtraction::Empty {
            reason: EmptyReason::NoEntities
        }
    );
    assert_eq!(
        serde_json::to_string(&result.into_graph()).unwrap(),
        r#"{"nodes":[],"edges":[]}"#
    );
}

#[tokio::test]
async fn prose_answer_is_malformed_not_an_error() {
    let completion = Arc::new(MockCompletion::answering(
        "I could not find any entities in this text.",
    ));
    let result = extractor(&completion).extract("Some text.").await.unwrap();
    assert!(matches!(
        result,
        GraphExtraction::Empty {
            reason: EmptyReason::Malformed(_)
        }
    ));
}

#[tokio::test]
async fn network_failure_is_retried_then_returned() {
    let completion = Arc::new(MockCompletion::scripted(vec![Err(AdapterError::network(
        "connection reset",
    ))]));
    let err = extractor(&completion).extract("Some text.").await.unwrap_err();
    assert_eq!(err, AdapterError::network("connection reset"));
    assert_eq!(completion.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn auth_failure_is_not_retried() {
    let completion = Arc::new(MockCompletion::scripted(vec![Err(AdapterError::Auth {
        detail: "invalid key".into(),
    })]));
    let err = extractor(&completion).extract("Some text.").await.unwrap_err();
    assert!(matches!(err, AdapterError::Auth { .. }));
    assert_eq!(completion.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_failure_then_success() {
    let completion = Arc::new(MockCompletion::scripted(vec![
        Err(AdapterError::network("timeout")),
        Ok(TRANSFORMER_GRAPH.to_string()),
    ]));
    let result = extractor(&completion).extract("Some text.").await.unwrap();
    assert!(!result.is_empty());
    assert_eq!(completion.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn blank_markdown_makes_no_call() {
    let completion = Arc::new(MockCompletion::answering(TRANSFORMER_GRAPH));
    let result = extractor(&completion).extract("  \n\n ").await.unwrap();
    assert_eq!(
        result,
        GraphExtraction::Empty {
            reason: EmptyReason::EmptyInput
        }
    );
    assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn long_documents_cost_at_most_max_chunks_calls() {
    let markdown: String = (0..5)
        .map(|i| format!("## Section {i}\n\n{}", "x".repeat(100)))
        .collect::<Vec<_>>()
        .join("\n\n");
    let completion = Arc::new(MockCompletion::answering(TRANSFORMER_GRAPH));
    let result = extractor(&completion)
        .with_options(GraphOptions {
            chunk_chars: 150,
            max_chunks: 2,
        })
        .extract(&markdown)
        .await
        .unwrap();

    assert_eq!(completion.calls.load(Ordering::SeqCst), 2);
    // Identical per-chunk graphs merge into one.
    assert_eq!(result.into_graph().nodes.len(), 2);
}

#[tokio::test]
async fn unnamed_nodes_from_different_chunks_stay_apart() {
    let markdown = "# Language\n\nBERT precedes GPT.\n\n# Vision\n\nResNet trained on ImageNet.";
    let completion = Arc::new(MockCompletion::scripted(vec![
        Ok(r#"{"nodes": [{"label": "BERT"}, {"label": "GPT"}],
               "edges": [{"source": "node_0", "target": "node_1", "label": "precedes"}]}"#
            .to_string()),
        Ok(r#"{"nodes": [{"label": "ResNet"}, {"label": "ImageNet"}],
               "edges": [{"source": "node_0", "target": "node_1", "label": "trained_on"}]}"#
            .to_string()),
    ]));
    let graph = extractor(&completion)
        .with_options(GraphOptions {
            chunk_chars: 40,
            max_chunks: 4,
        })
        .extract(markdown)
        .await
        .unwrap()
        .into_graph();

    assert_eq!(completion.calls.load(Ordering::SeqCst), 2);
    let labels: Vec<&str> = graph.nodes.iter().map(|n| n.label.as_str()).collect();
    assert_eq!(labels, ["BERT", "GPT", "ResNet", "ImageNet"]);

    let label_of = |id: &str| {
        graph
            .nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.label.clone())
            .unwrap()
    };
    let edges: Vec<String> = graph
        .edges
        .iter()
        .map(|e| format!("{}-{}->{}", label_of(&e.source), e.label, label_of(&e.target)))
        .collect();
    assert_eq!(edges, ["BERT-precedes->GPT", "ResNet-trained_on->ImageNet"]);
}

#[tokio::test]
async fn session_writes_extracted_graph() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::new(2);
    h.completion = Arc::new(MockCompletion::answering(TRANSFORMER_GRAPH));
    let config = PipelineConfig::builder()
        .export_dir(dir.path())
        .build()
        .unwrap();
    let session = h.session(config);
    session.process().await.unwrap();

    let graph = session.extract_graph().await.unwrap().into_graph();
    let path = session.write_graph(&graph).await.unwrap();
    assert_eq!(path, dir.path().join("paper_knowledge_graph.json"));

    let written: KnowledgeGraph =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(written, graph);
}

#[tokio::test]
async fn session_reports_failed_extraction() {
    let mut h = Harness::new(1);
    h.completion = Arc::new(MockCompletion::scripted(vec![Err(AdapterError::network(
        "unreachable",
    ))]));
    let session = h.session(test_config());
    session.process().await.unwrap();

    let err = session.extract_graph().await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Adapter {
            stage: "graph extraction",
            source: AdapterError::Network { .. },
        }
    ));
    // One attempt plus one retry.
    assert_eq!(h.completion.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn outline_graph_follows_exported_headings() {
    let h = Harness::new(2);
    let session = h.session(test_config());
    session.process().await.unwrap();

    let graph = session.outline_graph().await;
    let labels: Vec<&str> = graph.nodes.iter().map(|n| n.label.as_str()).collect();
    assert_eq!(labels, ["Section 1", "Section 2"]);
    assert!(graph.edges.is_empty());
    assert_eq!(h.completion.calls.load(Ordering::SeqCst), 0);
}
