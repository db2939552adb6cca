//! Execution of one generation attempt.
//!
//! `GenerationExecutor` runs the cycle for an output node in a fixed order:
//! upload local images, compile, create a record, run control-net
//! preprocessing one step at a time, then dispatch the main call. Results
//! and failures are written back onto the graph and the record, and every
//! failure is returned to the caller exactly once.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::assets::resolve_assets;
use crate::compiler::{compile, CompileResult};
use crate::config::{EngineConfig, OverlapPolicy};
use crate::error::{EngineError, Result};
use crate::events::{EventSink, GenerationEvent};
use crate::flow::FlowKind;
use crate::graph::GraphHost;
use crate::service::{dispatch, GenerationOutput, GenerationService};
use crate::store::{GenerationRecord, GenerationStore};
use crate::types::{attrs, NodeId};
use crate::upstream::resolve_upstream;

/// Executor for generation attempts.
pub struct GenerationExecutor {
    /// Remote generation service.
    service: Arc<dyn GenerationService>,
    /// Record store shared with the host.
    store: Arc<GenerationStore>,
    config: EngineConfig,
    /// Output nodes with an execution in progress (tracked only under `Reject`).
    in_flight: Mutex<HashSet<NodeId>>,
}

/// Removes its output node from the in-flight set when dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<NodeId>>,
    output_node_id: NodeId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.output_node_id);
    }
}

impl GenerationExecutor {
    /// Create an executor with the default configuration.
    pub fn new(service: Arc<dyn GenerationService>, store: Arc<GenerationStore>) -> Self {
        Self::with_config(service, store, EngineConfig::default())
    }

    pub fn with_config(
        service: Arc<dyn GenerationService>,
        store: Arc<GenerationStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            service,
            store,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<GenerationStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile the request for an output node without executing it.
    pub fn compile(&self, graph: &dyn GraphHost, output_node_id: &str) -> Result<CompileResult> {
        let nodes = graph.nodes();
        let edges = graph.edges();
        Ok(compile(output_node_id, &nodes, &edges, &self.config)?)
    }

    /// Run one generation attempt for `output_node_id`.
    ///
    /// Returns the succeeded record. Upload and compilation failures happen
    /// before a record exists; later failures leave a failed record behind.
    pub async fn execute(
        &self,
        graph: &dyn GraphHost,
        output_node_id: &str,
        event_sink: &dyn EventSink,
    ) -> Result<GenerationRecord> {
        let _guard = self.enter(output_node_id)?;
        let workflow_id = graph.workflow_id();

        log::info!(
            "Executing output node '{}' of workflow '{}'",
            output_node_id,
            workflow_id
        );
        self.emit(
            event_sink,
            GenerationEvent::ExecutionStarted {
                workflow_id: workflow_id.clone(),
                output_node_id: output_node_id.to_string(),
            },
        );

        let compiled = match self.prepare(graph, output_node_id, event_sink).await {
            Ok(compiled) => compiled,
            Err(e) => return Err(self.fail(graph, None, output_node_id, e, event_sink)),
        };

        let request = match serde_json::to_value(&compiled) {
            Ok(request) => request,
            Err(e) => return Err(self.fail(graph, None, output_node_id, e.into(), event_sink)),
        };
        let record = self.store.create(workflow_id, output_node_id, request);
        if let Err(e) = self.store.mark_running(&record.id) {
            return Err(self.fail(graph, Some(&record.id), output_node_id, e.into(), event_sink));
        }
        self.emit_generation_started(event_sink, &record.id, output_node_id, compiled.flow, &compiled);

        match self.run(graph, &record.id, compiled, event_sink).await {
            Ok((response, output)) => {
                // The image exists remotely whatever the store says next
                self.write_output(graph, output_node_id, &record.id, &output);
                let record = match self.store.mark_succeeded(&record.id, response) {
                    Ok(record) => record,
                    Err(e) => {
                        return Err(self.fail(graph, Some(&record.id), output_node_id, e.into(), event_sink))
                    }
                };

                log::info!(
                    "Generation '{}' for '{}' succeeded: {}",
                    record.id,
                    output_node_id,
                    output.image_url
                );
                self.emit(
                    event_sink,
                    GenerationEvent::GenerationSucceeded {
                        generation_id: record.id.clone(),
                        output_node_id: output_node_id.to_string(),
                        image_url: output.image_url,
                    },
                );
                Ok(record)
            }
            Err(e) => Err(self.fail(graph, Some(&record.id), output_node_id, e, event_sink)),
        }
    }

    /// Apply the overlap policy.
    fn enter(&self, output_node_id: &str) -> Result<Option<InFlightGuard<'_>>> {
        if self.config.overlap_policy == OverlapPolicy::Allow {
            return Ok(None);
        }
        if !self.in_flight.lock().insert(output_node_id.to_string()) {
            log::warn!(
                "Rejecting trigger for '{}': an execution is already in flight",
                output_node_id
            );
            return Err(EngineError::AlreadyRunning {
                output_node_id: output_node_id.to_string(),
            });
        }
        Ok(Some(InFlightGuard {
            in_flight: &self.in_flight,
            output_node_id: output_node_id.to_string(),
        }))
    }

    /// Upload missing images of the ancestors, then compile against the
    /// updated graph.
    async fn prepare(
        &self,
        graph: &dyn GraphHost,
        output_node_id: &str,
        event_sink: &dyn EventSink,
    ) -> Result<CompileResult> {
        let ancestors = resolve_upstream(output_node_id, &graph.nodes(), &graph.edges());
        let uploaded = resolve_assets(graph, self.service.as_ref(), &ancestors).await?;
        if uploaded > 0 {
            self.emit(
                event_sink,
                GenerationEvent::UploadsCompleted {
                    output_node_id: output_node_id.to_string(),
                    uploaded,
                },
            );
        }
        self.compile(graph, output_node_id)
    }

    /// Preprocessing and the main call for an existing record.
    async fn run(
        &self,
        graph: &dyn GraphHost,
        generation_id: &str,
        compiled: CompileResult,
        event_sink: &dyn EventSink,
    ) -> Result<(Value, GenerationOutput)> {
        let CompileResult {
            preprocess, mut main, ..
        } = compiled;

        // Strictly sequential; the first failure skips everything after it.
        for step in preprocess {
            log::debug!(
                "Preprocessing node '{}' with {}",
                step.node_id,
                step.preprocessor
            );
            let guide_url = self
                .service
                .preprocess(&step.source_image, &step.preprocessor)
                .await
                .map_err(|source| EngineError::Preprocessing {
                    node_id: step.node_id.clone(),
                    source,
                })?;

            let mut patch = Map::new();
            patch.insert(attrs::GUIDE_URL.to_string(), json!(guide_url));
            graph.update_node_data(&step.node_id, patch);
            self.emit(
                event_sink,
                GenerationEvent::PreprocessCompleted {
                    generation_id: generation_id.to_string(),
                    node_id: step.node_id.clone(),
                    guide_url: guide_url.clone(),
                },
            );
            main.add_controlnet(step.into_entry(guide_url));
        }

        log::debug!("Dispatching {} for generation '{}'", main.method.as_str(), generation_id);
        let response = dispatch(self.service.as_ref(), &main).await?;
        let output = GenerationOutput::from_response(&response)?;
        Ok((response, output))
    }

    fn write_output(&self, graph: &dyn GraphHost, output_node_id: &str, generation_id: &str, output: &GenerationOutput) {
        let mut patch = Map::new();
        patch.insert(attrs::IMAGE_URL.to_string(), json!(output.image_url));
        patch.insert(attrs::IMAGE_ID.to_string(), json!(output.image_id));
        patch.insert(attrs::GENERATION_ID.to_string(), json!(generation_id));
        if let Some(seed) = output.seed {
            patch.insert(attrs::SEED.to_string(), json!(seed));
        }
        if let Some(prompt) = &output.prompt {
            patch.insert(attrs::PROMPT.to_string(), json!(prompt));
        }
        if let Some(nsfw) = output.nsfw {
            patch.insert(attrs::NSFW.to_string(), json!(nsfw));
        }
        // Clears the marker of a previous failed attempt
        patch.insert(attrs::ERROR.to_string(), Value::Null);
        graph.update_node_data(output_node_id, patch);
    }

    /// Record a failure everywhere it is visible and hand the error back.
    fn fail(
        &self,
        graph: &dyn GraphHost,
        generation_id: Option<&str>,
        output_node_id: &str,
        error: EngineError,
        event_sink: &dyn EventSink,
    ) -> EngineError {
        let message = error.to_string();
        log::warn!("Execution of '{}' failed: {}", output_node_id, message);

        if let Some(id) = generation_id {
            if let Err(store_err) = self.store.mark_failed(id, message.clone()) {
                log::warn!("Could not mark generation '{}' failed: {}", id, store_err);
            }
        }

        let mut patch = Map::new();
        patch.insert(attrs::ERROR.to_string(), json!(message));
        graph.update_node_data(output_node_id, patch);

        self.emit(
            event_sink,
            GenerationEvent::GenerationFailed {
                generation_id: generation_id.map(str::to_string),
                output_node_id: output_node_id.to_string(),
                error: message,
            },
        );
        error
    }

    fn emit_generation_started(
        &self,
        event_sink: &dyn EventSink,
        generation_id: &str,
        output_node_id: &str,
        flow: FlowKind,
        compiled: &CompileResult,
    ) {
        log::debug!(
            "Generation '{}' started ({} flow, {} preprocess steps)",
            generation_id,
            flow,
            compiled.preprocess.len()
        );
        self.emit(
            event_sink,
            GenerationEvent::GenerationStarted {
                generation_id: generation_id.to_string(),
                output_node_id: output_node_id.to_string(),
                flow,
                method: compiled.main.method.as_str().to_string(),
            },
        );
    }

    fn emit(&self, event_sink: &dyn EventSink, event: GenerationEvent) {
        let _ = event_sink.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Params;
    use crate::error::{ErrorKind, ServiceError};
    use crate::events::{NullEventSink, VecEventSink};
    use crate::graph::InMemoryGraph;
    use crate::service::UploadedImage;
    use crate::store::GenerationStatus;
    use crate::types::{GraphEdge, GraphNode, WorkflowGraph};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Answers every call; the main call optionally waits on a gate.
    #[derive(Default)]
    struct StubService {
        main_calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        response: Option<Value>,
    }

    impl StubService {
        async fn main(&self) -> std::result::Result<Value, ServiceError> {
            self.main_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(self.response.clone().unwrap_or_else(|| {
                json!({"imageUrl": "https://cdn/result.png", "imageId": "img-1", "seed": 7})
            }))
        }
    }

    #[async_trait]
    impl GenerationService for StubService {
        async fn text_to_image(&self, _: &Params) -> std::result::Result<Value, ServiceError> {
            self.main().await
        }
        async fn image_to_image(&self, _: &Params) -> std::result::Result<Value, ServiceError> {
            self.main().await
        }
        async fn upscale(&self, _: &Params) -> std::result::Result<Value, ServiceError> {
            self.main().await
        }
        async fn remove_background(&self, _: &Params) -> std::result::Result<Value, ServiceError> {
            self.main().await
        }
        async fn inpaint(&self, _: &Params) -> std::result::Result<Value, ServiceError> {
            self.main().await
        }
        async fn outpaint(&self, _: &Params) -> std::result::Result<Value, ServiceError> {
            self.main().await
        }
        async fn style_transfer(&self, _: &Params) -> std::result::Result<Value, ServiceError> {
            self.main().await
        }
        async fn recombine(&self, _: &Params) -> std::result::Result<Value, ServiceError> {
            self.main().await
        }
        async fn preprocess(&self, _: &str, preprocessor: &str) -> std::result::Result<String, ServiceError> {
            Ok(format!("https://cdn/guide-{}.png", preprocessor))
        }
        async fn upload_image(&self, data: &str) -> std::result::Result<UploadedImage, ServiceError> {
            Ok(UploadedImage {
                id: format!("id-{}", data),
                url: format!("https://cdn/{}.png", data),
            })
        }
    }

    fn prompt_graph() -> InMemoryGraph {
        let mut graph = WorkflowGraph::new("wf", "Test");
        graph.nodes = vec![
            GraphNode::with_data("p", "prompt", json!({"text": "a red apple"})),
            GraphNode::with_data("e", "engine", json!({"model": "demo-model"})),
            GraphNode::new("out", "output"),
        ];
        graph.edges = vec![GraphEdge::new("e1", "p", "e"), GraphEdge::new("e2", "e", "out")];
        InMemoryGraph::new(graph)
    }

    fn executor(service: StubService, policy: OverlapPolicy) -> GenerationExecutor {
        GenerationExecutor::with_config(
            Arc::new(service),
            Arc::new(GenerationStore::new()),
            EngineConfig::default().with_overlap_policy(policy),
        )
    }

    #[tokio::test]
    async fn test_success_writes_output_and_events() {
        let graph = prompt_graph();
        graph.update_node_data("out", {
            let mut m = Map::new();
            m.insert("error".to_string(), json!("old failure"));
            m
        });
        let executor = executor(StubService::default(), OverlapPolicy::Allow);
        let sink = VecEventSink::new();

        let record = executor.execute(&graph, "out", &sink).await.unwrap();
        assert_eq!(record.status, GenerationStatus::Succeeded);
        assert_eq!(record.request["main"]["method"], "txt2img");

        let out = graph.node("out").unwrap();
        assert_eq!(out.str_attr("imageUrl"), Some("https://cdn/result.png"));
        assert_eq!(out.str_attr("imageId"), Some("img-1"));
        assert_eq!(out.str_attr("generationId"), Some(record.id.as_str()));
        assert_eq!(out.data["seed"], 7);
        assert!(out.attr("error").is_none());

        let events = sink.events();
        assert!(matches!(events.first(), Some(GenerationEvent::ExecutionStarted { .. })));
        assert!(matches!(events.last(), Some(GenerationEvent::GenerationSucceeded { .. })));
    }

    #[tokio::test]
    async fn test_error_payload_fails_record() {
        let service = StubService {
            response: Some(json!({"error": "content policy"})),
            ..Default::default()
        };
        let graph = prompt_graph();
        let executor = executor(service, OverlapPolicy::Allow);

        let err = executor.execute(&graph, "out", &NullEventSink).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generation);

        let record = executor.store().latest_for_output("out").unwrap();
        assert_eq!(record.status, GenerationStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Generation failed: content policy"));
        assert_eq!(
            graph.node("out").unwrap().str_attr("error"),
            Some("Generation failed: content policy")
        );
    }

    #[tokio::test]
    async fn test_compilation_error_creates_no_record() {
        let mut graph = WorkflowGraph::new("wf", "Test");
        graph.nodes = vec![GraphNode::new("i2i", "image-to-image"), GraphNode::new("out", "output")];
        graph.edges = vec![GraphEdge::new("e1", "i2i", "out")];
        let graph = InMemoryGraph::new(graph);
        let executor = executor(StubService::default(), OverlapPolicy::Allow);
        let sink = VecEventSink::new();

        let err = executor.execute(&graph, "out", &sink).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compilation);
        assert!(executor.store().is_empty());
        assert!(graph.node("out").unwrap().str_attr("error").is_some());
        assert!(sink.events().iter().any(|e| matches!(
            e,
            GenerationEvent::GenerationFailed { generation_id: None, .. }
        )));
    }

    #[tokio::test]
    async fn test_reject_overlapping_trigger() {
        let gate = Arc::new(Notify::new());
        let service = StubService {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let graph = prompt_graph();
        let executor = executor(service, OverlapPolicy::Reject);

        let (first, second) = tokio::join!(executor.execute(&graph, "out", &NullEventSink), async {
            let result = executor.execute(&graph, "out", &NullEventSink).await;
            gate.notify_one();
            result
        });

        assert!(first.is_ok());
        let err = second.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(executor.store().len(), 1);

        // The guard is released once the first execution finishes
        gate.notify_one();
        assert!(executor.execute(&graph, "out", &NullEventSink).await.is_ok());
    }

    #[tokio::test]
    async fn test_allow_overlapping_trigger() {
        let gate = Arc::new(Notify::new());
        let service = StubService {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let graph = prompt_graph();
        let executor = executor(service, OverlapPolicy::Allow);

        let (first, second) = tokio::join!(executor.execute(&graph, "out", &NullEventSink), async {
            tokio::task::yield_now().await;
            gate.notify_one();
            gate.notify_one();
            executor.execute(&graph, "out", &NullEventSink).await
        });

        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(executor.store().len(), 2);
        assert_eq!(executor.store().latest_for_output("out").unwrap().id, second.id);
        assert_ne!(first.id, second.id);
    }
}
