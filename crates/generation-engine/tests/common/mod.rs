#![allow(dead_code)]

use std::collections::HashSet;

use async_trait::async_trait;
use generation_engine::{
    GenerationService, GraphEdge, GraphNode, InMemoryGraph, Params, ServiceError, UploadedImage,
    WorkflowGraph,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

pub const GENERATED_URL: &str = "https://cdn.example/generated.png";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records every call in order and fails the methods it was told to fail.
#[derive(Default)]
pub struct MockService {
    calls: Mutex<Vec<String>>,
    main_params: Mutex<Vec<Params>>,
    failing: HashSet<&'static str>,
    /// Runs inside every main-step call before it answers
    main_hook: Option<Box<dyn Fn() + Send + Sync>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Method names: txt2img, img2img, upscale, removeBackground, inpaint,
    /// outpaint, styleTransfer, recombine, preprocess, upload
    pub fn failing(methods: &[&'static str]) -> Self {
        Self {
            failing: methods.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn with_main_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.main_hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == method).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Main-step calls (everything except preprocess and upload)
    pub fn main_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| *c != "preprocess" && *c != "upload")
            .count()
    }

    pub fn last_main_params(&self) -> Option<Params> {
        self.main_params.lock().last().cloned()
    }

    fn record(&self, method: &'static str) -> Result<(), ServiceError> {
        self.calls.lock().push(method.to_string());
        if self.failing.contains(method) {
            return Err(ServiceError::Remote(format!("{} unavailable", method)));
        }
        Ok(())
    }

    fn main(&self, method: &'static str, params: &Params) -> Result<Value, ServiceError> {
        self.main_params.lock().push(params.clone());
        self.record(method)?;
        if let Some(hook) = &self.main_hook {
            hook();
        }
        Ok(json!({
            "imageUrl": GENERATED_URL,
            "imageId": "gen-1",
            "seed": 11,
        }))
    }
}

#[async_trait]
impl GenerationService for MockService {
    async fn text_to_image(&self, params: &Params) -> Result<Value, ServiceError> {
        self.main("txt2img", params)
    }

    async fn image_to_image(&self, params: &Params) -> Result<Value, ServiceError> {
        self.main("img2img", params)
    }

    async fn upscale(&self, params: &Params) -> Result<Value, ServiceError> {
        self.main("upscale", params)
    }

    async fn remove_background(&self, params: &Params) -> Result<Value, ServiceError> {
        self.main("removeBackground", params)
    }

    async fn inpaint(&self, params: &Params) -> Result<Value, ServiceError> {
        self.main("inpaint", params)
    }

    async fn outpaint(&self, params: &Params) -> Result<Value, ServiceError> {
        self.main("outpaint", params)
    }

    async fn style_transfer(&self, params: &Params) -> Result<Value, ServiceError> {
        self.main("styleTransfer", params)
    }

    async fn recombine(&self, params: &Params) -> Result<Value, ServiceError> {
        self.main("recombine", params)
    }

    async fn preprocess(&self, _source_image: &str, preprocessor: &str) -> Result<String, ServiceError> {
        self.record("preprocess")?;
        Ok(format!("https://cdn.example/guides/{}.png", preprocessor))
    }

    async fn upload_image(&self, data: &str) -> Result<UploadedImage, ServiceError> {
        self.record("upload")?;
        Ok(UploadedImage {
            id: format!("img-{}", data),
            url: format!("https://cdn.example/uploads/{}.png", data),
        })
    }
}

pub fn host(workflow_id: &str, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> InMemoryGraph {
    let mut graph = WorkflowGraph::new(workflow_id, "Test workflow");
    graph.nodes = nodes;
    graph.edges = edges;
    InMemoryGraph::new(graph)
}

pub fn edge(source: &str, target: &str) -> GraphEdge {
    GraphEdge::new(format!("{}->{}", source, target), source, target)
}

/// prompt "a red apple" -> engine "demo-model" -> output
pub fn minimal_graph() -> (Vec<GraphNode>, Vec<GraphEdge>) {
    (
        vec![
            GraphNode::with_data("prompt", "prompt", json!({"text": "a red apple"})),
            GraphNode::with_data("engine", "engine", json!({"model": "demo-model"})),
            GraphNode::new("out", "output"),
        ],
        vec![edge("prompt", "engine"), edge("engine", "out")],
    )
}
