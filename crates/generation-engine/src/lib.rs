//! Generation Engine - compiles node graphs into image-generation calls
//!
//! This crate turns a visual workflow (engine, prompt, control-net, LoRA,
//! tool, image-source and output nodes) into an ordered sequence of calls
//! against a remote image-generation service, then writes results and
//! failures back into the graph. It supports:
//!
//! - Cycle-safe upstream resolution of an output node's ancestors
//! - One-pass classification of nodes into functional roles
//! - Priority-based flow selection (tool > kontext > i2i > t2i)
//! - Concurrent upload of locally held images with per-image write-back
//! - Sequential control-net preprocessing before the main call
//! - Per-attempt generation records with a latest-per-output index
//!
//! # Architecture
//!
//! The engine owns no graph and no network code. Both are collaborators:
//!
//! - `GraphHost`: read nodes/edges, merge result fields into node data
//! - `GenerationService`: one async call per remote method
//! - `EventSink`: progress events for whatever drives the UI
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use generation_engine::{GenerationExecutor, GenerationStore, NullEventSink};
//!
//! let executor = GenerationExecutor::new(service, Arc::new(GenerationStore::new()));
//! let record = executor.execute(&graph, "output-1", &NullEventSink).await?;
//! ```

pub mod assets;
pub mod classify;
pub mod compiler;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod executor;
pub mod flow;
pub mod graph;
pub mod service;
pub mod store;
pub mod types;
pub mod upstream;

// Re-export key types
pub use classify::{ClassifiedNode, Role};
pub use compiler::{compile, CompileResult, MainMethod, MainStep, Params, PreprocessStep};
pub use config::{EngineConfig, OverlapPolicy};
pub use error::{CompilationError, EngineError, ErrorKind, Result, ServiceError, StoreError};
pub use events::{EventSink, GenerationEvent, NullEventSink, VecEventSink};
pub use executor::GenerationExecutor;
pub use flow::FlowKind;
pub use graph::{GraphHost, InMemoryGraph};
pub use service::{GenerationOutput, GenerationService, UploadedImage};
pub use store::{GenerationRecord, GenerationStatus, GenerationStore};
pub use types::{GraphEdge, GraphNode, NodeId, WorkflowGraph};
pub use upstream::resolve_upstream;
