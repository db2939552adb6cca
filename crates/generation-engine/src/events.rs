//! Event types for streaming generation progress
//!
//! Events are sent from the orchestrator to the host (or any consumer)
//! to report progress, results and failures of an execution.

use serde::{Deserialize, Serialize};

use crate::flow::FlowKind;

/// Trait for sending generation events
///
/// This abstracts over the transport mechanism (UI channel, mpsc, etc.)
/// allowing the engine to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: GenerationEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone, thiserror::Error)]
#[error("Event error: {message}")]
pub struct EventError {
    pub message: String,
}

/// Events emitted during one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GenerationEvent {
    /// Execution was triggered for an output node
    #[serde(rename_all = "camelCase")]
    ExecutionStarted {
        workflow_id: String,
        output_node_id: String,
    },

    /// All pending local images were uploaded
    #[serde(rename_all = "camelCase")]
    UploadsCompleted {
        output_node_id: String,
        uploaded: usize,
    },

    /// The graph compiled and a record was created
    #[serde(rename_all = "camelCase")]
    GenerationStarted {
        generation_id: String,
        output_node_id: String,
        flow: FlowKind,
        method: String,
    },

    /// A control-net guide image was produced
    #[serde(rename_all = "camelCase")]
    PreprocessCompleted {
        generation_id: String,
        node_id: String,
        guide_url: String,
    },

    /// The main call succeeded
    #[serde(rename_all = "camelCase")]
    GenerationSucceeded {
        generation_id: String,
        output_node_id: String,
        image_url: String,
    },

    /// The execution failed; `generation_id` is absent when no record exists
    #[serde(rename_all = "camelCase")]
    GenerationFailed {
        generation_id: Option<String>,
        output_node_id: String,
        error: String,
    },
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: GenerationEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<GenerationEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<GenerationEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: GenerationEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}
