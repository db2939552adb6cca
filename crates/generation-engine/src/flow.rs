//! Flow selection
//!
//! Picks one `FlowKind` from the classified ancestor set by fixed priority,
//! first match wins: tool, flux-kontext, i2i, t2i.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classify::{ClassifiedNode, KontextKind, Role, ToolKind};

/// Coarse category of a generation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowKind {
    Tool,
    FluxKontext,
    I2i,
    T2i,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Tool => "tool",
            FlowKind::FluxKontext => "flux-kontext",
            FlowKind::I2i => "i2i",
            FlowKind::T2i => "t2i",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Select the flow for an ancestor set.
pub fn select_flow(ancestors: &[ClassifiedNode]) -> FlowKind {
    if first_tool(ancestors).is_some() {
        FlowKind::Tool
    } else if first_kontext(ancestors).is_some() {
        FlowKind::FluxKontext
    } else if ancestors.iter().any(|a| a.role == Role::ImageToImage) {
        FlowKind::I2i
    } else {
        FlowKind::T2i
    }
}

/// First tool node in traversal order
pub fn first_tool(ancestors: &[ClassifiedNode]) -> Option<(&ClassifiedNode, ToolKind)> {
    ancestors.iter().find_map(|a| match a.role {
        Role::Tool(kind) => Some((a, kind)),
        _ => None,
    })
}

/// First kontext node in traversal order
pub fn first_kontext(ancestors: &[ClassifiedNode]) -> Option<(&ClassifiedNode, KontextKind)> {
    ancestors.iter().find_map(|a| match a.role {
        Role::Kontext(kind) => Some((a, kind)),
        _ => None,
    })
}
