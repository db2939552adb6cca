//! Request compilation
//!
//! Turns the ancestor set of an output node into a `CompileResult`: zero or
//! more control-net preprocessing steps plus exactly one main call. The
//! result is recomputed on every call and never persisted, except as the
//! request snapshot of a generation record.
//!
//! Compilation is pure. Missing images, missing tags and unsupported
//! subtypes are reported as `CompilationError` before anything touches the
//! network.

mod kontext;
mod text;
mod tool;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::classify::{ClassifiedNode, ControlType, Polarity, Role};
use crate::config::EngineConfig;
use crate::error::CompilationError;
use crate::flow::{select_flow, FlowKind};
use crate::types::{attrs, GraphEdge, GraphNode, NodeId};
use crate::upstream::resolve_upstream;

/// Parameter bag sent with a remote call
pub type Params = Map<String, Value>;

/// Parameter keys of compiled requests
pub mod keys {
    pub const MODEL: &str = "model";
    pub const LORAS: &str = "loras";
    pub const POSITIVE_PROMPT: &str = "positivePrompt";
    pub const NEGATIVE_PROMPT: &str = "negativePrompt";
    pub const CONTROLNET: &str = "controlnet";
    pub const IMAGE: &str = "image";
    pub const STRENGTH: &str = "strength";
    pub const MASK: &str = "mask";
    pub const PROMPT: &str = "prompt";
    pub const SCALE: &str = "scale";
    pub const UPSCALE_MODEL: &str = "upscaleModel";
    pub const FACE_ENHANCE: &str = "faceEnhance";
    pub const SCENE_IMAGE: &str = "sceneImage";
    pub const OBJECT_IMAGE: &str = "objectImage";
    pub const ANGLE: &str = "angle";
    pub const DIRECTION: &str = "direction";
    pub const IP_ADAPTERS: &str = "ipAdapters";
}

/// Remote method invoked by the main step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MainMethod {
    #[serde(rename = "txt2img")]
    Txt2Img,
    #[serde(rename = "img2img")]
    Img2Img,
    Upscale,
    RemoveBackground,
    Inpaint,
    Outpaint,
    /// Reference-style transform (reference, reangle)
    StyleTransfer,
    /// Multi-image recombination (rescene, remix)
    Recombine,
}

impl MainMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MainMethod::Txt2Img => "txt2img",
            MainMethod::Img2Img => "img2img",
            MainMethod::Upscale => "upscale",
            MainMethod::RemoveBackground => "removeBackground",
            MainMethod::Inpaint => "inpaint",
            MainMethod::Outpaint => "outpaint",
            MainMethod::StyleTransfer => "styleTransfer",
            MainMethod::Recombine => "recombine",
        }
    }
}

/// One control-net conditioning input of a t2i request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlNetEntry {
    /// Guide image URL
    pub image: String,
    pub strength: f64,
    pub model: String,
    #[serde(rename = "type")]
    pub control_type: String,
}

/// A control-net that needs its guide image produced remotely first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessStep {
    pub node_id: NodeId,
    pub control_type: ControlType,
    /// Uploaded source image identifier
    pub source_image: String,
    /// Remote preprocessor to invoke
    pub preprocessor: String,
    /// Strength of the resulting control-net entry
    pub strength: f64,
    /// Model id of the resulting control-net entry
    pub model: String,
}

impl PreprocessStep {
    /// Control-net entry to add to the main step once the guide exists
    pub fn into_entry(self, guide_url: impl Into<String>) -> ControlNetEntry {
        ControlNetEntry {
            image: guide_url.into(),
            strength: self.strength,
            model: self.model,
            control_type: self.control_type.as_str().to_string(),
        }
    }
}

/// The single main call of a compiled request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainStep {
    pub method: MainMethod,
    pub params: Params,
}

impl MainStep {
    pub fn new(method: MainMethod, params: Params) -> Self {
        Self { method, params }
    }

    /// Append a control-net entry, creating the list if needed
    pub fn add_controlnet(&mut self, entry: ControlNetEntry) {
        let entry = json!(entry);
        match self.params.get_mut(keys::CONTROLNET) {
            Some(Value::Array(entries)) => entries.push(entry),
            _ => {
                self.params
                    .insert(keys::CONTROLNET.to_string(), Value::Array(vec![entry]));
            }
        }
    }
}

/// Output of compiling a graph for one output node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    pub flow: FlowKind,
    pub preprocess: Vec<PreprocessStep>,
    pub main: MainStep,
}

/// Engine-attached or standalone LoRA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraDescriptor {
    pub id: String,
    pub weight: f64,
}

/// Compile the request for `target`.
pub fn compile(
    target: &str,
    nodes: &[GraphNode],
    edges: &[GraphEdge],
    config: &EngineConfig,
) -> Result<CompileResult, CompilationError> {
    let ancestors: Vec<ClassifiedNode> = resolve_upstream(target, nodes, edges)
        .into_iter()
        .map(ClassifiedNode::new)
        .collect();
    if ancestors.is_empty() {
        return Err(CompilationError::UnknownNode(target.to_string()));
    }
    log::trace!(
        "Ancestors of '{}': {}",
        target,
        ancestors
            .iter()
            .map(|a| format!("{}={}", a.node.id, a.role.name()))
            .collect::<Vec<_>>()
            .join(", ")
    );

    if let Some((node_id, subtype)) = ancestors.iter().find_map(|a| match &a.role {
        Role::Unsupported(subtype) => Some((a.node.id.clone(), subtype.clone())),
        _ => None,
    }) {
        return Err(CompilationError::UnsupportedSubtype { node_id, subtype });
    }

    let ctx = CompileContext {
        target,
        ancestors: &ancestors,
        config,
    };
    let flow = select_flow(&ancestors);

    let result = match flow {
        FlowKind::Tool => tool::compile(&ctx)?,
        FlowKind::FluxKontext => kontext::compile(&ctx)?,
        FlowKind::I2i => text::compile_i2i(&ctx)?,
        FlowKind::T2i => text::compile_t2i(&ctx)?,
    };

    log::debug!(
        "Compiled '{}' as {} -> {} ({} preprocess steps)",
        target,
        result.flow,
        result.main.method.as_str(),
        result.preprocess.len()
    );
    Ok(result)
}

/// Shared view over the classified ancestors of one target
pub(crate) struct CompileContext<'a> {
    pub target: &'a str,
    pub ancestors: &'a [ClassifiedNode],
    pub config: &'a EngineConfig,
}

impl<'a> CompileContext<'a> {
    pub fn with_role<F>(&self, pred: F) -> impl Iterator<Item = &'a ClassifiedNode> + '_
    where
        F: Fn(&Role) -> bool + 'a,
    {
        self.ancestors.iter().filter(move |a| pred(&a.role))
    }

    /// First engine's model, else the configured default
    pub fn model(&self) -> String {
        self.with_role(|r| *r == Role::Engine)
            .next()
            .and_then(|engine| engine.node.str_attr(attrs::MODEL))
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_model.clone())
    }

    /// Engine-attached LoRAs (engines in traversal order), then standalone
    /// LoRA nodes ordered by node id
    pub fn loras(&self) -> Vec<LoraDescriptor> {
        let mut loras: Vec<LoraDescriptor> = self
            .with_role(|r| *r == Role::Engine)
            .filter_map(|engine| engine.node.attr(attrs::LORAS).and_then(Value::as_array))
            .flatten()
            .filter_map(|entry| self.lora_from_value(entry))
            .collect();

        let mut standalone: Vec<&ClassifiedNode> = self.with_role(|r| *r == Role::Lora).collect();
        standalone.sort_by(|a, b| a.node.id.cmp(&b.node.id));
        loras.extend(standalone.into_iter().filter_map(|lora| {
            let node = &lora.node;
            let id = node
                .str_attr(attrs::LORA)
                .or_else(|| node.str_attr(attrs::MODEL))?;
            Some(LoraDescriptor {
                id: id.to_string(),
                weight: node
                    .f64_attr(attrs::WEIGHT)
                    .or_else(|| node.f64_attr(attrs::STRENGTH))
                    .unwrap_or(self.config.default_lora_weight),
            })
        }));
        loras
    }

    fn lora_from_value(&self, entry: &Value) -> Option<LoraDescriptor> {
        match entry {
            Value::String(id) if !id.trim().is_empty() => Some(LoraDescriptor {
                id: id.clone(),
                weight: self.config.default_lora_weight,
            }),
            Value::Object(obj) => {
                let id = ["id", "name", "url"]
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str))
                    .filter(|s| !s.trim().is_empty())?;
                let weight = ["weight", "scale", "strength"]
                    .iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_f64))
                    .unwrap_or(self.config.default_lora_weight);
                Some(LoraDescriptor {
                    id: id.to_string(),
                    weight,
                })
            }
            _ => None,
        }
    }

    /// Prompt texts of one polarity joined by a blank line
    pub fn prompt(&self, polarity: Polarity) -> Option<String> {
        let texts: Vec<&str> = self
            .with_role(move |r| *r == Role::Prompt(polarity))
            .filter_map(|p| p.node.str_attr(attrs::TEXT))
            .map(str::trim)
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n\n"))
        }
    }

    /// Insert model, LoRAs and prompts shared by the generative flows
    pub fn generative_params(&self) -> Params {
        let mut params = Params::new();
        params.insert(keys::MODEL.to_string(), json!(self.model()));

        let loras = self.loras();
        if !loras.is_empty() {
            params.insert(keys::LORAS.to_string(), json!(loras));
        }
        self.insert_prompts(&mut params);
        params
    }

    /// Insert positive and negative prompts.
    ///
    /// A negative prompt shorter than the configured minimum is left out
    /// entirely; the remote service rejects near-empty negatives.
    pub fn insert_prompts(&self, params: &mut Params) {
        if let Some(positive) = self.prompt(Polarity::Positive) {
            params.insert(keys::POSITIVE_PROMPT.to_string(), json!(positive));
        }
        if let Some(negative) = self.prompt(Polarity::Negative) {
            if negative.trim().chars().count() >= self.config.min_negative_prompt_len {
                params.insert(keys::NEGATIVE_PROMPT.to_string(), json!(negative));
            }
        }
    }

    /// Nodes allowed to supply a base image, in traversal order.
    ///
    /// The target itself is skipped (it holds the previous output), as are
    /// nodes whose images mean something else: control-net sources and the
    /// seed image among them.
    pub fn image_candidates(&self) -> impl Iterator<Item = &'a ClassifiedNode> + '_ {
        self.ancestors.iter().filter(move |a| {
            a.node.id != self.target
                && matches!(
                    a.role,
                    Role::ImageSource
                        | Role::PassThrough
                        | Role::Output
                        | Role::ImageToImage
                        | Role::Tool(_)
                        | Role::Kontext(_)
                )
        })
    }

    /// First resolvable base image
    pub fn base_image(&self) -> Option<String> {
        self.image_candidates().find_map(|a| image_ref(&a.node))
    }
}

/// Remote reference of a node's image: canonical URL, else identifier.
///
/// Local data (base64 or data URLs) is not a reference; it has to be
/// uploaded first.
pub fn image_ref(node: &GraphNode) -> Option<String> {
    remote_ref(node, attrs::IMAGE_URL, attrs::IMAGE_ID)
}

/// Remote reference of a node's mask
pub fn mask_ref(node: &GraphNode) -> Option<String> {
    remote_ref(node, attrs::MASK_URL, attrs::MASK_ID)
}

fn remote_ref(node: &GraphNode, url_key: &str, id_key: &str) -> Option<String> {
    node.str_attr(url_key)
        .filter(|url| !url.starts_with("data:"))
        .or_else(|| node.str_attr(id_key))
        .map(str::to_string)
}
