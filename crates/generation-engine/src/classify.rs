//! Node classification
//!
//! Every node is mapped to exactly one `Role` here, once. Downstream
//! components switch on the role and never look at the raw type string.
//!
//! Resolution order:
//! 1. an explicit `role` attribute (with optional `subtype`)
//! 2. the namespaced `node_type`, split on `-` and matched against known
//!    prefixes, longest first ("control-net-pose" is control-net/pose)
//!
//! Anything unmatched is `PassThrough`.

use serde::{Deserialize, Serialize};

use crate::types::{attrs, GraphNode};

/// Delimiter between a type prefix and its subtype
pub const TYPE_DELIMITER: char = '-';

/// Polarity of a prompt node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
}

/// Conditioning type of a control-net node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    Pose,
    Depth,
    Canny,
    Lineart,
    Scribble,
    Segmentation,
    /// Seed image for t2i, not a conditioning input
    Lights,
    Other(String),
}

impl ControlType {
    pub fn parse(subtype: &str) -> Self {
        match subtype {
            "pose" | "openpose" => Self::Pose,
            "depth" => Self::Depth,
            "canny" | "edge" | "edges" => Self::Canny,
            "lineart" | "line-art" => Self::Lineart,
            "scribble" | "sketch" => Self::Scribble,
            "segmentation" | "segment" | "seg" => Self::Segmentation,
            "lights" | "light" => Self::Lights,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pose => "pose",
            Self::Depth => "depth",
            Self::Canny => "canny",
            Self::Lineart => "lineart",
            Self::Scribble => "scribble",
            Self::Segmentation => "segmentation",
            Self::Lights => "lights",
            Self::Other(name) => name,
        }
    }
}

/// Single-input single-output tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    Upscale,
    RemoveBackground,
    Inpaint,
    Outpaint,
}

impl ToolKind {
    pub fn parse(subtype: &str) -> Option<Self> {
        match subtype {
            "upscale" => Some(Self::Upscale),
            "remove-background" | "remove-bg" => Some(Self::RemoveBackground),
            "inpaint" => Some(Self::Inpaint),
            "outpaint" => Some(Self::Outpaint),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upscale => "upscale",
            Self::RemoveBackground => "remove-background",
            Self::Inpaint => "inpaint",
            Self::Outpaint => "outpaint",
        }
    }
}

/// Multi-image "kontext" transforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KontextKind {
    Reference,
    Rescene,
    Reangle,
    Remix,
}

impl KontextKind {
    pub fn parse(subtype: &str) -> Option<Self> {
        match subtype {
            "reference" => Some(Self::Reference),
            "rescene" => Some(Self::Rescene),
            "reangle" => Some(Self::Reangle),
            "remix" => Some(Self::Remix),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Rescene => "rescene",
            Self::Reangle => "reangle",
            Self::Remix => "remix",
        }
    }
}

/// Functional role of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "subtype", rename_all = "snake_case")]
pub enum Role {
    Engine,
    Lora,
    Prompt(Polarity),
    ControlNet(ControlType),
    Tool(ToolKind),
    Kontext(KontextKind),
    /// Plain image-to-image
    ImageToImage,
    ImageSource,
    Output,
    /// A known family with a subtype the compiler cannot handle
    Unsupported(String),
    PassThrough,
}

impl Role {
    /// Short name for logs and events
    pub fn name(&self) -> &'static str {
        match self {
            Role::Engine => "engine",
            Role::Lora => "lora",
            Role::Prompt(_) => "prompt",
            Role::ControlNet(_) => "control-net",
            Role::Tool(_) => "tool",
            Role::Kontext(_) => "kontext",
            Role::ImageToImage => "image-to-image",
            Role::ImageSource => "image-source",
            Role::Output => "output",
            Role::Unsupported(_) => "unsupported",
            Role::PassThrough => "pass-through",
        }
    }
}

/// A node paired with its resolved role
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedNode {
    pub node: GraphNode,
    pub role: Role,
}

impl ClassifiedNode {
    pub fn new(node: GraphNode) -> Self {
        let role = role(&node);
        Self { node, role }
    }

    pub fn id(&self) -> &str {
        &self.node.id
    }
}

/// Family prefixes, longest first so "image-to-image" wins over "image"
const PREFIXES: &[(&str, Family)] = &[
    ("image-to-image", Family::ImageToImage),
    ("image-source", Family::ImageSource),
    ("control-net", Family::ControlNet),
    ("controlnet", Family::ControlNet),
    ("kontext", Family::Kontext),
    ("engine", Family::Engine),
    ("output", Family::Output),
    ("prompt", Family::Prompt),
    ("upload", Family::ImageSource),
    ("image", Family::ImageSource),
    ("model", Family::Engine),
    ("lora", Family::Lora),
    ("tool", Family::Tool),
    ("i2i", Family::ImageToImage),
];

#[derive(Debug, Clone, Copy)]
enum Family {
    Engine,
    Lora,
    Prompt,
    ControlNet,
    Tool,
    Kontext,
    ImageToImage,
    ImageSource,
    Output,
}

/// Resolve the role of a node.
pub fn role(node: &GraphNode) -> Role {
    let type_string = match node.str_attr(attrs::ROLE) {
        Some(explicit) => match node.str_attr(attrs::SUBTYPE) {
            Some(subtype) => format!("{}{}{}", explicit, TYPE_DELIMITER, subtype),
            None => explicit.to_string(),
        },
        None => node.node_type.clone(),
    };

    parse_type(&type_string.trim().to_ascii_lowercase(), node)
}

fn split_prefix(type_string: &str) -> Option<(Family, &str)> {
    PREFIXES.iter().find_map(|(prefix, family)| {
        if type_string == *prefix {
            return Some((*family, ""));
        }
        type_string
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(TYPE_DELIMITER))
            .map(|subtype| (*family, subtype))
    })
}

fn parse_type(type_string: &str, node: &GraphNode) -> Role {
    let Some((family, subtype)) = split_prefix(type_string) else {
        return Role::PassThrough;
    };

    match family {
        Family::Engine => Role::Engine,
        Family::Lora => Role::Lora,
        Family::Output => Role::Output,
        Family::ImageSource => Role::ImageSource,
        Family::Prompt => {
            let polarity_attr = node
                .str_attr(attrs::POLARITY)
                .map(|p| p.trim().to_ascii_lowercase());
            let negative = match polarity_attr.as_deref() {
                Some(p) => p == "negative",
                None => subtype == "negative",
            };
            if negative {
                Role::Prompt(Polarity::Negative)
            } else {
                Role::Prompt(Polarity::Positive)
            }
        }
        Family::ControlNet => Role::ControlNet(ControlType::parse(subtype)),
        Family::Tool => match ToolKind::parse(subtype) {
            Some(kind) => Role::Tool(kind),
            None => Role::Unsupported(type_string.to_string()),
        },
        Family::Kontext => match KontextKind::parse(subtype) {
            Some(kind) => Role::Kontext(kind),
            None => Role::Unsupported(type_string.to_string()),
        },
        Family::ImageToImage => {
            if subtype.is_empty() {
                Role::ImageToImage
            } else if let Some(kind) = ToolKind::parse(subtype) {
                Role::Tool(kind)
            } else if let Some(kind) = KontextKind::parse(subtype) {
                Role::Kontext(kind)
            } else {
                Role::Unsupported(type_string.to_string())
            }
        }
    }
}
