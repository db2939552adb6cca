//! Single-purpose tools: upscale, remove-background, inpaint, outpaint
//!
//! Every tool works on exactly one resolvable base image.

use serde_json::json;

use super::{keys, mask_ref, CompileContext, CompileResult, MainMethod, MainStep, Params};
use crate::classify::{ClassifiedNode, Polarity, ToolKind};
use crate::error::CompilationError;
use crate::flow::{first_tool, FlowKind};
use crate::types::attrs;

/// Outpaint margin attributes, in pixels
const MARGINS: [&str; 4] = ["top", "right", "bottom", "left"];

pub(super) fn compile(ctx: &CompileContext<'_>) -> Result<CompileResult, CompilationError> {
    let Some((node, kind)) = first_tool(ctx.ancestors) else {
        return Err(CompilationError::MissingBaseImage {
            flow: FlowKind::Tool.to_string(),
        });
    };

    let image = ctx
        .base_image()
        .ok_or_else(|| CompilationError::MissingBaseImage {
            flow: kind.as_str().to_string(),
        })?;

    let mut params = Params::new();
    params.insert(keys::IMAGE.to_string(), json!(image));

    let method = match kind {
        ToolKind::Upscale => {
            let tool = &node.node;
            let scale = tool
                .f64_attr(attrs::SCALE)
                .unwrap_or(ctx.config.default_upscale_factor);
            let model = tool
                .str_attr(attrs::UPSCALE_MODEL)
                .map(str::to_string)
                .unwrap_or_else(|| ctx.config.default_upscale_model.clone());
            params.insert(keys::SCALE.to_string(), json!(scale));
            params.insert(keys::UPSCALE_MODEL.to_string(), json!(model));
            params.insert(
                keys::FACE_ENHANCE.to_string(),
                json!(tool.bool_attr(attrs::FACE_ENHANCE).unwrap_or(false)),
            );
            MainMethod::Upscale
        }
        ToolKind::RemoveBackground => MainMethod::RemoveBackground,
        ToolKind::Inpaint => {
            let mask = mask_ref(&node.node)
                .or_else(|| ctx.image_candidates().find_map(|a| mask_ref(&a.node)))
                .ok_or(CompilationError::MissingMask)?;
            params.insert(keys::MASK.to_string(), json!(mask));
            insert_tool_prompt(ctx, node, &mut params);
            MainMethod::Inpaint
        }
        ToolKind::Outpaint => {
            for margin in MARGINS {
                let px = node.node.f64_attr(margin).unwrap_or(0.0).max(0.0).round() as u32;
                params.insert(margin.to_string(), json!(px));
            }
            insert_tool_prompt(ctx, node, &mut params);
            MainMethod::Outpaint
        }
    };

    Ok(CompileResult {
        flow: FlowKind::Tool,
        preprocess: Vec::new(),
        main: MainStep::new(method, params),
    })
}

fn insert_tool_prompt(ctx: &CompileContext<'_>, node: &ClassifiedNode, params: &mut Params) {
    let prompt = ctx
        .prompt(Polarity::Positive)
        .or_else(|| node.node.str_attr(attrs::PROMPT).map(|p| p.trim().to_string()));
    if let Some(prompt) = prompt {
        params.insert(keys::PROMPT.to_string(), json!(prompt));
    }
}
