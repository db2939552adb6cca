//! Multi-image "kontext" transforms: reference, rescene, reangle, remix
//!
//! Each transform gets a natural-language prompt. Connected prompt nodes win,
//! then the transform node's own `prompt` attribute, then a synthesized one.

use serde_json::json;

use super::{image_ref, keys, CompileContext, CompileResult, MainMethod, MainStep, Params};
use crate::classify::{ClassifiedNode, KontextKind, Polarity};
use crate::constants::tags;
use crate::error::CompilationError;
use crate::flow::{first_kontext, FlowKind};
use crate::types::attrs;

pub(super) fn compile(ctx: &CompileContext<'_>) -> Result<CompileResult, CompilationError> {
    let Some((node, kind)) = first_kontext(ctx.ancestors) else {
        return Err(CompilationError::MissingImages {
            subtype: FlowKind::FluxKontext.to_string(),
        });
    };

    let (method, params) = match kind {
        KontextKind::Reference => reference(ctx, node)?,
        KontextKind::Rescene => rescene(ctx, node)?,
        KontextKind::Reangle => reangle(ctx, node)?,
        KontextKind::Remix => remix(ctx, node)?,
    };

    Ok(CompileResult {
        flow: FlowKind::FluxKontext,
        preprocess: Vec::new(),
        main: MainStep::new(method, params),
    })
}

fn prompt_for(ctx: &CompileContext<'_>, node: &ClassifiedNode, fallback: impl FnOnce() -> String) -> String {
    ctx.prompt(Polarity::Positive)
        .or_else(|| node.node.str_attr(attrs::PROMPT).map(|p| p.trim().to_string()))
        .unwrap_or_else(fallback)
}

fn require_image(ctx: &CompileContext<'_>, kind: KontextKind) -> Result<String, CompilationError> {
    ctx.base_image().ok_or_else(|| CompilationError::MissingBaseImage {
        flow: kind.as_str().to_string(),
    })
}

fn reference(
    ctx: &CompileContext<'_>,
    node: &ClassifiedNode,
) -> Result<(MainMethod, Params), CompilationError> {
    let image = require_image(ctx, KontextKind::Reference)?;
    let prompt = prompt_for(ctx, node, || {
        "Recreate the scene in the style of the reference image".to_string()
    });

    let mut params = Params::new();
    params.insert(keys::IMAGE.to_string(), json!(image));
    params.insert(keys::PROMPT.to_string(), json!(prompt));
    Ok((MainMethod::StyleTransfer, params))
}

fn tagged_image(ctx: &CompileContext<'_>, tag: &str) -> Result<String, CompilationError> {
    ctx.image_candidates()
        .filter(|a| {
            a.node
                .str_attr(attrs::TAG)
                .is_some_and(|t| t.trim().eq_ignore_ascii_case(tag))
        })
        .find_map(|a| image_ref(&a.node))
        .ok_or_else(|| CompilationError::MissingTaggedImage {
            tag: tag.to_string(),
        })
}

fn rescene(
    ctx: &CompileContext<'_>,
    node: &ClassifiedNode,
) -> Result<(MainMethod, Params), CompilationError> {
    let scene = tagged_image(ctx, tags::SCENE)?;
    let object = tagged_image(ctx, tags::OBJECT)?;
    let prompt = prompt_for(ctx, node, || {
        "Place the object into the scene, matching its lighting and perspective".to_string()
    });

    let mut params = Params::new();
    params.insert(keys::SCENE_IMAGE.to_string(), json!(scene));
    params.insert(keys::OBJECT_IMAGE.to_string(), json!(object));
    params.insert(keys::PROMPT.to_string(), json!(prompt));
    Ok((MainMethod::Recombine, params))
}

fn reangle(
    ctx: &CompileContext<'_>,
    node: &ClassifiedNode,
) -> Result<(MainMethod, Params), CompilationError> {
    let image = require_image(ctx, KontextKind::Reangle)?;
    let angle = node
        .node
        .f64_attr(attrs::ANGLE)
        .unwrap_or(ctx.config.default_reangle_angle);
    let direction = node
        .node
        .str_attr(attrs::DIRECTION)
        .map(str::to_string)
        .unwrap_or_else(|| ctx.config.default_reangle_direction.clone());
    let prompt = prompt_for(ctx, node, || {
        format!(
            "Rotate the camera {} degrees {} while keeping the subject unchanged",
            angle, direction
        )
    });

    let mut params = Params::new();
    params.insert(keys::IMAGE.to_string(), json!(image));
    params.insert(keys::ANGLE.to_string(), json!(angle));
    params.insert(keys::DIRECTION.to_string(), json!(direction));
    params.insert(keys::PROMPT.to_string(), json!(prompt));
    Ok((MainMethod::StyleTransfer, params))
}

fn remix(
    ctx: &CompileContext<'_>,
    node: &ClassifiedNode,
) -> Result<(MainMethod, Params), CompilationError> {
    let adapters: Vec<serde_json::Value> = ctx
        .image_candidates()
        .filter_map(|a| {
            image_ref(&a.node).map(|image| {
                let weight = a
                    .node
                    .f64_attr(attrs::WEIGHT)
                    .unwrap_or(ctx.config.default_remix_weight);
                json!({ "image": image, "weight": weight })
            })
        })
        .collect();
    if adapters.is_empty() {
        return Err(CompilationError::MissingImages {
            subtype: KontextKind::Remix.as_str().to_string(),
        });
    }
    let prompt = prompt_for(ctx, node, || {
        "Blend the input images into a single coherent composition".to_string()
    });

    let mut params = Params::new();
    params.insert(keys::IP_ADAPTERS.to_string(), json!(adapters));
    params.insert(keys::PROMPT.to_string(), json!(prompt));
    Ok((MainMethod::Recombine, params))
}
