//! Text-to-image and plain image-to-image requests

use serde_json::json;

use super::{image_ref, keys, CompileContext, CompileResult, ControlNetEntry, MainMethod, MainStep, PreprocessStep};
use crate::classify::{ControlType, Role};
use crate::constants;
use crate::error::CompilationError;
use crate::flow::FlowKind;
use crate::types::attrs;

pub(super) fn compile_t2i(ctx: &CompileContext<'_>) -> Result<CompileResult, CompilationError> {
    let mut params = ctx.generative_params();
    let mut entries = Vec::new();
    let mut preprocess = Vec::new();

    for cn in ctx.with_role(|r| matches!(r, Role::ControlNet(_))) {
        let Role::ControlNet(control) = &cn.role else {
            continue;
        };
        if *control == ControlType::Lights {
            continue;
        }
        let node = &cn.node;
        let (Some(model), Some(preprocessor)) =
            (constants::controlnet_model(control), constants::preprocessor(control))
        else {
            return Err(CompilationError::UnsupportedSubtype {
                node_id: node.id.clone(),
                subtype: control.as_str().to_string(),
            });
        };
        let strength = node
            .f64_attr(attrs::STRENGTH)
            .unwrap_or(ctx.config.default_controlnet_strength);

        match (node.str_attr(attrs::GUIDE_URL), image_ref(node)) {
            (Some(guide), _) => entries.push(ControlNetEntry {
                image: guide.to_string(),
                strength,
                model: model.to_string(),
                control_type: control.as_str().to_string(),
            }),
            (None, Some(source)) => preprocess.push(PreprocessStep {
                node_id: node.id.clone(),
                control_type: control.clone(),
                source_image: source,
                preprocessor: preprocessor.to_string(),
                strength,
                model: model.to_string(),
            }),
            (None, None) => {
                log::debug!("Dropping control-net '{}' without a guide or source image", node.id);
            }
        }
    }

    if !entries.is_empty() {
        params.insert(keys::CONTROLNET.to_string(), json!(entries));
    }

    // A seed image turns the call into img2img; the flow stays t2i.
    let seed = ctx
        .with_role(|r| *r == Role::ControlNet(ControlType::Lights))
        .find_map(|lights| image_ref(&lights.node).map(|image| (lights, image)));
    let method = match seed {
        Some((lights, image)) => {
            params.insert(keys::IMAGE.to_string(), json!(image));
            let strength = lights
                .node
                .f64_attr(attrs::STRENGTH)
                .unwrap_or(ctx.config.default_i2i_strength);
            params.insert(keys::STRENGTH.to_string(), json!(strength));
            MainMethod::Img2Img
        }
        None => MainMethod::Txt2Img,
    };

    Ok(CompileResult {
        flow: FlowKind::T2i,
        preprocess,
        main: MainStep::new(method, params),
    })
}

pub(super) fn compile_i2i(ctx: &CompileContext<'_>) -> Result<CompileResult, CompilationError> {
    let image = ctx
        .base_image()
        .ok_or_else(|| CompilationError::MissingBaseImage {
            flow: FlowKind::I2i.to_string(),
        })?;

    let strength = ctx
        .with_role(|r| *r == Role::ImageToImage)
        .find_map(|n| {
            n.node
                .f64_attr(attrs::CREATIVITY)
                .or_else(|| n.node.f64_attr(attrs::STRENGTH))
        })
        .unwrap_or(ctx.config.default_i2i_strength);

    let mut params = ctx.generative_params();
    params.insert(keys::IMAGE.to_string(), json!(image));
    params.insert(keys::STRENGTH.to_string(), json!(strength));

    Ok(CompileResult {
        flow: FlowKind::I2i,
        preprocess: Vec::new(),
        main: MainStep::new(MainMethod::Img2Img, params),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::compiler::{compile, MainMethod};
    use crate::config::EngineConfig;
    use crate::error::CompilationError;
    use crate::flow::FlowKind;
    use crate::types::{GraphEdge, GraphNode};

    fn graph(nodes: Vec<GraphNode>) -> (Vec<GraphNode>, Vec<GraphEdge>) {
        let mut all = nodes;
        let edges = all
            .iter()
            .enumerate()
            .map(|(i, n)| GraphEdge::new(format!("e{}", i), n.id.clone(), "out"))
            .collect();
        all.push(GraphNode::new("out", "output"));
        (all, edges)
    }

    #[test]
    fn test_controlnet_entries_and_preprocess_steps() {
        let (nodes, edges) = graph(vec![
            GraphNode::with_data("p", "prompt", json!({"text": "a dancer"})),
            GraphNode::with_data(
                "pose",
                "control-net-pose",
                json!({"guideUrl": "https://cdn/pose.png", "strength": 0.6}),
            ),
            GraphNode::with_data("depth", "control-net-depth", json!({"imageId": "src-1"})),
            GraphNode::new("empty", "control-net-canny"),
        ]);

        let result = compile("out", &nodes, &edges, &EngineConfig::default()).unwrap();
        assert_eq!(result.flow, FlowKind::T2i);
        assert_eq!(result.main.method, MainMethod::Txt2Img);

        let entries = result.main.params["controlnet"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["image"], "https://cdn/pose.png");
        assert_eq!(entries[0]["strength"], 0.6);
        assert_eq!(entries[0]["model"], "controlnet-openpose-sdxl");

        assert_eq!(result.preprocess.len(), 1);
        let step = &result.preprocess[0];
        assert_eq!(step.node_id, "depth");
        assert_eq!(step.source_image, "src-1");
        assert_eq!(step.preprocessor, "depth_midas");
        assert_eq!(step.strength, 1.0);
    }

    #[test]
    fn test_lights_upgrades_method_not_flow() {
        let (nodes, edges) = graph(vec![
            GraphNode::with_data("p", "prompt", json!({"text": "sunset"})),
            GraphNode::with_data(
                "lights",
                "control-net-lights",
                json!({"imageUrl": "https://cdn/seed.png"}),
            ),
        ]);

        let result = compile("out", &nodes, &edges, &EngineConfig::default()).unwrap();
        assert_eq!(result.flow, FlowKind::T2i);
        assert_eq!(result.main.method, MainMethod::Img2Img);
        assert_eq!(result.main.params["image"], "https://cdn/seed.png");
        assert_eq!(result.main.params["strength"], 0.8);
        assert!(!result.main.params.contains_key("controlnet"));
        assert!(result.preprocess.is_empty());
    }

    #[test]
    fn test_lights_without_image_stays_txt2img() {
        let (nodes, edges) = graph(vec![GraphNode::new("lights", "control-net-lights")]);
        let result = compile("out", &nodes, &edges, &EngineConfig::default()).unwrap();
        assert_eq!(result.main.method, MainMethod::Txt2Img);
    }

    #[test]
    fn test_unknown_control_type_is_unsupported() {
        let (nodes, edges) = graph(vec![GraphNode::with_data(
            "normal",
            "control-net-normal",
            json!({"imageId": "x"}),
        )]);
        let err = compile("out", &nodes, &edges, &EngineConfig::default()).unwrap_err();
        assert_eq!(
            err,
            CompilationError::UnsupportedSubtype {
                node_id: "normal".to_string(),
                subtype: "normal".to_string(),
            }
        );
    }

    #[test]
    fn test_i2i_uses_first_uploaded_image() {
        let (nodes, edges) = graph(vec![
            GraphNode::with_data("i2i", "i2i", json!({"creativity": 0.35})),
            GraphNode::with_data("local", "image", json!({"imageData": "AAAA"})),
            GraphNode::with_data("remote", "image", json!({"imageUrl": "https://cdn/a.png"})),
            GraphNode::with_data("cn", "control-net-depth", json!({"imageUrl": "https://cdn/cn.png"})),
            GraphNode::with_data("p", "prompt", json!({"text": "oil painting"})),
        ]);

        let result = compile("out", &nodes, &edges, &EngineConfig::default()).unwrap();
        assert_eq!(result.flow, FlowKind::I2i);
        assert_eq!(result.main.method, MainMethod::Img2Img);
        assert_eq!(result.main.params["image"], "https://cdn/a.png");
        assert_eq!(result.main.params["strength"], 0.35);
        assert_eq!(result.main.params["positivePrompt"], "oil painting");
        assert!(!result.main.params.contains_key("controlnet"));
        assert!(result.preprocess.is_empty());
    }

    #[test]
    fn test_i2i_default_strength() {
        let (nodes, edges) = graph(vec![
            GraphNode::new("i2i", "image-to-image"),
            GraphNode::with_data("img", "image", json!({"imageId": "img-1"})),
        ]);
        let result = compile("out", &nodes, &edges, &EngineConfig::default()).unwrap();
        assert_eq!(result.main.params["strength"], 0.8);
        assert_eq!(result.main.params["image"], "img-1");
    }

    #[test]
    fn test_i2i_without_image_fails() {
        let (nodes, edges) = graph(vec![
            GraphNode::new("i2i", "i2i"),
            GraphNode::with_data("local", "image", json!({"imageData": "AAAA"})),
        ]);
        let err = compile("out", &nodes, &edges, &EngineConfig::default()).unwrap_err();
        assert_eq!(
            err,
            CompilationError::MissingBaseImage {
                flow: "i2i".to_string()
            }
        );
    }

    #[test]
    fn test_output_node_image_is_not_its_own_base() {
        let mut nodes = vec![GraphNode::new("i2i", "i2i")];
        nodes.push(GraphNode::with_data(
            "out",
            "output",
            json!({"imageUrl": "https://cdn/previous.png"}),
        ));
        let edges = vec![
            GraphEdge::new("e1", "i2i", "out"),
            GraphEdge::new("e2", "out", "i2i"),
        ];
        let err = compile("out", &nodes, &edges, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, CompilationError::MissingBaseImage { .. }));
    }
}
