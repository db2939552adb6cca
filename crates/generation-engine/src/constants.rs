//! Engine-wide constants
//!
//! Defaults and static lookup tables used by the request compiler.

use crate::classify::ControlType;

/// Default values for request compilation
pub mod defaults {
    /// Model used when no engine node names one
    pub const MODEL: &str = "flux-dev";
    /// i2i strength when the node has no creativity/strength attribute
    pub const I2I_STRENGTH: f64 = 0.8;
    /// Control-net strength when the node has no override
    pub const CONTROLNET_STRENGTH: f64 = 1.0;
    /// LoRA weight when a descriptor has none
    pub const LORA_WEIGHT: f64 = 1.0;
    /// Negative prompts shorter than this (trimmed) are omitted
    pub const MIN_NEGATIVE_PROMPT_LEN: usize = 2;
    /// Reangle rotation in degrees
    pub const REANGLE_ANGLE: f64 = 15.0;
    /// Reangle camera direction
    pub const REANGLE_DIRECTION: &str = "up";
    /// Weight of each remix ip-adapter entry
    pub const REMIX_WEIGHT: f64 = 0.75;
    /// Upscale factor
    pub const UPSCALE_FACTOR: f64 = 2.0;
    /// Upscale model
    pub const UPSCALE_MODEL: &str = "esrgan";
}

/// Tags recognised on rescene inputs
pub mod tags {
    pub const SCENE: &str = "SCENE";
    pub const OBJECT: &str = "OBJECT";
}

/// Control-net model id for a control type
pub fn controlnet_model(control: &ControlType) -> Option<&'static str> {
    match control {
        ControlType::Pose => Some("controlnet-openpose-sdxl"),
        ControlType::Depth => Some("controlnet-depth-sdxl"),
        ControlType::Canny => Some("controlnet-canny-sdxl"),
        ControlType::Lineart => Some("controlnet-lineart-sdxl"),
        ControlType::Scribble => Some("controlnet-scribble-sdxl"),
        ControlType::Segmentation => Some("controlnet-segmentation-sdxl"),
        ControlType::Lights | ControlType::Other(_) => None,
    }
}

/// Remote preprocessor that turns a source image into a guide for a control type
pub fn preprocessor(control: &ControlType) -> Option<&'static str> {
    match control {
        ControlType::Pose => Some("openpose"),
        ControlType::Depth => Some("depth_midas"),
        ControlType::Canny => Some("canny"),
        ControlType::Lineart => Some("lineart"),
        ControlType::Scribble => Some("scribble_hed"),
        ControlType::Segmentation => Some("segmentation_ofade20k"),
        ControlType::Lights | ControlType::Other(_) => None,
    }
}
