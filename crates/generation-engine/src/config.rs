//! Engine configuration
//!
//! Every field has a default, so hosts only need to persist what they change.

use serde::{Deserialize, Serialize};

use crate::constants::defaults;

/// What to do when an output node is triggered while a previous
/// execution for it is still running
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Run both; the later-created record becomes "latest"
    #[default]
    Allow,
    /// Refuse the second trigger without creating a record
    Reject,
}

/// Tunables for compilation and execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub default_model: String,
    pub default_i2i_strength: f64,
    pub default_controlnet_strength: f64,
    pub default_lora_weight: f64,
    pub min_negative_prompt_len: usize,
    pub default_reangle_angle: f64,
    pub default_reangle_direction: String,
    pub default_remix_weight: f64,
    pub default_upscale_factor: f64,
    pub default_upscale_model: String,
    pub overlap_policy: OverlapPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_model: defaults::MODEL.to_string(),
            default_i2i_strength: defaults::I2I_STRENGTH,
            default_controlnet_strength: defaults::CONTROLNET_STRENGTH,
            default_lora_weight: defaults::LORA_WEIGHT,
            min_negative_prompt_len: defaults::MIN_NEGATIVE_PROMPT_LEN,
            default_reangle_angle: defaults::REANGLE_ANGLE,
            default_reangle_direction: defaults::REANGLE_DIRECTION.to_string(),
            default_remix_weight: defaults::REMIX_WEIGHT,
            default_upscale_factor: defaults::UPSCALE_FACTOR,
            default_upscale_model: defaults::UPSCALE_MODEL.to_string(),
            overlap_policy: OverlapPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON settings document
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{"defaultModel": "sdxl", "overlapPolicy": "reject"}"#)
                .unwrap();
        assert_eq!(config.default_model, "sdxl");
        assert_eq!(config.overlap_policy, OverlapPolicy::Reject);
        assert_eq!(config.default_i2i_strength, 0.8);
        assert_eq!(config.min_negative_prompt_len, 2);
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(EngineConfig::from_json_str("{}").unwrap(), EngineConfig::default());
    }
}
