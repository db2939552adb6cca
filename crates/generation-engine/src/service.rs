//! Boundary to the remote image-generation service
//!
//! One async call per main-step method, plus control-net preprocessing and
//! image upload. Implementations own transport concerns (timeouts, auth);
//! the engine never retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compiler::{MainMethod, MainStep, Params};
use crate::error::ServiceError;

/// Stable reference returned by an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedImage {
    pub id: String,
    pub url: String,
}

/// Remote generation service
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn text_to_image(&self, params: &Params) -> Result<Value, ServiceError>;

    async fn image_to_image(&self, params: &Params) -> Result<Value, ServiceError>;

    async fn upscale(&self, params: &Params) -> Result<Value, ServiceError>;

    async fn remove_background(&self, params: &Params) -> Result<Value, ServiceError>;

    async fn inpaint(&self, params: &Params) -> Result<Value, ServiceError>;

    async fn outpaint(&self, params: &Params) -> Result<Value, ServiceError>;

    /// Reference-style transform
    async fn style_transfer(&self, params: &Params) -> Result<Value, ServiceError>;

    /// Multi-image recombination
    async fn recombine(&self, params: &Params) -> Result<Value, ServiceError>;

    /// Turn a source image into a control-net guide; returns the guide URL
    async fn preprocess(&self, source_image: &str, preprocessor: &str) -> Result<String, ServiceError>;

    /// Upload raw or base64 image data
    async fn upload_image(&self, data: &str) -> Result<UploadedImage, ServiceError>;
}

/// Route a main step to the matching remote call
pub async fn dispatch(service: &dyn GenerationService, step: &MainStep) -> Result<Value, ServiceError> {
    let params = &step.params;
    match step.method {
        MainMethod::Txt2Img => service.text_to_image(params).await,
        MainMethod::Img2Img => service.image_to_image(params).await,
        MainMethod::Upscale => service.upscale(params).await,
        MainMethod::RemoveBackground => service.remove_background(params).await,
        MainMethod::Inpaint => service.inpaint(params).await,
        MainMethod::Outpaint => service.outpaint(params).await,
        MainMethod::StyleTransfer => service.style_transfer(params).await,
        MainMethod::Recombine => service.recombine(params).await,
    }
}

/// What a successful main call produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutput {
    pub image_url: String,
    pub image_id: Option<String>,
    pub seed: Option<i64>,
    pub prompt: Option<String>,
    pub nsfw: Option<bool>,
}

impl GenerationOutput {
    /// Extract the output from a raw response.
    ///
    /// Accepts the image at the top level (`imageUrl`, `url`, `image`) or as
    /// the first element of `images`/`data`. A non-null `error` field or the
    /// absence of any image is an error payload.
    pub fn from_response(response: &Value) -> Result<Self, ServiceError> {
        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            let message = error
                .as_str()
                .map(str::to_string)
                .or_else(|| error.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| error.to_string());
            return Err(ServiceError::Remote(message));
        }

        let first = ["images", "data"]
            .iter()
            .find_map(|k| response.get(*k).and_then(Value::as_array))
            .and_then(|items| items.first());
        let image = first.unwrap_or(response);

        let image_url = match image {
            Value::String(url) => Some(url.clone()),
            _ => str_field(image, &["imageUrl", "url", "image"]),
        }
        .ok_or_else(|| ServiceError::InvalidResponse("response contains no image".to_string()))?;

        Ok(Self {
            image_url,
            image_id: str_field(image, &["imageId", "id"]).or_else(|| str_field(response, &["imageId", "id"])),
            seed: int_field(image, "seed").or_else(|| int_field(response, "seed")),
            prompt: str_field(response, &["prompt"]).or_else(|| str_field(image, &["prompt"])),
            nsfw: bool_field(image, &["nsfw", "hasNsfwConcepts"])
                .or_else(|| bool_field(response, &["nsfw", "hasNsfwConcepts"])),
        })
    }
}

fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn int_field(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

fn bool_field(value: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| match value.get(*k)? {
        Value::Bool(b) => Some(*b),
        Value::Array(flags) => flags.first().and_then(Value::as_bool),
        _ => None,
    })
}
