//! reqwest-based `GenerationService`
//!
//! Every main-step method is a JSON POST to `{baseUrl}/{method}` carrying the
//! compiled parameter bag. Uploads are multipart; preprocessing is a JSON
//! POST returning the guide image.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use generation_engine::{GenerationService, MainMethod, Params, ServiceError, UploadedImage};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

const DEFAULT_MIME: &str = "image/png";

/// HTTP client for the remote generation service
pub struct HttpGenerationService {
    /// HTTP client for API requests
    http_client: reqwest::Client,
    config: ClientConfig,
}

impl HttpGenerationService {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http_client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Absolute URL of an endpoint path
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn post_json<T: serde::Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Value> {
        let url = self.endpoint(path);
        log::debug!("POST {}", url);
        let response = self
            .authorize(self.http_client.post(&url))
            .json(body)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn read_json(response: reqwest::Response) -> Result<Value> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            log::warn!("Generation service returned {}: {}", status, body);
            return Err(ClientError::Status { status, body });
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("Failed to parse response: {}", e)))
    }

    async fn call(&self, method: MainMethod, params: &Params) -> std::result::Result<Value, ServiceError> {
        Ok(self.post_json(method.as_str(), params).await?)
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn text_to_image(&self, params: &Params) -> std::result::Result<Value, ServiceError> {
        self.call(MainMethod::Txt2Img, params).await
    }

    async fn image_to_image(&self, params: &Params) -> std::result::Result<Value, ServiceError> {
        self.call(MainMethod::Img2Img, params).await
    }

    async fn upscale(&self, params: &Params) -> std::result::Result<Value, ServiceError> {
        self.call(MainMethod::Upscale, params).await
    }

    async fn remove_background(&self, params: &Params) -> std::result::Result<Value, ServiceError> {
        self.call(MainMethod::RemoveBackground, params).await
    }

    async fn inpaint(&self, params: &Params) -> std::result::Result<Value, ServiceError> {
        self.call(MainMethod::Inpaint, params).await
    }

    async fn outpaint(&self, params: &Params) -> std::result::Result<Value, ServiceError> {
        self.call(MainMethod::Outpaint, params).await
    }

    async fn style_transfer(&self, params: &Params) -> std::result::Result<Value, ServiceError> {
        self.call(MainMethod::StyleTransfer, params).await
    }

    async fn recombine(&self, params: &Params) -> std::result::Result<Value, ServiceError> {
        self.call(MainMethod::Recombine, params).await
    }

    async fn preprocess(&self, source_image: &str, preprocessor: &str) -> std::result::Result<String, ServiceError> {
        let request = json!({
            "image": source_image,
            "preprocessor": preprocessor,
        });
        let response = self.post_json(&self.config.preprocess_path, &request).await?;
        Ok(parse_guide(&response)?)
    }

    async fn upload_image(&self, data: &str) -> std::result::Result<UploadedImage, ServiceError> {
        let (bytes, mime) = decode_image_data(data)?;
        let part = Part::bytes(bytes)
            .file_name("image")
            .mime_str(&mime)
            .map_err(ClientError::from)?;
        let form = Form::new().part("file", part);

        let url = self.endpoint(&self.config.upload_path);
        log::debug!("Uploading image to {}", url);
        let response = self
            .authorize(self.http_client.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(ClientError::from)?;
        let body = Self::read_json(response).await?;
        Ok(parse_upload(&body)?)
    }
}

/// Decode a data URL or bare base64 string into bytes and a MIME type
pub fn decode_image_data(data: &str) -> Result<(Vec<u8>, String)> {
    let (mime, payload) = match data.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| ClientError::InvalidImage("data URL without payload".to_string()))?;
            if !header.ends_with(";base64") {
                return Err(ClientError::InvalidImage("only base64 data URLs are supported".to_string()));
            }
            let mime = header.trim_end_matches(";base64");
            let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };
            (mime.to_string(), payload)
        }
        None => (DEFAULT_MIME.to_string(), data),
    };

    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| ClientError::InvalidImage(format!("Invalid base64: {}", e)))?;
    if bytes.is_empty() {
        return Err(ClientError::InvalidImage("empty image".to_string()));
    }
    Ok((bytes, mime))
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

/// Identifier and canonical URL from an upload response
pub fn parse_upload(response: &Value) -> Result<UploadedImage> {
    let body = response.get("data").filter(|d| d.is_object()).unwrap_or(response);
    let id = first_str(body, &["id", "imageId"])
        .ok_or_else(|| ClientError::Decode("upload response has no id".to_string()))?;
    let url = first_str(body, &["url", "imageUrl"])
        .ok_or_else(|| ClientError::Decode("upload response has no url".to_string()))?;
    Ok(UploadedImage {
        id: id.to_string(),
        url: url.to_string(),
    })
}

/// Guide image URL from a preprocessing response
pub fn parse_guide(response: &Value) -> Result<String> {
    if let Some(url) = response.as_str() {
        return Ok(url.to_string());
    }
    first_str(response, &["guideUrl", "imageUrl", "url", "image"])
        .map(str::to_string)
        .ok_or_else(|| ClientError::Decode("preprocess response has no image".to_string()))
}
