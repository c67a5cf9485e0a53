use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Map, Value};

use super::http::{data_url, download_image, send_json_with_retries, ImageBytes};
use super::{sniff_mime, GeneratedImage, ImageProvider, ProviderCall};
use crate::config::SeedreamSettings;

/// ModelArk `images/generations` client for Seedream models.
pub struct SeedreamProvider {
    settings: SeedreamSettings,
    http: HttpClient,
}

impl SeedreamProvider {
    pub fn new(settings: SeedreamSettings) -> Self {
        Self {
            settings,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/images/generations", self.settings.api_base)
    }

    fn build_payload(&self, call: &ProviderCall) -> Value {
        let preamble = call.inputs.preamble();
        let prompt = if preamble.is_empty() {
            call.prompt.clone()
        } else {
            format!("{preamble}\n\n{}", call.prompt)
        };
        let mut payload = json!({
            "model": self.settings.model,
            "prompt": prompt,
            "response_format": "b64_json",
            "sequential_image_generation": "disabled",
            "watermark": false,
        });
        let images: Vec<Value> = call
            .inputs
            .images
            .iter()
            .map(|image| Value::String(data_url(&image.mime_type, &image.bytes)))
            .collect();
        if !images.is_empty() {
            payload["image"] = Value::Array(images);
        }
        payload
    }

    fn first_image(&self, response_payload: &Value, call: &ProviderCall) -> Result<ImageBytes> {
        let first = response_payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first());
        let Some(first) = first else {
            if let Some(message) = response_payload
                .pointer("/error/message")
                .and_then(Value::as_str)
            {
                bail!("Seedream returned no images: {message}");
            }
            bail!("Seedream returned no images");
        };

        if let Some(encoded) = first
            .get("b64_json")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
        {
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .context("Seedream image base64 decode failed")?;
            return Ok(ImageBytes {
                bytes,
                mime_type: None,
            });
        }
        if let Some(url) = first
            .get("url")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
        {
            return download_image(&self.http, "Seedream", url, call.policy.timeout());
        }
        bail!("Seedream response item carried neither b64_json nor url")
    }
}

impl ImageProvider for SeedreamProvider {
    fn name(&self) -> &str {
        "seedream"
    }

    fn generate(&self, call: &ProviderCall) -> Result<GeneratedImage> {
        let Some(api_key) = self.settings.api_key.as_deref() else {
            bail!("authentication error: ARK_API_KEY or SEEDREAM_API_KEY not set");
        };
        let endpoint = self.endpoint();
        let payload = self.build_payload(call);

        let response_payload = send_json_with_retries("Seedream", &endpoint, &call.policy, || {
            self.http
                .post(&endpoint)
                .header(AUTHORIZATION, format!("Bearer {api_key}"))
                .timeout(call.policy.timeout())
                .json(&payload)
                .send()
        })?;
        let image = self.first_image(&response_payload, call)?;

        let mime_type = sniff_mime(&image.bytes)
            .map(str::to_string)
            .or(image.mime_type)
            .unwrap_or_else(|| "image/jpeg".to_string());
        let mut metadata = Map::new();
        metadata.insert("endpoint".to_string(), Value::String(endpoint));
        metadata.insert(
            "model".to_string(),
            Value::String(self.settings.model.clone()),
        );
        metadata.insert(
            "usage".to_string(),
            response_payload.get("usage").cloned().unwrap_or(Value::Null),
        );
        metadata.insert(
            "created".to_string(),
            response_payload.get("created").cloned().unwrap_or(Value::Null),
        );

        Ok(GeneratedImage {
            bytes: image.bytes,
            mime_type,
            metadata,
        })
    }
}
