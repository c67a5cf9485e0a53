use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::http::{send_json_with_retries, ImageBytes};
use super::{sniff_mime, GeneratedImage, ImageProvider, ProviderCall};
use crate::config::GeminiSettings;

/// `generateContent` client for Gemini image models.
pub struct GeminiProvider {
    settings: GeminiSettings,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(settings: GeminiSettings) -> Self {
        Self {
            settings,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        let trimmed = self.settings.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.settings.api_base, model_path)
    }

    fn build_payload(call: &ProviderCall) -> Value {
        let mut parts = Vec::new();
        for image in &call.inputs.images {
            parts.push(json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": BASE64.encode(&image.bytes),
                }
            }));
        }
        let preamble = call.inputs.preamble();
        if !preamble.is_empty() {
            parts.push(json!({ "text": preamble }));
        }
        parts.push(json!({ "text": call.prompt }));

        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE"],
            },
        })
    }

    fn first_inline_image(response_payload: &Value) -> Result<Option<ImageBytes>> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                else {
                    continue;
                };
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Ok(Some(ImageBytes { bytes, mime_type }));
            }
        }
        Ok(None)
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, call: &ProviderCall) -> Result<GeneratedImage> {
        let Some(api_key) = self.settings.api_key.as_deref() else {
            bail!("authentication error: GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint();
        let payload = Self::build_payload(call);

        let response_payload = send_json_with_retries("Gemini", &endpoint, &call.policy, || {
            self.http
                .post(&endpoint)
                .query(&[("key", api_key)])
                .timeout(call.policy.timeout())
                .json(&payload)
                .send()
        })?;

        let Some(image) = Self::first_inline_image(&response_payload)? else {
            let finish_reason = response_payload
                .pointer("/candidates/0/finishReason")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            bail!("Gemini returned no images (finish reason: {finish_reason})");
        };

        let mime_type = sniff_mime(&image.bytes)
            .map(str::to_string)
            .or(image.mime_type)
            .unwrap_or_else(|| "image/png".to_string());
        let mut metadata = Map::new();
        metadata.insert("endpoint".to_string(), Value::String(endpoint));
        metadata.insert(
            "model".to_string(),
            Value::String(self.settings.model.clone()),
        );
        metadata.insert(
            "usage_metadata".to_string(),
            response_payload
                .get("usageMetadata")
                .cloned()
                .unwrap_or(Value::Null),
        );
        metadata.insert(
            "model_version".to_string(),
            response_payload
                .get("modelVersion")
                .cloned()
                .unwrap_or(Value::Null),
        );

        Ok(GeneratedImage {
            bytes: image.bytes,
            mime_type,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use toonregen_contracts::rounds::CandidateId;

    use super::GeminiProvider;
    use crate::config::{CallPolicy, GeminiSettings};
    use crate::providers::{
        ImageProvider, InputRole, LoadedImage, ProviderCall, ProviderInputs,
    };

    fn call() -> ProviderCall {
        ProviderCall {
            candidate_id: CandidateId::from("cand-1"),
            index: 0,
            prompt: "clean line art".to_string(),
            inputs: Arc::new(ProviderInputs {
                images: vec![LoadedImage {
                    role: InputRole::Source,
                    label: None,
                    file_name: "panel.png".to_string(),
                    bytes: b"abc".to_vec(),
                    mime_type: "image/png".to_string(),
                }],
            }),
            policy: CallPolicy::default(),
        }
    }

    #[test]
    fn payload_puts_images_first_and_prompt_last() {
        let payload = GeminiProvider::build_payload(&call());
        let parts = payload["contents"][0]["parts"].as_array().cloned().unwrap_or_default();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inlineData"]["data"], json!("YWJj"));
        assert_eq!(parts[1]["text"], json!("Image 1 is the panel to transform."));
        assert_eq!(parts[2]["text"], json!("clean line art"));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE"])
        );
    }

    #[test]
    fn first_inline_image_skips_text_parts() -> anyhow::Result<()> {
        let response = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "here you go"},
                    {"inlineData": {"mimeType": "image/webp", "data": "YWJj"}},
                    {"inlineData": {"mimeType": "image/png", "data": "ZGVm"}}
                ]}
            }]
        });
        let image = GeminiProvider::first_inline_image(&response)?.expect("image");
        assert_eq!(image.bytes, b"abc");
        assert_eq!(image.mime_type.as_deref(), Some("image/webp"));
        assert!(GeminiProvider::first_inline_image(&json!({"candidates": []}))?.is_none());
        Ok(())
    }

    #[test]
    fn missing_key_is_an_authentication_error() {
        let provider = GeminiProvider::new(GeminiSettings {
            api_key: None,
            api_base: "http://127.0.0.1:9".to_string(),
            model: "gemini-2.5-flash-image".to_string(),
        });
        assert!(provider.endpoint().ends_with("/models/gemini-2.5-flash-image:generateContent"));
        let err = provider.generate(&call()).expect_err("no key");
        assert!(err.to_string().starts_with("authentication error"));
    }
}
