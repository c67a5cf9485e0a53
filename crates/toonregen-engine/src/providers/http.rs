use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;
use tracing::warn;

use crate::config::CallPolicy;
use crate::truncate_text;

pub(super) struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Sends a request built by `send`, retrying transport failures, HTTP 429
/// and HTTP 5xx with linear backoff. Any other status fails at once with the
/// truncated body.
pub(super) fn send_json_with_retries<F>(
    provider: &str,
    endpoint: &str,
    policy: &CallPolicy,
    send: F,
) -> Result<Value>
where
    F: Fn() -> reqwest::Result<HttpResponse>,
{
    let mut attempt = 0;
    loop {
        match send() {
            Ok(response) => {
                let code = response.status().as_u16();
                if is_retryable_status(code) && attempt < policy.retries {
                    warn!(
                        provider,
                        status = code,
                        "{provider} retry {}/{} after HTTP {code}",
                        attempt + 1,
                        policy.retries
                    );
                    thread::sleep(policy.backoff_for(attempt));
                    attempt += 1;
                    continue;
                }
                return response_json_or_error(provider, response);
            }
            Err(raw) => {
                let err = anyhow::Error::new(raw.without_url())
                    .context(format!("{provider} request failed ({endpoint})"));
                if !is_retryable_transport_error(&err) || attempt >= policy.retries {
                    return Err(err);
                }
                warn!(
                    provider,
                    "{provider} transport retry {}/{} after transient request failure",
                    attempt + 1,
                    policy.retries
                );
                thread::sleep(policy.backoff_for(attempt));
                attempt += 1;
            }
        }
    }
}

pub(super) fn download_image(
    http: &HttpClient,
    provider: &str,
    url: &str,
    timeout: Duration,
) -> Result<ImageBytes> {
    let response = http
        .get(url)
        .timeout(timeout)
        .send()
        .map_err(|err| err.without_url())
        .with_context(|| format!("{provider} image download failed"))?;
    if !response.status().is_success() {
        let code = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        bail!(
            "{provider} image download failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = response
        .bytes()
        .with_context(|| format!("{provider} image bytes read failed"))?
        .to_vec();
    Ok(ImageBytes { bytes, mime_type })
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub(super) fn is_retryable_status(code: u16) -> bool {
    code == 429 || (500..600).contains(&code)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

/// Base64 payload wrapped as a `data:` URL.
pub(super) fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}
