use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use lumen_contracts::chat::ChatRole;
use lumen_contracts::MediaRef;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use serde_json::{json, Map, Value};

use crate::{
    is_retryable_transport_error, response_json_or_error, truncate_text, EditRequest,
    GenerationService, OperationHandle, OperationStatus, TextRequest, VideoRequest,
};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiService {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
    request_timeout: Duration,
    transport_retries: usize,
    retry_backoff: Duration,
}

impl GeminiService {
    pub fn new(
        api_base: &str,
        api_key: Option<String>,
        request_timeout: Duration,
        transport_retries: usize,
    ) -> Self {
        let api_base = api_base.trim().trim_end_matches('/');
        Self {
            api_base: if api_base.is_empty() {
                DEFAULT_GEMINI_API_BASE.to_string()
            } else {
                api_base.to_string()
            },
            api_key,
            http: HttpClient::new(),
            request_timeout,
            transport_retries,
            retry_backoff: Duration::from_millis(1200),
        }
    }

    fn api_key(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => bail!("GEMINI_API_KEY or GOOGLE_API_KEY or API_KEY not set"),
        }
    }

    fn endpoint_for_model(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.api_base, model_path, method)
    }

    fn keyed_get(&self, url: &str) -> Result<RequestBuilder> {
        Ok(self
            .http
            .get(url)
            .query(&[("key", self.api_key()?)])
            .timeout(self.request_timeout))
    }

    fn operation_endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.api_base, name.trim().trim_start_matches('/'))
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        payload: &Value,
    ) -> Result<HttpResponse> {
        let api_key = self.api_key()?;
        for attempt in 0..=self.transport_retries {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(self.request_timeout)
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw)
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= self.transport_retries {
                        return Err(err);
                    }
                    thread::sleep(self.retry_backoff * (attempt as u32 + 1));
                }
            }
        }

        unreachable!("Gemini transport retry loop should always return a response or error")
    }
}

impl GenerationService for GeminiService {
    fn name(&self) -> &str {
        "gemini"
    }

    fn edit_image(&self, request: &EditRequest) -> Result<MediaRef> {
        let endpoint = self.endpoint_for_model(&request.model, "generateContent");
        let payload = build_edit_payload(&request.source, &request.prompt);
        let response = self.post_with_transport_retries(&endpoint, &payload)?;
        let response_payload = response_json_or_error("Gemini", response)?;
        match extract_first_image(&response_payload)? {
            Some(image) => Ok(image),
            None => {
                let note = extract_text(&response_payload);
                if note.is_empty() {
                    bail!("Gemini returned no image");
                }
                bail!("Gemini returned no image: {}", truncate_text(&note, 240))
            }
        }
    }

    fn submit_video(&self, request: &VideoRequest) -> Result<OperationHandle> {
        let endpoint = self.endpoint_for_model(&request.model, "predictLongRunning");
        let payload = build_video_payload(&request.prompt, request.source.as_ref());
        let response = self.post_with_transport_retries(&endpoint, &payload)?;
        let response_payload = response_json_or_error("Veo", response)?;
        let Some(name) = response_payload
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            bail!("Veo did not return an operation name");
        };
        Ok(OperationHandle {
            name: name.to_string(),
        })
    }

    fn poll_video(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        let endpoint = self.operation_endpoint(&handle.name);
        let response = self
            .keyed_get(&endpoint)?
            .send()
            .with_context(|| format!("Veo poll request failed ({})", handle.name))?;
        let payload = response_json_or_error("Veo poll", response)?;
        parse_operation_status(&payload)
    }

    fn download_video(&self, uri: &str) -> Result<MediaRef> {
        let response = self
            .keyed_get(uri)?
            .send()
            .context("failed downloading generated video")?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            bail!(
                "video download failed ({code}): {}",
                truncate_text(&body, 512)
            );
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .filter(|value| value.starts_with("video/"))
            .unwrap_or("video/mp4")
            .to_string();
        let bytes = response
            .bytes()
            .context("failed reading generated video bytes")?
            .to_vec();
        if bytes.is_empty() {
            bail!("downloaded video is empty");
        }
        Ok(MediaRef::new(content_type, bytes))
    }

    fn generate_text(&self, request: &TextRequest) -> Result<String> {
        let endpoint = self.endpoint_for_model(&request.model, "generateContent");
        let payload = build_text_payload(request);
        let response = self.post_with_transport_retries(&endpoint, &payload)?;
        let response_payload = response_json_or_error("Gemini", response)?;
        let text = extract_text(&response_payload);
        if text.is_empty() {
            let reason = block_reason(&response_payload);
            match reason {
                Some(reason) => bail!("Gemini returned no text ({reason})"),
                None => bail!("Gemini returned no text"),
            }
        }
        Ok(text)
    }
}

fn inline_part(media: &MediaRef) -> Value {
    json!({
        "inlineData": {
            "mimeType": media.content_type(),
            "data": media.to_base64(),
        }
    })
}

pub(crate) fn build_edit_payload(source: &MediaRef, prompt: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [inline_part(source), { "text": prompt }],
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE", "TEXT"],
        },
    })
}

pub(crate) fn build_video_payload(prompt: &str, source: Option<&MediaRef>) -> Value {
    let mut instance = Map::new();
    instance.insert("prompt".to_string(), Value::String(prompt.to_string()));
    if let Some(image) = source {
        instance.insert(
            "image".to_string(),
            json!({
                "bytesBase64Encoded": image.to_base64(),
                "mimeType": image.content_type(),
            }),
        );
    }
    json!({
        "instances": [Value::Object(instance)],
        "parameters": { "sampleCount": 1 },
    })
}

pub(crate) fn build_text_payload(request: &TextRequest) -> Value {
    let contents: Vec<Value> = request
        .turns
        .iter()
        .map(|turn| {
            let mut parts = Vec::new();
            if let Some(media) = turn.media.as_ref() {
                parts.push(inline_part(media));
            }
            if !turn.text.trim().is_empty() || parts.is_empty() {
                parts.push(json!({ "text": turn.text }));
            }
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            };
            json!({
                "role": role,
                "parts": parts,
            })
        })
        .collect();

    let mut payload = Map::new();
    payload.insert("contents".to_string(), Value::Array(contents));
    if let Some(system) = request
        .system
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        payload.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": system }] }),
        );
    }
    Value::Object(payload)
}

fn response_parts(response_payload: &Value) -> Vec<Value> {
    response_payload
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
        })
        .flatten()
        .cloned()
        .collect()
}

pub(crate) fn extract_first_image(response_payload: &Value) -> Result<Option<MediaRef>> {
    for part in response_parts(response_payload) {
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
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        if !mime_type.starts_with("image/") {
            continue;
        }
        let image = MediaRef::from_base64(mime_type, data)
            .context("Gemini image base64 decode failed")?;
        return Ok(Some(image));
    }
    Ok(None)
}

pub(crate) fn extract_text(response_payload: &Value) -> String {
    response_parts(response_payload)
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string()
}

fn block_reason(response_payload: &Value) -> Option<String> {
    if let Some(reason) = response_payload
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Some(format!("blocked: {reason}"));
    }
    response_payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|candidate| candidate.get("finishReason"))
        .and_then(Value::as_str)
        .filter(|reason| *reason != "STOP")
        .map(|reason| format!("finish reason: {reason}"))
}

pub(crate) fn parse_operation_status(payload: &Value) -> Result<OperationStatus> {
    if let Some(error) = payload.get("error").and_then(Value::as_object) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("Video generation failed ({code}): {message}");
    }
    if !payload.get("done").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(OperationStatus::Pending);
    }
    let response = payload.get("response");
    let samples = response
        .and_then(|value| value.get("generateVideoResponse"))
        .and_then(|value| value.get("generatedSamples"))
        .or_else(|| response.and_then(|value| value.get("generatedVideos")))
        .and_then(Value::as_array);
    let video_uri = samples
        .and_then(|rows| rows.first())
        .and_then(|sample| sample.get("video"))
        .and_then(|video| video.get("uri"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
        .map(str::to_string);
    Ok(OperationStatus::Done { video_uri })
}
