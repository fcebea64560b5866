use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use lumen_contracts::chat::{ChatMessage, ChatRole, ChatSession};
use lumen_contracts::events::{EventPayload, EventWriter};
use lumen_contracts::features::parse_feature_labels;
use lumen_contracts::media::content_type_for_path;
use lumen_contracts::models::{
    ModelSelector, ModelSpec, CAPABILITY_IMAGE_EDIT, CAPABILITY_TEXT, CAPABILITY_VIDEO,
};
use lumen_contracts::{
    GenerationMode, GenerationResult, GenerationTicket, MediaRef, Stage, Studio, StudioError,
};
use reqwest::blocking::Response as HttpResponse;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub mod dryrun;
pub mod gemini;
pub mod poll;

pub use dryrun::DryrunService;
pub use gemini::GeminiService;
pub use poll::{wait_for_video, CancelFlag, PollProgress, VideoPollPolicy};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_CONFIG_SECONDS: f64 = 86_400.0;

const ANALYSIS_INSTRUCTION: &str = "You are a video analyst for home and landscape design. \
Answer the user's request about the attached video clearly and concisely, \
using short paragraphs or bullet points.";

const SUGGEST_INSTRUCTION: &str = "Analyze this upload and write one concise instruction \
(under 40 words) for an AI image editor that would noticeably improve its design. \
Reply with the instruction only.";

const SCAN_INSTRUCTION: &str = "List the distinct, editable design features visible in this \
upload, such as furniture, materials, plants or fixtures. Reply with short labels of at most \
four words, one per line, without commentary.";

const CHAT_INSTRUCTION: &str = "You are Lumen, a friendly interior and landscape design \
assistant. Give practical, specific advice. When the user attaches a photo, refer to what you \
see in it.";

#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub model: String,
    pub source: MediaRef,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoRequest {
    pub model: String,
    pub prompt: String,
    pub source: Option<MediaRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Done { video_uri: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextTurn {
    pub role: ChatRole,
    pub text: String,
    pub media: Option<MediaRef>,
}

impl From<&ChatMessage> for TextTurn {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            text: message.text.clone(),
            media: message.attachment.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRequest {
    pub model: String,
    pub system: Option<String>,
    pub turns: Vec<TextTurn>,
}

pub trait GenerationService: Send + Sync {
    fn name(&self) -> &str;
    fn edit_image(&self, request: &EditRequest) -> Result<MediaRef>;
    fn submit_video(&self, request: &VideoRequest) -> Result<OperationHandle>;
    fn poll_video(&self, handle: &OperationHandle) -> Result<OperationStatus>;
    fn download_video(&self, uri: &str) -> Result<MediaRef>;
    fn generate_text(&self, request: &TextRequest) -> Result<String>;
}

#[derive(Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Box<dyn GenerationService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: GenerationService + 'static>(&mut self, service: S) {
        self.services
            .insert(service.name().to_string(), Box::new(service));
    }

    pub fn get(&self, name: &str) -> Option<&dyn GenerationService> {
        self.services.get(name).map(|service| service.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }
}

fn default_service_registry(config: &EngineConfig) -> ServiceRegistry {
    let mut services = ServiceRegistry::new();
    services.register(DryrunService::default());
    services.register(GeminiService::new(
        &config.api_base,
        config.api_key.clone(),
        config.request_timeout,
        config.transport_retries,
    ));
    services
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub provider: String,
    pub api_key: Option<String>,
    pub api_base: String,
    pub image_model: Option<String>,
    pub video_model: Option<String>,
    pub text_model: Option<String>,
    pub poll: VideoPollPolicy,
    pub request_timeout: Duration,
    pub transport_retries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            api_key: None,
            api_base: gemini::DEFAULT_GEMINI_API_BASE.to_string(),
            image_model: None,
            video_model: None,
            text_model: None,
            poll: VideoPollPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            transport_retries: 0,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let seconds = |key: &str| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .filter(|value| value.is_finite() && (0.0..=MAX_CONFIG_SECONDS).contains(value))
                .map(Duration::from_secs_f64)
        };
        let poll_timeout = match seconds("LUMEN_POLL_TIMEOUT") {
            Some(value) if value.is_zero() => None,
            Some(value) => Some(value),
            None => defaults.poll.timeout,
        };
        Self {
            provider: lookup("LUMEN_PROVIDER")
                .map(|value| value.trim().to_ascii_lowercase())
                .unwrap_or(defaults.provider),
            api_key: lookup("GEMINI_API_KEY")
                .or_else(|| lookup("GOOGLE_API_KEY"))
                .or_else(|| lookup("API_KEY")),
            api_base: lookup("GEMINI_API_BASE")
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            image_model: lookup("LUMEN_IMAGE_MODEL"),
            video_model: lookup("LUMEN_VIDEO_MODEL"),
            text_model: lookup("LUMEN_TEXT_MODEL"),
            poll: VideoPollPolicy {
                interval: seconds("LUMEN_POLL_INTERVAL")
                    .filter(|value| !value.is_zero())
                    .unwrap_or(defaults.poll.interval),
                timeout: poll_timeout,
            },
            request_timeout: seconds("LUMEN_REQUEST_TIMEOUT")
                .filter(|value| !value.is_zero())
                .unwrap_or(defaults.request_timeout),
            transport_retries: lookup("LUMEN_TRANSPORT_RETRIES")
                .and_then(|raw| raw.trim().parse::<usize>().ok())
                .map(|value| value.min(4))
                .unwrap_or(defaults.transport_retries),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedModels {
    pub image: ModelSpec,
    pub video: ModelSpec,
    pub text: ModelSpec,
    pub fallback_reasons: Vec<String>,
}

fn resolve_models(config: &EngineConfig, provider: &str) -> Result<ResolvedModels> {
    let selector = ModelSelector::new(None);
    let mut fallback_reasons = Vec::new();
    let mut pick = |requested: Option<&str>, capability: &str| -> Result<ModelSpec> {
        let selection = selector
            .select(provider, requested, capability)
            .map_err(|reason| anyhow!(reason))?;
        if let Some(reason) = selection.fallback_reason {
            fallback_reasons.push(reason);
        }
        Ok(selection.model)
    };
    let image = pick(config.image_model.as_deref(), CAPABILITY_IMAGE_EDIT)?;
    let video = pick(config.video_model.as_deref(), CAPABILITY_VIDEO)?;
    let text = pick(config.text_model.as_deref(), CAPABILITY_TEXT)?;
    Ok(ResolvedModels {
        image,
        video,
        text,
        fallback_reasons,
    })
}

pub struct StudioEngine {
    services: ServiceRegistry,
    provider: String,
    models: ResolvedModels,
    poll: VideoPollPolicy,
    events: EventWriter,
}

impl StudioEngine {
    pub fn new(config: EngineConfig, events: EventWriter) -> Result<Self> {
        let services = default_service_registry(&config);
        Self::with_services(services, config, events)
    }

    pub fn with_services(
        services: ServiceRegistry,
        config: EngineConfig,
        events: EventWriter,
    ) -> Result<Self> {
        let provider = config.provider.trim().to_ascii_lowercase();
        if services.get(&provider).is_none() {
            bail!(
                "unknown provider '{provider}' (available: {})",
                services.names().join(", ")
            );
        }
        let models = resolve_models(&config, &provider)?;
        events.emit(
            "session_started",
            map_object(json!({
                "provider": provider,
                "image_model": models.image.name,
                "video_model": models.video.name,
                "text_model": models.text.name,
                "fallback_reasons": models.fallback_reasons,
                "poll_interval_s": config.poll.interval.as_secs_f64(),
                "poll_timeout_s": config.poll.timeout.map(|value| value.as_secs_f64()),
            })),
        )?;
        Ok(Self {
            services,
            provider,
            models,
            poll: config.poll,
            events,
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn poll_policy(&self) -> &VideoPollPolicy {
        &self.poll
    }

    pub fn models(&self) -> &ResolvedModels {
        &self.models
    }

    pub fn event_writer(&self) -> EventWriter {
        self.events.clone()
    }

    fn service(&self) -> Result<&dyn GenerationService> {
        self.services
            .get(&self.provider)
            .ok_or_else(|| anyhow!("provider '{}' is not registered", self.provider))
    }

    pub fn upload_path(&self, studio: &mut Studio, path: &Path) -> Result<()> {
        let content_type = content_type_for_path(path).unwrap_or("application/octet-stream");
        if let Err(err) = studio.begin_upload(content_type) {
            self.emit_upload_rejected(&err, content_type)?;
            return Err(err.into());
        }
        match fs::read(path) {
            Ok(bytes) => self.finish_upload(studio, MediaRef::new(content_type, bytes)),
            Err(err) => {
                let message = format!("failed reading {}: {err}", path.display());
                studio.upload_failed(message.clone());
                Err(anyhow!(message))
            }
        }
    }

    pub fn upload_media(&self, studio: &mut Studio, media: MediaRef) -> Result<()> {
        if let Err(err) = studio.begin_upload(media.content_type()) {
            self.emit_upload_rejected(&err, media.content_type())?;
            return Err(err.into());
        }
        self.finish_upload(studio, media)
    }

    fn finish_upload(&self, studio: &mut Studio, media: MediaRef) -> Result<()> {
        let payload = map_object(json!({
            "content_type": media.content_type(),
            "bytes": media.len(),
            "sha256": media_digest(&media),
        }));
        studio.finish_upload(media)?;
        self.events.emit("upload_accepted", payload)?;
        Ok(())
    }

    fn emit_upload_rejected(&self, err: &StudioError, content_type: &str) -> Result<()> {
        self.events.emit(
            "upload_rejected",
            map_object(json!({
                "content_type": content_type,
                "reason": err.to_string(),
            })),
        )?;
        Ok(())
    }

    pub fn generate(
        &self,
        studio: &mut Studio,
        mode: GenerationMode,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let ticket = studio.begin_generation(mode)?;
        let started = Instant::now();
        let logged = self.events.emit(
            "generation_started",
            map_object(json!({
                "mode": mode.as_str(),
                "prompt": ticket.prompt,
                "source_content_type": ticket.source.content_type(),
                "model": self.model_for(mode).name,
            })),
        );
        if let Err(err) = logged {
            studio.fail(StudioError::service(&err));
            return Err(err);
        }

        match self.dispatch(&ticket, cancel) {
            Ok(result) => {
                let payload = result_event_payload(&result, started.elapsed());
                studio.complete(result)?;
                self.events.emit("generation_finished", payload)?;
                Ok(())
            }
            Err(err) => {
                let studio_err = StudioError::service(&err);
                studio.fail(studio_err.clone());
                self.events.emit(
                    "generation_failed",
                    map_object(json!({
                        "mode": mode.as_str(),
                        "error": error_chain_text(&err, 512),
                        "latency_s": started.elapsed().as_secs_f64(),
                    })),
                )?;
                Err(anyhow::Error::new(studio_err).context(format!("{mode} failed")))
            }
        }
    }

    fn model_for(&self, mode: GenerationMode) -> &ModelSpec {
        match mode {
            GenerationMode::ImageEdit => &self.models.image,
            GenerationMode::VideoSynthesis => &self.models.video,
            GenerationMode::VideoAnalysis => &self.models.text,
        }
    }

    pub fn dispatch(
        &self,
        ticket: &GenerationTicket,
        cancel: &CancelFlag,
    ) -> Result<GenerationResult> {
        let service = self.service()?;
        match ticket.mode {
            GenerationMode::ImageEdit => {
                let edited = service.edit_image(&EditRequest {
                    model: self.models.image.name.clone(),
                    source: ticket.source.clone(),
                    prompt: ticket.prompt.clone(),
                })?;
                if !edited.is_image() {
                    bail!(
                        "{} returned {} instead of an image",
                        service.name(),
                        edited.content_type()
                    );
                }
                Ok(GenerationResult::EditedImage(edited))
            }
            GenerationMode::VideoSynthesis => {
                let video = self.synthesize_video(service, ticket, cancel)?;
                Ok(GenerationResult::Video(video))
            }
            GenerationMode::VideoAnalysis => {
                let text = service.generate_text(&TextRequest {
                    model: self.models.text.name.clone(),
                    system: Some(ANALYSIS_INSTRUCTION.to_string()),
                    turns: vec![TextTurn {
                        role: ChatRole::User,
                        text: ticket.prompt.clone(),
                        media: Some(ticket.source.clone()),
                    }],
                })?;
                let text = text.trim();
                if text.is_empty() {
                    bail!("{} returned an empty analysis", service.name());
                }
                Ok(GenerationResult::Analysis(text.to_string()))
            }
        }
    }

    fn synthesize_video(
        &self,
        service: &dyn GenerationService,
        ticket: &GenerationTicket,
        cancel: &CancelFlag,
    ) -> Result<MediaRef> {
        let handle = service.submit_video(&VideoRequest {
            model: self.models.video.name.clone(),
            prompt: ticket.prompt.clone(),
            source: ticket.source.is_image().then(|| ticket.source.clone()),
        })?;
        self.events.emit(
            "video_submitted",
            map_object(json!({ "operation": handle.name })),
        )?;
        let uri = wait_for_video(service, &handle, &self.poll, cancel, |progress| {
            self.events.emit(
                "video_poll",
                map_object(json!({
                    "operation": handle.name,
                    "attempt": progress.attempt,
                    "elapsed_s": progress.elapsed.as_secs_f64(),
                })),
            )?;
            Ok(())
        })?;
        service
            .download_video(&uri)
            .with_context(|| format!("fetching video for {}", handle.name))
    }

    pub fn suggest_prompt(&self, studio: &mut Studio) -> Result<()> {
        let source = studio.begin_assist()?;
        match self.describe_source(&source, SUGGEST_INSTRUCTION) {
            Ok(text) => {
                studio.finish_suggestion(&text);
                self.events.emit(
                    "prompt_suggested",
                    map_object(json!({ "prompt": studio.prompt() })),
                )?;
                Ok(())
            }
            Err(err) => self.assist_failed(studio, "suggest", err),
        }
    }

    pub fn scan_features(&self, studio: &mut Studio) -> Result<()> {
        let source = studio.begin_assist()?;
        match self.describe_source(&source, SCAN_INSTRUCTION) {
            Ok(text) => {
                studio.finish_scan(parse_feature_labels(&text));
                self.events.emit(
                    "features_scanned",
                    map_object(json!({ "features": studio.features() })),
                )?;
                Ok(())
            }
            Err(err) => self.assist_failed(studio, "scan", err),
        }
    }

    fn describe_source(&self, source: &MediaRef, instruction: &str) -> Result<String> {
        self.service()?.generate_text(&TextRequest {
            model: self.models.text.name.clone(),
            system: None,
            turns: vec![TextTurn {
                role: ChatRole::User,
                text: instruction.to_string(),
                media: Some(source.clone()),
            }],
        })
    }

    fn assist_failed(&self, studio: &mut Studio, action: &str, err: anyhow::Error) -> Result<()> {
        let studio_err = StudioError::service(&err);
        studio.assist_failed(studio_err.clone());
        self.events.emit(
            "assist_failed",
            map_object(json!({
                "action": action,
                "error": error_chain_text(&err, 512),
            })),
        )?;
        Err(anyhow::Error::new(studio_err).context(format!("{action} failed")))
    }

    pub fn chat(&self, session: &mut ChatSession, text: &str) -> Result<Option<ChatMessage>> {
        let Some((history, turn)) = session.begin_turn(text) else {
            return Ok(None);
        };
        let started = Instant::now();
        let mut turns: Vec<TextTurn> = history.iter().map(TextTurn::from).collect();
        turns.push(TextTurn::from(&turn));
        let reply = self.service().and_then(|service| {
            service.generate_text(&TextRequest {
                model: self.models.text.name.clone(),
                system: Some(CHAT_INSTRUCTION.to_string()),
                turns,
            })
        });
        let failure = reply.as_ref().err().map(|err| error_chain_text(err, 512));
        let message = session
            .finish_turn(reply.map_err(|err| err.to_string()))
            .clone();
        match failure {
            Some(error) => self.events.emit(
                "chat_failed",
                map_object(json!({
                    "turn": session.transcript().len(),
                    "error": error,
                })),
            )?,
            None => self.events.emit(
                "chat_turn",
                map_object(json!({
                    "turn": session.transcript().len(),
                    "has_attachment": turn.attachment.is_some(),
                    "latency_s": started.elapsed().as_secs_f64(),
                })),
            )?,
        };
        Ok(Some(message))
    }

    pub fn save_result(&self, studio: &Studio, out_dir: &Path) -> Result<PathBuf> {
        let Some(result) = studio.result().filter(|_| studio.stage() == Stage::Result) else {
            bail!("there is no result to save yet");
        };
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
        let path = out_dir.join(result.download_file_name(chrono::Utc::now()));
        let bytes = result.download_bytes();
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        self.events.emit(
            "artifact_saved",
            map_object(json!({
                "path": path.to_string_lossy(),
                "mode": result.mode().as_str(),
                "bytes": bytes.len(),
                "sha256": hex::encode(Sha256::digest(bytes)),
            })),
        )?;
        Ok(path)
    }
}

fn result_event_payload(result: &GenerationResult, elapsed: Duration) -> EventPayload {
    let mut payload = map_object(json!({
        "mode": result.mode().as_str(),
        "latency_s": elapsed.as_secs_f64(),
    }));
    match result {
        GenerationResult::EditedImage(media) | GenerationResult::Video(media) => {
            payload.insert(
                "content_type".to_string(),
                Value::String(media.content_type().to_string()),
            );
            payload.insert("bytes".to_string(), json!(media.len()));
            payload.insert("sha256".to_string(), Value::String(media_digest(media)));
        }
        GenerationResult::Analysis(text) => {
            payload.insert("chars".to_string(), json!(text.chars().count()));
        }
    }
    payload
}

pub fn new_session_id() -> String {
    format!("session-{}", uuid::Uuid::new_v4().simple())
}

fn media_digest(media: &MediaRef) -> String {
    hex::encode(Sha256::digest(media.bytes()))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&service_error_message(&body), 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn service_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|parsed| {
            parsed
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

pub(crate) fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| reqwest_err.is_timeout() || reqwest_err.is_connect())
            .unwrap_or(false)
    })
}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, RgbImage};
    use lumen_contracts::chat::CHAT_APOLOGY;
    use lumen_contracts::AcceptClass;
    use tempfile::TempDir;

    use super::*;

    struct ScriptedService {
        reply: std::result::Result<String, String>,
    }

    impl GenerationService for ScriptedService {
        fn name(&self) -> &str {
            "scripted"
        }

        fn edit_image(&self, _request: &EditRequest) -> Result<MediaRef> {
            bail!("Gemini request failed (503): model overloaded")
        }

        fn submit_video(&self, _request: &VideoRequest) -> Result<OperationHandle> {
            bail!("video quota exhausted")
        }

        fn poll_video(&self, _handle: &OperationHandle) -> Result<OperationStatus> {
            bail!("unused")
        }

        fn download_video(&self, _uri: &str) -> Result<MediaRef> {
            bail!("unused")
        }

        fn generate_text(&self, _request: &TextRequest) -> Result<String> {
            self.reply.clone().map_err(|err| anyhow!(err))
        }
    }

    fn png_bytes() -> anyhow::Result<Vec<u8>> {
        let mut encoded = Cursor::new(Vec::new());
        let canvas = RgbImage::from_pixel(4, 4, image::Rgb([90, 120, 60]));
        DynamicImage::ImageRgb8(canvas).write_to(&mut encoded, ImageFormat::Png)?;
        Ok(encoded.into_inner())
    }

    fn fast_config(provider: &str) -> EngineConfig {
        EngineConfig {
            provider: provider.to_string(),
            poll: VideoPollPolicy {
                interval: Duration::from_millis(1),
                timeout: Some(Duration::from_secs(30)),
            },
            ..EngineConfig::default()
        }
    }

    fn dryrun_engine(events: EventWriter, pending_polls: u32) -> Result<StudioEngine> {
        let mut services = ServiceRegistry::new();
        services.register(DryrunService::new(pending_polls));
        StudioEngine::with_services(services, fast_config("dryrun"), events)
    }

    fn scripted_engine(
        events: EventWriter,
        reply: std::result::Result<&str, &str>,
    ) -> Result<StudioEngine> {
        let mut services = ServiceRegistry::new();
        services.register(ScriptedService {
            reply: reply.map(str::to_string).map_err(str::to_string),
        });
        let config = EngineConfig {
            image_model: Some("scripted-image".to_string()),
            video_model: Some("scripted-video".to_string()),
            text_model: Some("scripted-text".to_string()),
            ..fast_config("scripted")
        };
        StudioEngine::with_services(services, config, events)
    }

    fn event_types(path: &Path) -> anyhow::Result<Vec<String>> {
        let raw = fs::read_to_string(path)?;
        raw.lines()
            .map(|line| {
                let event: Value = serde_json::from_str(line)?;
                Ok(event["type"].as_str().unwrap_or_default().to_string())
            })
            .collect()
    }

    fn block_events_dir(dir: &Path) -> anyhow::Result<()> {
        fs::remove_dir_all(dir)?;
        fs::write(dir, "not a directory")?;
        Ok(())
    }

    #[test]
    fn unwritable_event_log_does_not_strand_generation() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let logs = temp.path().join("logs");
        let engine = dryrun_engine(EventWriter::new(logs.join("events.jsonl"), "session-test"), 0)?;
        let mut studio = Studio::default();
        engine.upload_media(&mut studio, MediaRef::new("image/png", png_bytes()?))?;
        studio.set_prompt("Add a pool");

        block_events_dir(&logs)?;
        let err = engine
            .generate(&mut studio, GenerationMode::ImageEdit, &CancelFlag::new())
            .unwrap_err();
        assert!(format!("{err:#}").contains("events log"));
        assert_eq!(studio.stage(), Stage::Describe);
        assert_eq!(studio.prompt(), "Add a pool");
        assert!(studio.error().is_some());

        fs::remove_file(&logs)?;
        engine.generate(&mut studio, GenerationMode::ImageEdit, &CancelFlag::new())?;
        assert_eq!(studio.stage(), Stage::Result);
        Ok(())
    }

    #[test]
    fn unwritable_event_log_does_not_leave_scan_busy() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let logs = temp.path().join("logs");
        let events = EventWriter::new(logs.join("events.jsonl"), "session-test");
        let engine = scripted_engine(events, Ok("Sofa\nRug"))?;
        let mut studio = Studio::default();
        engine.upload_media(&mut studio, MediaRef::new("image/jpeg", vec![0xff, 0xd8]))?;

        block_events_dir(&logs)?;
        assert!(engine.scan_features(&mut studio).is_err());
        assert!(!studio.is_assisting());
        assert_eq!(studio.features(), ["Sofa", "Rug"]);

        fs::remove_file(&logs)?;
        engine.suggest_prompt(&mut studio)?;
        assert_eq!(studio.prompt(), "Sofa\nRug");
        Ok(())
    }

    #[test]
    fn config_reads_keys_and_poll_settings() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("GOOGLE_API_KEY", "google-key"),
            ("API_KEY", "fallback-key"),
            ("LUMEN_PROVIDER", " DryRun "),
            ("GEMINI_API_BASE", "https://proxy.test/v1beta/"),
            ("LUMEN_POLL_INTERVAL", "2.5"),
            ("LUMEN_POLL_TIMEOUT", "600"),
            ("LUMEN_REQUEST_TIMEOUT", "not-a-number"),
        ]);
        let config = EngineConfig::from_lookup(|key| {
            vars.get(key).map(|value| value.to_string())
        });
        assert_eq!(config.provider, "dryrun");
        assert_eq!(config.api_key.as_deref(), Some("google-key"));
        assert_eq!(config.api_base, "https://proxy.test/v1beta");
        assert_eq!(config.poll.interval, Duration::from_millis(2500));
        assert_eq!(config.poll.timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn zero_poll_timeout_means_unbounded() {
        let config = EngineConfig::from_lookup(|key| {
            (key == "LUMEN_POLL_TIMEOUT").then(|| "0".to_string())
        });
        assert_eq!(config.poll.timeout, None);
        assert_eq!(config.poll.interval, poll::DEFAULT_POLL_INTERVAL);
        assert_eq!(config.provider, "gemini");
        assert_eq!(config.api_key, None);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = StudioEngine::with_services(
            ServiceRegistry::new(),
            fast_config("openai"),
            EventWriter::disabled("test"),
        )
        .err()
        .map(|err| err.to_string())
        .unwrap_or_default();
        assert!(err.contains("unknown provider 'openai'"));
    }

    #[test]
    fn image_edit_flow_reaches_result_and_logs_events() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let photo = temp.path().join("kitchen.png");
        fs::write(&photo, png_bytes()?)?;
        let events_path = temp.path().join("events.jsonl");
        let engine = dryrun_engine(EventWriter::new(&events_path, "session-test"), 0)?;
        assert_eq!(engine.models().image.name, "dryrun-image-1");

        let mut studio = Studio::new(AcceptClass::Images);
        engine.upload_path(&mut studio, &photo)?;
        assert_eq!(studio.stage(), Stage::Describe);
        studio.set_prompt("Change cabinets to white");
        engine.generate(&mut studio, GenerationMode::ImageEdit, &CancelFlag::new())?;

        assert_eq!(studio.stage(), Stage::Result);
        let edited = studio
            .result()
            .and_then(GenerationResult::media)
            .map(|media| media.content_type().to_string());
        assert_eq!(edited.as_deref(), Some("image/png"));
        assert_eq!(
            event_types(&events_path)?,
            vec![
                "session_started",
                "upload_accepted",
                "generation_started",
                "generation_finished"
            ]
        );
        Ok(())
    }

    #[test]
    fn rejected_upload_stays_on_upload() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let notes = temp.path().join("notes.txt");
        fs::write(&notes, "not a photo")?;
        let events_path = temp.path().join("events.jsonl");
        let engine = dryrun_engine(EventWriter::new(&events_path, "session-test"), 0)?;

        let mut studio = Studio::new(AcceptClass::Images);
        let err = engine.upload_path(&mut studio, &notes).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StudioError>(),
            Some(StudioError::InvalidUpload { .. })
        ));
        assert_eq!(studio.stage(), Stage::Upload);
        assert!(studio.error().is_some());
        assert_eq!(
            event_types(&events_path)?,
            vec!["session_started", "upload_rejected"]
        );
        Ok(())
    }

    #[test]
    fn video_synthesis_polls_until_done() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let events_path = temp.path().join("events.jsonl");
        let engine = dryrun_engine(EventWriter::new(&events_path, "session-test"), 2)?;

        let mut studio = Studio::default();
        engine.upload_media(&mut studio, MediaRef::new("image/png", png_bytes()?))?;
        studio.set_prompt("Slow pan across the terrace at dusk");
        engine.generate(&mut studio, GenerationMode::VideoSynthesis, &CancelFlag::new())?;

        assert_eq!(studio.stage(), Stage::Result);
        let is_video = studio
            .result()
            .and_then(GenerationResult::media)
            .map(MediaRef::is_video);
        assert_eq!(is_video, Some(true));
        assert_eq!(
            event_types(&events_path)?,
            vec![
                "session_started",
                "upload_accepted",
                "generation_started",
                "video_submitted",
                "video_poll",
                "video_poll",
                "generation_finished"
            ]
        );
        Ok(())
    }

    #[test]
    fn cancelled_video_returns_to_describe() -> anyhow::Result<()> {
        let engine = dryrun_engine(EventWriter::disabled("test"), 5)?;
        let mut studio = Studio::default();
        engine.upload_media(&mut studio, MediaRef::new("image/png", png_bytes()?))?;
        studio.set_prompt("Animate the fountain");
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = engine
            .generate(&mut studio, GenerationMode::VideoSynthesis, &cancel)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<StudioError>(),
            Some(&StudioError::Cancelled)
        );
        assert_eq!(studio.stage(), Stage::Describe);
        assert_eq!(studio.prompt(), "Animate the fountain");
        Ok(())
    }

    #[test]
    fn video_analysis_returns_text() -> anyhow::Result<()> {
        let engine = dryrun_engine(EventWriter::disabled("test"), 0)?;
        let mut studio = Studio::default();
        engine.upload_media(&mut studio, MediaRef::new("video/mp4", vec![0, 0, 0, 24]))?;
        assert_eq!(studio.default_mode(), Some(GenerationMode::VideoAnalysis));
        studio.set_prompt("What materials are visible?");
        engine.generate(&mut studio, GenerationMode::VideoAnalysis, &CancelFlag::new())?;

        let analysis = studio.result().and_then(GenerationResult::analysis);
        assert_eq!(
            analysis,
            Some("Dryrun reply to: What materials are visible? [video/mp4 4 bytes]")
        );
        Ok(())
    }

    #[test]
    fn service_failure_keeps_prompt_and_reports_error() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let events_path = temp.path().join("events.jsonl");
        let events = EventWriter::new(&events_path, "session-test");
        let engine = scripted_engine(events, Ok("unused"))?;
        let mut studio = Studio::default();
        engine.upload_media(&mut studio, MediaRef::new("image/jpeg", vec![0xff, 0xd8]))?;
        studio.set_prompt("Add a pergola");

        let err = engine
            .generate(&mut studio, GenerationMode::ImageEdit, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StudioError>(),
            Some(StudioError::Service(message)) if message.contains("model overloaded")
        ));
        assert_eq!(studio.stage(), Stage::Describe);
        assert_eq!(studio.prompt(), "Add a pergola");
        assert!(studio
            .error()
            .map(|message| message.contains("503"))
            .unwrap_or(false));
        assert_eq!(
            event_types(&events_path)?.last().map(String::as_str),
            Some("generation_failed")
        );
        Ok(())
    }

    #[test]
    fn scan_and_suggest_fill_describe_state() -> anyhow::Result<()> {
        let engine = scripted_engine(
            EventWriter::disabled("test"),
            Ok("- Leather sofa\n- Jute rug\n- leather sofa"),
        )?;
        let mut studio = Studio::default();
        engine.upload_media(&mut studio, MediaRef::new("image/jpeg", vec![0xff, 0xd8]))?;

        engine.scan_features(&mut studio)?;
        assert_eq!(studio.features(), ["Leather sofa", "Jute rug"]);
        assert!(!studio.is_assisting());

        engine.suggest_prompt(&mut studio)?;
        assert_eq!(studio.prompt(), "- Leather sofa\n- Jute rug\n- leather sofa");
        Ok(())
    }

    #[test]
    fn failed_scan_records_error_and_unblocks() -> anyhow::Result<()> {
        let engine = scripted_engine(EventWriter::disabled("test"), Err("quota exceeded"))?;
        let mut studio = Studio::default();
        engine.upload_media(&mut studio, MediaRef::new("image/jpeg", vec![0xff, 0xd8]))?;
        studio.set_prompt("keep me");

        assert!(engine.scan_features(&mut studio).is_err());
        assert!(!studio.is_assisting());
        assert_eq!(studio.prompt(), "keep me");
        assert!(studio.features().is_empty());
        assert!(studio
            .error()
            .map(|message| message.contains("quota exceeded"))
            .unwrap_or(false));
        Ok(())
    }

    #[test]
    fn chat_failure_becomes_apology() -> anyhow::Result<()> {
        let engine = scripted_engine(EventWriter::disabled("test"), Err("network down"))?;
        let mut session = ChatSession::new();

        let reply = engine.chat(&mut session, "How do I brighten a north room?")?;
        assert_eq!(reply.map(|message| message.text), Some(CHAT_APOLOGY.to_string()));
        assert_eq!(session.transcript().len(), 2);
        assert!(!session.is_sending());
        Ok(())
    }

    #[test]
    fn chat_sends_history_and_attachment() -> anyhow::Result<()> {
        let engine = dryrun_engine(EventWriter::disabled("test"), 0)?;
        let mut session = ChatSession::new();
        assert!(engine.chat(&mut session, "   ")?.is_none());

        assert!(session.attach(MediaRef::new("image/png", vec![1, 2, 3])));
        let reply = engine.chat(&mut session, "Which paint suits this?")?;
        assert_eq!(
            reply.map(|message| message.text).as_deref(),
            Some("Dryrun reply to: Which paint suits this? [image/png 3 bytes]")
        );
        assert!(session.pending_attachment().is_none());
        assert_eq!(session.transcript().len(), 2);
        Ok(())
    }

    #[test]
    fn save_result_writes_timestamped_file() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let engine = dryrun_engine(EventWriter::disabled("test"), 0)?;
        let mut studio = Studio::default();
        assert!(engine.save_result(&studio, temp.path()).is_err());

        engine.upload_media(&mut studio, MediaRef::new("image/png", png_bytes()?))?;
        studio.set_prompt("Warmer lighting");
        engine.generate(&mut studio, GenerationMode::ImageEdit, &CancelFlag::new())?;
        let saved = engine.save_result(&studio, &temp.path().join("out"))?;

        let name = saved
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        assert!(name.starts_with("lumen-edit-"));
        assert!(name.ends_with(".png"));
        assert!(image::load_from_memory(&fs::read(&saved)?).is_ok());
        Ok(())
    }

    #[test]
    fn error_chain_text_dedupes_and_truncates() {
        let err = anyhow!("socket closed")
            .context("socket closed")
            .context("Gemini request failed");
        assert_eq!(
            error_chain_text(&err, 200),
            "Gemini request failed | caused by: socket closed"
        );
        assert_eq!(error_chain_text(&err, 6), "Gemini…");
    }

    #[test]
    fn google_error_bodies_surface_their_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(service_error_message(body), "API key not valid.");
        assert_eq!(service_error_message(" plain failure "), "plain failure");
    }
}
