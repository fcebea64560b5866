use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StudioError;
use crate::features::append_to_prompt;
use crate::media::{AcceptClass, MediaKind, MediaRef};
use crate::slider::ComparisonSlider;
use crate::upload::{validate_upload, DropZone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    Describe,
    Generating,
    Result,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Describe => "describe",
            Self::Generating => "generating",
            Self::Result => "result",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    ImageEdit,
    VideoSynthesis,
    VideoAnalysis,
}

impl GenerationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageEdit => "image_edit",
            Self::VideoSynthesis => "video_synthesis",
            Self::VideoAnalysis => "video_analysis",
        }
    }

    pub fn supports(self, kind: MediaKind) -> bool {
        matches!(
            (self, kind),
            (Self::ImageEdit, MediaKind::Image)
                | (Self::VideoSynthesis, MediaKind::Image)
                | (Self::VideoAnalysis, MediaKind::Video)
        )
    }

    pub fn default_for(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => Self::ImageEdit,
            MediaKind::Video => Self::VideoAnalysis,
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ImageEdit => "Image edit",
            Self::VideoSynthesis => "Video synthesis",
            Self::VideoAnalysis => "Video analysis",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    EditedImage(MediaRef),
    Video(MediaRef),
    Analysis(String),
}

impl GenerationResult {
    pub fn mode(&self) -> GenerationMode {
        match self {
            Self::EditedImage(_) => GenerationMode::ImageEdit,
            Self::Video(_) => GenerationMode::VideoSynthesis,
            Self::Analysis(_) => GenerationMode::VideoAnalysis,
        }
    }

    pub fn media(&self) -> Option<&MediaRef> {
        match self {
            Self::EditedImage(media) | Self::Video(media) => Some(media),
            Self::Analysis(_) => None,
        }
    }

    pub fn analysis(&self) -> Option<&str> {
        match self {
            Self::Analysis(text) => Some(text),
            _ => None,
        }
    }

    pub fn download_file_name(&self, at: DateTime<Utc>) -> String {
        let stamp = at.format("%Y%m%d-%H%M%S");
        match self {
            Self::EditedImage(media) => {
                format!("lumen-edit-{stamp}.{}", media.file_extension())
            }
            Self::Video(_) => format!("lumen-video-{stamp}.mp4"),
            Self::Analysis(_) => format!("lumen-analysis-{stamp}.txt"),
        }
    }

    pub fn download_bytes(&self) -> &[u8] {
        match self {
            Self::EditedImage(media) | Self::Video(media) => media.bytes(),
            Self::Analysis(text) => text.as_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationTicket {
    pub mode: GenerationMode,
    pub source: MediaRef,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct Studio {
    accept: AcceptClass,
    stage: Stage,
    source: Option<MediaRef>,
    prompt: String,
    features: Vec<String>,
    result: Option<GenerationResult>,
    pending_mode: Option<GenerationMode>,
    error: Option<String>,
    slider: ComparisonSlider,
    drop_zone: DropZone,
    reading: bool,
    assisting: bool,
}

impl Default for Studio {
    fn default() -> Self {
        Self::new(AcceptClass::default())
    }
}

impl Studio {
    pub fn new(accept: AcceptClass) -> Self {
        Self {
            accept,
            stage: Stage::Upload,
            source: None,
            prompt: String::new(),
            features: Vec::new(),
            result: None,
            pending_mode: None,
            error: None,
            slider: ComparisonSlider::default(),
            drop_zone: DropZone::default(),
            reading: false,
            assisting: false,
        }
    }

    pub fn accept(&self) -> AcceptClass {
        self.accept
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn source(&self) -> Option<&MediaRef> {
        self.source.as_ref()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn result(&self) -> Option<&GenerationResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn slider(&self) -> &ComparisonSlider {
        &self.slider
    }

    pub fn slider_mut(&mut self) -> &mut ComparisonSlider {
        &mut self.slider
    }

    pub fn drop_zone_mut(&mut self) -> &mut DropZone {
        &mut self.drop_zone
    }

    pub fn is_reading(&self) -> bool {
        self.reading
    }

    pub fn is_assisting(&self) -> bool {
        self.assisting
    }

    pub fn default_mode(&self) -> Option<GenerationMode> {
        self.source
            .as_ref()
            .and_then(MediaRef::kind)
            .map(GenerationMode::default_for)
    }

    pub fn begin_upload(&mut self, content_type: &str) -> Result<(), StudioError> {
        self.drop_zone.drop();
        if self.reading {
            return Err(StudioError::Busy);
        }
        if self.stage != Stage::Upload {
            return Err(StudioError::InvalidTransition {
                action: "upload",
                stage: self.stage,
            });
        }
        if let Err(err) = validate_upload(self.accept, content_type) {
            self.error = Some(err.to_string());
            return Err(err);
        }
        self.error = None;
        self.reading = true;
        Ok(())
    }

    pub fn finish_upload(&mut self, media: MediaRef) -> Result<(), StudioError> {
        if !self.reading {
            return Err(StudioError::InvalidTransition {
                action: "finish an upload",
                stage: self.stage,
            });
        }
        self.reading = false;
        if let Err(err) = validate_upload(self.accept, media.content_type()) {
            self.error = Some(err.to_string());
            return Err(err);
        }
        self.source = Some(media);
        self.stage = Stage::Describe;
        Ok(())
    }

    pub fn upload_failed(&mut self, message: impl Into<String>) {
        self.reading = false;
        self.error = Some(message.into());
    }

    pub fn accept_upload(&mut self, media: MediaRef) -> Result<(), StudioError> {
        self.begin_upload(media.content_type())?;
        self.finish_upload(media)
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn insert_tag(&mut self, tag: &str) {
        self.prompt = append_to_prompt(&self.prompt, tag);
    }

    pub fn append_feature(&mut self, label: &str) {
        self.prompt = append_to_prompt(&self.prompt, label);
    }

    pub fn begin_assist(&mut self) -> Result<MediaRef, StudioError> {
        if self.stage != Stage::Describe {
            return Err(StudioError::InvalidTransition {
                action: "analyze the upload",
                stage: self.stage,
            });
        }
        if self.assisting {
            return Err(StudioError::Busy);
        }
        let source = self.source.clone().ok_or(StudioError::NoSource)?;
        self.assisting = true;
        self.error = None;
        Ok(source)
    }

    pub fn finish_suggestion(&mut self, suggestion: &str) {
        self.assisting = false;
        let trimmed = suggestion.trim();
        if !trimmed.is_empty() {
            self.prompt = trimmed.to_string();
        }
    }

    pub fn finish_scan(&mut self, labels: Vec<String>) {
        self.assisting = false;
        self.features = labels;
    }

    pub fn assist_failed(&mut self, err: StudioError) {
        self.assisting = false;
        self.error = Some(err.to_string());
    }

    pub fn begin_generation(
        &mut self,
        mode: GenerationMode,
    ) -> Result<GenerationTicket, StudioError> {
        if self.stage != Stage::Describe {
            return Err(StudioError::InvalidTransition {
                action: "generate",
                stage: self.stage,
            });
        }
        if self.assisting {
            return Err(StudioError::Busy);
        }
        let source = self.source.clone().ok_or(StudioError::NoSource)?;
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(StudioError::EmptyPrompt);
        }
        let Some(kind) = source.kind() else {
            return Err(StudioError::NoSource);
        };
        if !mode.supports(kind) {
            return Err(StudioError::UnsupportedMode {
                mode,
                media: kind.plural().to_string(),
            });
        }
        let ticket = GenerationTicket {
            mode,
            source,
            prompt: prompt.to_string(),
        };
        self.stage = Stage::Generating;
        self.pending_mode = Some(mode);
        self.error = None;
        Ok(ticket)
    }

    pub fn complete(&mut self, result: GenerationResult) -> Result<(), StudioError> {
        if self.stage != Stage::Generating || self.pending_mode != Some(result.mode()) {
            return Err(StudioError::InvalidTransition {
                action: "show a result",
                stage: self.stage,
            });
        }
        self.pending_mode = None;
        self.result = Some(result);
        self.slider.reset();
        self.stage = Stage::Result;
        Ok(())
    }

    pub fn fail(&mut self, err: StudioError) {
        if self.stage == Stage::Generating {
            self.stage = Stage::Describe;
        }
        self.pending_mode = None;
        self.error = Some(err.to_string());
    }

    pub fn refine(&mut self) -> Result<(), StudioError> {
        let edited = match (&self.stage, &self.result) {
            (Stage::Result, Some(GenerationResult::EditedImage(media))) => media.clone(),
            _ => {
                return Err(StudioError::InvalidTransition {
                    action: "refine",
                    stage: self.stage,
                })
            }
        };
        self.source = Some(edited);
        self.result = None;
        self.prompt.clear();
        self.features.clear();
        self.error = None;
        self.slider.reset();
        self.stage = Stage::Describe;
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.accept);
    }
}
