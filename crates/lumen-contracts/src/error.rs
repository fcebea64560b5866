use thiserror::Error;

use crate::studio::{GenerationMode, Stage};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StudioError {
    #[error("Unsupported file type '{content_type}'. Please upload {expected}.")]
    InvalidUpload {
        content_type: String,
        expected: String,
    },

    #[error("Another operation is still in progress.")]
    Busy,

    #[error("Describe the change you want before generating.")]
    EmptyPrompt,

    #[error("Upload a photo or video first.")]
    NoSource,

    #[error("{mode} is not available for {media}.")]
    UnsupportedMode { mode: GenerationMode, media: String },

    #[error("Cannot {action} during the {stage} step.")]
    InvalidTransition { action: &'static str, stage: Stage },

    #[error("{0}")]
    Service(String),

    #[error("Video generation finished without a downloadable video.")]
    MissingVideoUri,

    #[error("Video generation was cancelled.")]
    Cancelled,

    #[error("Video generation timed out after {seconds:.1}s.")]
    TimedOut { seconds: f64 },
}

impl StudioError {
    pub fn service(err: &anyhow::Error) -> Self {
        if let Some(studio) = err.downcast_ref::<StudioError>() {
            return studio.clone();
        }
        StudioError::Service(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_upload_message_names_expected_class() {
        let err = StudioError::InvalidUpload {
            content_type: "application/pdf".to_string(),
            expected: "an image".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("application/pdf"));
        assert!(text.contains("an image"));
    }

    #[test]
    fn timeout_message_keeps_fractional_seconds() {
        let err = StudioError::TimedOut { seconds: 0.5 };
        assert_eq!(err.to_string(), "Video generation timed out after 0.5s.");
    }

    #[test]
    fn service_preserves_typed_errors_inside_anyhow() {
        let err = anyhow::Error::new(StudioError::MissingVideoUri);
        assert_eq!(StudioError::service(&err), StudioError::MissingVideoUri);

        let err = anyhow::anyhow!("Gemini request failed (500): boom");
        assert_eq!(
            StudioError::service(&err),
            StudioError::Service("Gemini request failed (500): boom".to_string())
        );
    }

    #[test]
    fn transition_error_mentions_stage() {
        let err = StudioError::InvalidTransition {
            action: "refine",
            stage: Stage::Upload,
        };
        assert_eq!(err.to_string(), "Cannot refine during the upload step.");
    }
}
