use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let lowered = content_type.trim().to_ascii_lowercase();
        if lowered.starts_with("image/") {
            return Some(Self::Image);
        }
        if lowered.starts_with("video/") {
            return Some(Self::Video);
        }
        None
    }

    pub fn plural(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Video => "videos",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AcceptClass {
    Images,
    #[default]
    ImagesAndVideos,
}

impl AcceptClass {
    pub fn pattern(self) -> &'static str {
        match self {
            Self::Images => "image/*",
            Self::ImagesAndVideos => "image/*,video/*",
        }
    }

    pub fn accepts(self, content_type: &str) -> bool {
        match (self, MediaKind::from_content_type(content_type)) {
            (_, Some(MediaKind::Image)) => true,
            (Self::ImagesAndVideos, Some(MediaKind::Video)) => true,
            _ => false,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Images => "an image",
            Self::ImagesAndVideos => "an image or video",
        }
    }
}

/// Uploaded or generated media: content type plus shared, immutable bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaRef {
    content_type: String,
    bytes: Arc<[u8]>,
}

impl MediaRef {
    pub fn new(content_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into().trim().to_ascii_lowercase(),
            bytes: Arc::from(bytes.into()),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let Some(content_type) = content_type_for_path(path) else {
            bail!("cannot infer a content type for {}", path.display());
        };
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Self::new(content_type, bytes))
    }

    pub fn from_base64(content_type: &str, data: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(data.trim().as_bytes())
            .context("media base64 decode failed")?;
        Ok(Self::new(content_type, bytes))
    }

    pub fn from_data_url(url: &str) -> Result<Self> {
        let Some(rest) = url.trim().strip_prefix("data:") else {
            bail!("not a data URL");
        };
        let Some((header, payload)) = rest.split_once(',') else {
            bail!("data URL is missing its payload");
        };
        let Some(content_type) = header.strip_suffix(";base64") else {
            bail!("only base64 data URLs are supported");
        };
        if content_type.is_empty() {
            bail!("data URL is missing its content type");
        }
        Self::from_base64(content_type, payload)
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_content_type(&self.content_type)
    }

    pub fn is_image(&self) -> bool {
        self.kind() == Some(MediaKind::Image)
    }

    pub fn is_video(&self) -> bool {
        self.kind() == Some(MediaKind::Video)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, self.to_base64())
    }

    pub fn file_extension(&self) -> &'static str {
        extension_for_content_type(&self.content_type)
    }
}

impl fmt::Debug for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaRef")
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        "mp4" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "webm" => Some("video/webm"),
        "pdf" => Some("application/pdf"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}

pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let lowered = content_type.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    if lowered.contains("quicktime") {
        return "mov";
    }
    if lowered.contains("webm") {
        return "webm";
    }
    if lowered.starts_with("video/") {
        return "mp4";
    }
    if lowered.starts_with("text/") {
        return "txt";
    }
    "png"
}
