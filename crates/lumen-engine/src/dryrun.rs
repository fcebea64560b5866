use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use image::{DynamicImage, ImageFormat, Rgba};
use lumen_contracts::chat::ChatRole;
use lumen_contracts::MediaRef;
use sha2::{Digest, Sha256};

use crate::{
    truncate_text, EditRequest, GenerationService, OperationHandle, OperationStatus, TextRequest,
    VideoRequest,
};

const DRYRUN_VIDEO_SCHEME: &str = "dryrun://video/";
const TINT_STRENGTH: f32 = 0.35;

pub struct DryrunService {
    pending_polls: u32,
    submitted: AtomicU64,
    jobs: Mutex<HashMap<String, DryrunJob>>,
}

struct DryrunJob {
    prompt: String,
    remaining: u32,
}

impl Default for DryrunService {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DryrunService {
    pub fn new(pending_polls: u32) -> Self {
        Self {
            pending_polls,
            submitted: AtomicU64::new(0),
            jobs: Mutex::new(HashMap::new()),
        }
    }
}

impl GenerationService for DryrunService {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn edit_image(&self, request: &EditRequest) -> Result<MediaRef> {
        let source = image::load_from_memory(request.source.bytes())
            .context("dryrun edit could not decode the source image")?;
        let tinted = tint_image(source, color_from_prompt(&request.prompt));
        let mut encoded = Cursor::new(Vec::new());
        tinted
            .write_to(&mut encoded, ImageFormat::Png)
            .context("dryrun edit could not encode the result")?;
        Ok(MediaRef::new("image/png", encoded.into_inner()))
    }

    fn submit_video(&self, request: &VideoRequest) -> Result<OperationHandle> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| anyhow!("dryrun job table poisoned"))?;
        let name = format!(
            "operations/dryrun-{}-{}",
            short_id(&request.prompt),
            self.submitted.fetch_add(1, Ordering::SeqCst)
        );
        jobs.insert(
            name.clone(),
            DryrunJob {
                prompt: request.prompt.clone(),
                remaining: self.pending_polls,
            },
        );
        Ok(OperationHandle { name })
    }

    fn poll_video(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| anyhow!("dryrun job table poisoned"))?;
        let Some(job) = jobs.get_mut(&handle.name) else {
            bail!("unknown dryrun operation {}", handle.name);
        };
        if job.remaining > 0 {
            job.remaining -= 1;
            return Ok(OperationStatus::Pending);
        }
        Ok(OperationStatus::Done {
            video_uri: Some(format!("{DRYRUN_VIDEO_SCHEME}{}", handle.name)),
        })
    }

    fn download_video(&self, uri: &str) -> Result<MediaRef> {
        let Some(name) = uri.strip_prefix(DRYRUN_VIDEO_SCHEME) else {
            bail!("dryrun cannot download {uri}");
        };
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| anyhow!("dryrun job table poisoned"))?;
        let Some(job) = jobs.remove(name) else {
            bail!("unknown dryrun operation {name}");
        };
        Ok(MediaRef::new("video/mp4", placeholder_mp4(&job.prompt)))
    }

    fn generate_text(&self, request: &TextRequest) -> Result<String> {
        let Some(last) = request
            .turns
            .iter()
            .rev()
            .find(|turn| turn.role == ChatRole::User)
        else {
            bail!("dryrun text request has no user turn");
        };
        let attachment = last
            .media
            .as_ref()
            .map(|media| format!(" [{} {} bytes]", media.content_type(), media.len()))
            .unwrap_or_default();
        Ok(format!(
            "Dryrun reply to: {}{attachment}",
            truncate_text(last.text.trim(), 120)
        ))
    }
}

fn tint_image(source: DynamicImage, (r, g, b): (u8, u8, u8)) -> DynamicImage {
    let mut canvas = source.to_rgba8();
    for pixel in canvas.pixels_mut() {
        let Rgba([pr, pg, pb, pa]) = *pixel;
        *pixel = Rgba([blend(pr, r), blend(pg, g), blend(pb, b), pa]);
    }
    DynamicImage::ImageRgba8(canvas)
}

fn blend(base: u8, tint: u8) -> u8 {
    let mixed = base as f32 * (1.0 - TINT_STRENGTH) + tint as f32 * TINT_STRENGTH;
    mixed.round().clamp(0.0, 255.0) as u8
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(&digest[..4])
}

fn placeholder_mp4(prompt: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(64);
    bytes.extend_from_slice(&24u32.to_be_bytes());
    bytes.extend_from_slice(b"ftypisom");
    bytes.extend_from_slice(&0x200u32.to_be_bytes());
    bytes.extend_from_slice(b"isommp41");
    bytes.extend_from_slice(&Sha256::digest(prompt.as_bytes()));
    bytes
}
