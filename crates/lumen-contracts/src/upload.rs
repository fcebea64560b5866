use crate::error::StudioError;
use crate::media::AcceptClass;

/// Drag hover state. Active until the enter/leave nesting depth returns to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropZone {
    depth: u32,
    active: bool,
}

impl DropZone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drag_enter(&mut self) {
        self.depth = self.depth.saturating_add(1);
        self.active = true;
    }

    pub fn drag_leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.active = false;
        }
    }

    pub fn drop(&mut self) {
        self.depth = 0;
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}

pub fn validate_upload(accept: AcceptClass, content_type: &str) -> Result<(), StudioError> {
    if accept.accepts(content_type) {
        return Ok(());
    }
    Err(StudioError::InvalidUpload {
        content_type: if content_type.trim().is_empty() {
            "unknown".to_string()
        } else {
            content_type.trim().to_string()
        },
        expected: accept.describe().to_string(),
    })
}
