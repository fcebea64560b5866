mod registry;
mod selectors;

pub use registry::{
    ModelRegistry, ModelSpec, CAPABILITY_IMAGE_EDIT, CAPABILITY_TEXT, CAPABILITY_VIDEO,
    CAPABILITY_VISION,
};
pub use selectors::{ModelSelection, ModelSelector};
