use indexmap::IndexMap;

pub const CAPABILITY_IMAGE_EDIT: &str = "image_edit";
pub const CAPABILITY_VIDEO: &str = "video";
pub const CAPABILITY_TEXT: &str = "text";
pub const CAPABILITY_VISION: &str = "vision";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub context_window: Option<u64>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str, provider: Option<&str>) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .filter(|model| provider.map_or(true, |name| model.provider == name))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str,
                      provider: &str,
                      capabilities: &[&str],
                      context_window: Option<u64>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                context_window,
            },
        );
    };

    insert(
        "gemini-2.5-flash-image-preview",
        "gemini",
        &[CAPABILITY_IMAGE_EDIT],
        None,
    );
    insert(
        "gemini-2.5-flash-image",
        "gemini",
        &[CAPABILITY_IMAGE_EDIT],
        None,
    );
    insert(
        "gemini-2.5-flash",
        "gemini",
        &[CAPABILITY_TEXT, CAPABILITY_VISION],
        Some(1_048_576),
    );
    insert(
        "gemini-2.5-pro",
        "gemini",
        &[CAPABILITY_TEXT, CAPABILITY_VISION],
        Some(1_048_576),
    );
    insert("veo-2.0-generate-001", "gemini", &[CAPABILITY_VIDEO], None);
    insert("veo-3.0-generate-preview", "gemini", &[CAPABILITY_VIDEO], None);
    insert("dryrun-image-1", "dryrun", &[CAPABILITY_IMAGE_EDIT], None);
    insert("dryrun-video-1", "dryrun", &[CAPABILITY_VIDEO], None);
    insert(
        "dryrun-text-1",
        "dryrun",
        &[CAPABILITY_TEXT, CAPABILITY_VISION],
        Some(8192),
    );

    map
}
