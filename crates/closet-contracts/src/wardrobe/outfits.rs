use std::fmt;

use serde::{Deserialize, Serialize};

/// Which generation mode produced an outfit image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorSource {
    Select,
    Nano,
    Transfer,
}

impl GeneratorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneratorSource::Select => "select",
            GeneratorSource::Nano => "nano",
            GeneratorSource::Transfer => "transfer",
        }
    }
}

impl fmt::Display for GeneratorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only log entry written after every persisted generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedOutfit {
    pub id: String,
    pub top_id: Option<String>,
    pub bottom_id: Option<String>,
    pub generated_image_url: String,
    #[serde(default)]
    pub is_liked: bool,
    pub generator_source: GeneratorSource,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGeneratedOutfit {
    pub top_id: Option<String>,
    pub bottom_id: Option<String>,
    pub generated_image_url: String,
    pub generator_source: GeneratorSource,
}

/// Durable composite lookup row for one directional (top, bottom) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeRow {
    pub top_id: String,
    pub bottom_id: String,
    pub image_url: String,
    pub updated_at: String,
}
