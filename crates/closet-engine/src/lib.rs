pub mod cache;
pub mod clock;
pub mod compositor;
pub mod config;
pub mod error;
pub mod limiter;
pub mod loader;
pub mod orchestrator;
pub mod prompts;
pub mod remote;
pub mod wardrobe;

use serde_json::{Map, Value};

pub use cache::{CacheEntry, TieredCache};
pub use config::{ClosetConfig, TransferFingerprint};
pub use error::GenerationError;
pub use limiter::{RateLimitConfig, RateLimitDecision, RateLimitStatus, RateLimiter};
pub use loader::ImageSource;
pub use orchestrator::{
    CacheTier, GarmentInput, GeneratedOutfitImage, GenerationOrchestrator, GenerationOutcome,
    InspirationImage,
};
pub use wardrobe::Wardrobe;

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
