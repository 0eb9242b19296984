//! Persistence boundary: the relational outfit store and blob storage.
//!
//! The engine only talks to these traits. `LocalOutfitStore` and
//! `LocalBlobStore` are the on-disk adapters used by the CLI and the tests.

mod blob;
mod local;
mod table;

use crate::wardrobe::{
    Category, ClothingItem, CompositeRow, GeneratedOutfit, NewClothingItem, NewGeneratedOutfit,
};

pub use blob::LocalBlobStore;
pub use local::LocalOutfitStore;
pub use table::JsonTable;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage io failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage payload for {path} is invalid: {source}")]
    Serde {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid blob name '{0}'")]
    InvalidName(String),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait OutfitStore: Send + Sync {
    fn find_composite(&self, top_id: &str, bottom_id: &str) -> StoreResult<Option<String>>;

    /// Idempotent, last write wins.
    fn upsert_composite(&self, top_id: &str, bottom_id: &str, image_url: &str)
        -> StoreResult<CompositeRow>;

    /// Append-only; the store assigns the id and timestamps.
    fn insert_outfit(&self, outfit: NewGeneratedOutfit) -> StoreResult<GeneratedOutfit>;

    /// Newest first.
    fn list_outfits(&self) -> StoreResult<Vec<GeneratedOutfit>>;

    fn set_outfit_liked(&self, outfit_id: &str, liked: bool) -> StoreResult<GeneratedOutfit>;

    /// Newest first.
    fn list_items(&self, category: Category) -> StoreResult<Vec<ClothingItem>>;

    fn insert_item(&self, item: NewClothingItem) -> StoreResult<ClothingItem>;

    fn get_item(&self, item_id: &str) -> StoreResult<Option<ClothingItem>>;

    /// Removes the row and returns it so the caller can delete the backing blob.
    fn delete_item(&self, item_id: &str) -> StoreResult<ClothingItem>;
}

pub trait BlobStore: Send + Sync {
    /// Writes `bytes` under `name`, overwriting any existing blob, and
    /// returns its public URL.
    fn upload(&self, bucket: &str, name: &str, bytes: &[u8]) -> StoreResult<String>;

    fn delete(&self, bucket: &str, name: &str) -> StoreResult<()>;

    fn public_url(&self, bucket: &str, name: &str) -> String;
}
