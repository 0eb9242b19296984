use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use closet_contracts::events::{ClosetEvent, EventWriter};
use closet_contracts::storage::{BlobStore, OutfitStore};
use closet_contracts::wardrobe::{Category, ClothingItem, GeneratedOutfit, NewClothingItem};
use serde_json::json;

use crate::loader::{mime_for_path, ImageSource};
use crate::map_object;
use crate::orchestrator::GarmentInput;

pub const ITEM_BUCKET: &str = "items";

/// Clothing item and outfit history management on top of the stores.
pub struct Wardrobe {
    store: Arc<dyn OutfitStore>,
    blobs: Arc<dyn BlobStore>,
    events: EventWriter,
}

impl Wardrobe {
    pub fn new(store: Arc<dyn OutfitStore>, blobs: Arc<dyn BlobStore>, events: EventWriter) -> Self {
        Self {
            store,
            blobs,
            events,
        }
    }

    /// Uploads the photo as `<category>_<uuid>.<ext>` and records the item.
    pub fn add_item(&self, name: &str, category: Category, path: &Path) -> Result<ClothingItem> {
        let name = name.trim();
        if name.is_empty() {
            bail!("item name must not be empty");
        }
        if mime_for_path(path).is_none() {
            bail!("unsupported image type: {}", path.display());
        }
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|value| value.to_str())
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_else(|| "png".to_string());
        let blob_name = format!("{}_{}.{}", category, uuid::Uuid::new_v4(), ext);
        let image_url = self
            .blobs
            .upload(ITEM_BUCKET, &blob_name, &bytes)
            .context("item upload failed")?;
        let item = self
            .store
            .insert_item(NewClothingItem {
                name: name.to_string(),
                category,
                image_url,
            })
            .context("item insert failed")?;
        tracing::info!(item_id = %item.id, category = %category, "item added");
        self.emit(
            ClosetEvent::ItemAdded,
            json!({ "item_id": item.id, "category": category.as_str(), "name": item.name }),
        );
        Ok(item)
    }

    pub fn list_items(&self, category: Category) -> Result<Vec<ClothingItem>> {
        Ok(self.store.list_items(category)?)
    }

    pub fn get_item(&self, item_id: &str) -> Result<ClothingItem> {
        self.store
            .get_item(item_id)?
            .with_context(|| format!("item '{item_id}' not found"))
    }

    /// Removes the row, then the backing blob. Once the row is gone the
    /// deletion stands; a blob that cannot be removed is logged and reported
    /// as `blob_deleted: false` in the event.
    pub fn delete_item(&self, item_id: &str) -> Result<ClothingItem> {
        let item = self
            .store
            .delete_item(item_id)
            .with_context(|| format!("failed deleting item '{item_id}'"))?;
        let blob_deleted = match item.blob_name() {
            Some(name) => match self.blobs.delete(ITEM_BUCKET, name) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(item_id, blob = name, error = %err, "orphaned item blob");
                    false
                }
            },
            None => {
                tracing::warn!(item_id, url = %item.image_url, "item has no blob name");
                false
            }
        };
        self.emit(
            ClosetEvent::ItemDeleted,
            json!({
                "item_id": item.id,
                "category": item.category.as_str(),
                "blob_deleted": blob_deleted,
            }),
        );
        Ok(item)
    }

    pub fn list_outfits(&self) -> Result<Vec<GeneratedOutfit>> {
        Ok(self.store.list_outfits()?)
    }

    pub fn set_liked(&self, outfit_id: &str, liked: bool) -> Result<GeneratedOutfit> {
        let outfit = self
            .store
            .set_outfit_liked(outfit_id, liked)
            .with_context(|| format!("failed updating outfit '{outfit_id}'"))?;
        self.emit(
            ClosetEvent::OutfitLiked,
            json!({ "outfit_id": outfit.id, "liked": outfit.is_liked }),
        );
        Ok(outfit)
    }

    /// Resolves a stored item into generation input, checking its category.
    pub fn garment(&self, item_id: &str, category: Category) -> Result<GarmentInput> {
        let item = self.get_item(item_id)?;
        if item.category != category {
            bail!("item '{item_id}' is a {}, not a {category}", item.category);
        }
        Ok(GarmentInput {
            id: Some(item.id),
            image: ImageSource::parse(&item.image_url),
        })
    }

    fn emit(&self, event: ClosetEvent, payload: serde_json::Value) {
        if let Err(err) = self.events.emit(event, map_object(payload)) {
            tracing::warn!(event = %event, error = %err, "failed writing event");
        }
    }
}
