use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use super::table::JsonTable;
use super::{OutfitStore, StoreError, StoreResult};
use crate::keys::GenerationKey;
use crate::wardrobe::{
    Category, ClothingItem, CompositeRow, GeneratedOutfit, NewClothingItem, NewGeneratedOutfit,
};

/// File-backed outfit store: one JSON table per logical table under `root`.
#[derive(Debug)]
pub struct LocalOutfitStore {
    root: PathBuf,
    inner: Mutex<LocalTables>,
}

#[derive(Debug)]
struct LocalTables {
    composites: JsonTable,
    items: JsonTable,
    outfits: JsonTable,
    last_stamp: Option<DateTime<Utc>>,
}

impl LocalTables {
    /// Strictly increasing within this store so "newest first" is stable
    /// even for rows written in the same microsecond.
    fn next_stamp(&mut self) -> String {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp.to_rfc3339_opts(SecondsFormat::Micros, false)
    }
}

impl LocalOutfitStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            inner: Mutex::new(LocalTables {
                composites: JsonTable::new(root.join("composites.json")),
                items: JsonTable::new(root.join("items.json")),
                outfits: JsonTable::new(root.join("outfits.json")),
                last_stamp: None,
            }),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, LocalTables>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("outfit store lock poisoned".to_string()))
    }
}

impl OutfitStore for LocalOutfitStore {
    fn find_composite(&self, top_id: &str, bottom_id: &str) -> StoreResult<Option<String>> {
        let key = GenerationKey::for_pair(top_id, bottom_id);
        let mut tables = self.tables()?;
        let row: Option<CompositeRow> = tables.composites.get_as(key.as_str())?;
        Ok(row.map(|row| row.image_url))
    }

    fn upsert_composite(
        &self,
        top_id: &str,
        bottom_id: &str,
        image_url: &str,
    ) -> StoreResult<CompositeRow> {
        let key = GenerationKey::for_pair(top_id, bottom_id);
        let mut tables = self.tables()?;
        let row = CompositeRow {
            top_id: top_id.to_string(),
            bottom_id: bottom_id.to_string(),
            image_url: image_url.to_string(),
            updated_at: tables.next_stamp(),
        };
        tables.composites.set(key.as_str(), &row)?;
        Ok(row)
    }

    fn insert_outfit(&self, outfit: NewGeneratedOutfit) -> StoreResult<GeneratedOutfit> {
        let mut tables = self.tables()?;
        let stamp = tables.next_stamp();
        let row = GeneratedOutfit {
            id: uuid::Uuid::new_v4().to_string(),
            top_id: outfit.top_id,
            bottom_id: outfit.bottom_id,
            generated_image_url: outfit.generated_image_url,
            is_liked: false,
            generator_source: outfit.generator_source,
            created_at: stamp.clone(),
            updated_at: stamp,
        };
        tables.outfits.set(&row.id, &row)?;
        Ok(row)
    }

    fn list_outfits(&self) -> StoreResult<Vec<GeneratedOutfit>> {
        let mut rows: Vec<GeneratedOutfit> = self.tables()?.outfits.rows_as()?;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    fn set_outfit_liked(&self, outfit_id: &str, liked: bool) -> StoreResult<GeneratedOutfit> {
        let mut tables = self.tables()?;
        let Some(mut row) = tables.outfits.get_as::<GeneratedOutfit>(outfit_id)? else {
            return Err(StoreError::NotFound {
                entity: "outfit",
                id: outfit_id.to_string(),
            });
        };
        if row.is_liked == liked {
            return Ok(row);
        }
        row.is_liked = liked;
        row.updated_at = tables.next_stamp();
        tables.outfits.set(outfit_id, &row)?;
        Ok(row)
    }

    fn list_items(&self, category: Category) -> StoreResult<Vec<ClothingItem>> {
        let mut rows: Vec<ClothingItem> = self.tables()?.items.rows_as()?;
        rows.retain(|item| item.category == category);
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    fn insert_item(&self, item: NewClothingItem) -> StoreResult<ClothingItem> {
        let mut tables = self.tables()?;
        let stamp = tables.next_stamp();
        let row = ClothingItem {
            id: uuid::Uuid::new_v4().to_string(),
            name: item.name,
            category: item.category,
            image_url: item.image_url,
            created_at: stamp.clone(),
            updated_at: stamp,
        };
        tables.items.set(&row.id, &row)?;
        Ok(row)
    }

    fn get_item(&self, item_id: &str) -> StoreResult<Option<ClothingItem>> {
        self.tables()?.items.get_as(item_id)
    }

    fn delete_item(&self, item_id: &str) -> StoreResult<ClothingItem> {
        let mut tables = self.tables()?;
        let Some(row) = tables.items.get_as::<ClothingItem>(item_id)? else {
            return Err(StoreError::NotFound {
                entity: "item",
                id: item_id.to_string(),
            });
        };
        tables.items.remove(item_id)?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::LocalOutfitStore;
    use crate::storage::{OutfitStore, StoreError};
    use crate::wardrobe::{Category, GeneratorSource, NewClothingItem, NewGeneratedOutfit};

    fn new_item(name: &str, category: Category) -> NewClothingItem {
        NewClothingItem {
            name: name.to_string(),
            category,
            image_url: format!("https://cdn.example/closet/{name}.png"),
        }
    }

    #[test]
    fn composite_upsert_is_last_write_wins_and_directional() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalOutfitStore::new(temp.path());

        assert_eq!(store.find_composite("t1", "b1")?, None);
        store.upsert_composite("t1", "b1", "https://x/one.png")?;
        store.upsert_composite("t1", "b1", "https://x/two.png")?;

        assert_eq!(
            store.find_composite("t1", "b1")?.as_deref(),
            Some("https://x/two.png")
        );
        assert_eq!(store.find_composite("b1", "t1")?, None);
        Ok(())
    }

    #[test]
    fn composites_are_shared_across_store_instances() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        LocalOutfitStore::new(temp.path()).upsert_composite("t1", "b1", "https://x/img.png")?;

        let other = LocalOutfitStore::new(temp.path());
        assert_eq!(
            other.find_composite("t1", "b1")?.as_deref(),
            Some("https://x/img.png")
        );
        Ok(())
    }

    #[test]
    fn items_list_by_category_newest_first() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalOutfitStore::new(temp.path());
        let first = store.insert_item(new_item("shirt", Category::Top))?;
        store.insert_item(new_item("jeans", Category::Bottom))?;
        let second = store.insert_item(new_item("blouse", Category::Top))?;

        let tops = store.list_items(Category::Top)?;
        let ids: Vec<&str> = tops.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);
        assert_eq!(store.list_items(Category::Bottom)?.len(), 1);
        Ok(())
    }

    #[test]
    fn delete_item_returns_row_and_rejects_unknown() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalOutfitStore::new(temp.path());
        let item = store.insert_item(new_item("shirt", Category::Top))?;

        let removed = store.delete_item(&item.id)?;
        assert_eq!(removed, item);
        assert_eq!(store.get_item(&item.id)?, None);
        assert!(matches!(
            store.delete_item(&item.id),
            Err(StoreError::NotFound { entity: "item", .. })
        ));
        Ok(())
    }

    #[test]
    fn outfits_append_and_toggle_like() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalOutfitStore::new(temp.path());
        let nano = NewGeneratedOutfit {
            top_id: None,
            bottom_id: None,
            generated_image_url: "https://x/nano.png".to_string(),
            generator_source: GeneratorSource::Nano,
        };
        let a = store.insert_outfit(nano.clone())?;
        let b = store.insert_outfit(nano)?;
        assert_ne!(a.id, b.id);
        assert!(!a.is_liked);

        let liked = store.set_outfit_liked(&a.id, true)?;
        assert!(liked.is_liked);
        assert!(liked.updated_at > a.updated_at);

        let history = store.list_outfits()?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, b.id);
        assert!(history[1].is_liked);
        assert!(store.set_outfit_liked("missing", true).is_err());
        Ok(())
    }
}
