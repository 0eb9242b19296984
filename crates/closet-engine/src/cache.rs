//! Session memory tier, durable composite lookup, and blob-backed persistence
//! for generated outfit images.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use closet_contracts::keys::GenerationKey;
use closet_contracts::storage::{BlobStore, OutfitStore, StoreResult};
use closet_contracts::wardrobe::{GeneratorSource, NewGeneratedOutfit};
use sha2::{Digest, Sha256};

use crate::error::GenerationError;
use crate::remote::GeneratedImage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub url: String,
    /// True when the image is a local composite rather than a generation.
    pub is_composite: bool,
}

impl CacheEntry {
    pub fn generated(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            is_composite: false,
        }
    }

    pub fn composite(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            is_composite: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PersistRequest<'a> {
    pub source: GeneratorSource,
    pub key: &'a GenerationKey,
    pub top_id: Option<&'a str>,
    pub bottom_id: Option<&'a str>,
    pub image: &'a GeneratedImage,
    pub stamp_ms: i64,
}

pub struct TieredCache {
    memory: Mutex<HashMap<GenerationKey, CacheEntry>>,
    store: Arc<dyn OutfitStore>,
    blobs: Arc<dyn BlobStore>,
    bucket: String,
}

impl TieredCache {
    pub fn new(
        store: Arc<dyn OutfitStore>,
        blobs: Arc<dyn BlobStore>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            store,
            blobs,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn memory_get(&self, key: &GenerationKey) -> Option<CacheEntry> {
        self.memory().get(key).cloned()
    }

    pub fn memory_put(&self, key: GenerationKey, entry: CacheEntry) {
        self.memory().insert(key, entry);
    }

    pub fn memory_len(&self) -> usize {
        self.memory().len()
    }

    pub fn clear_memory(&self) {
        self.memory().clear();
    }

    /// Durable tier lookup for a directional pair. A hit is written back to
    /// memory under the pair key.
    pub fn lookup_composite(&self, top_id: &str, bottom_id: &str) -> StoreResult<Option<String>> {
        let Some(url) = self.store.find_composite(top_id, bottom_id)? else {
            return Ok(None);
        };
        self.memory_put(
            GenerationKey::for_pair(top_id, bottom_id),
            CacheEntry::generated(url.clone()),
        );
        Ok(Some(url))
    }

    /// Uploads the image, then records it. Select generations with both ids
    /// also upsert the composite row. Returns the public URL.
    pub fn persist(&self, request: PersistRequest<'_>) -> Result<String, GenerationError> {
        let bytes = request
            .image
            .decode_bytes()
            .map_err(|err| GenerationError::PersistenceFailed(format!("image decode: {err}")))?;
        let name = blob_name(&request);
        let url = self
            .blobs
            .upload(&self.bucket, &name, &bytes)
            .map_err(|err| GenerationError::PersistenceFailed(err.to_string()))?;

        if request.source == GeneratorSource::Select {
            if let (Some(top_id), Some(bottom_id)) = (request.top_id, request.bottom_id) {
                self.store
                    .upsert_composite(top_id, bottom_id, &url)
                    .map_err(|err| GenerationError::PersistenceFailed(err.to_string()))?;
            }
        }
        self.store
            .insert_outfit(NewGeneratedOutfit {
                top_id: request.top_id.map(str::to_string),
                bottom_id: request.bottom_id.map(str::to_string),
                generated_image_url: url.clone(),
                generator_source: request.source,
            })
            .map_err(|err| GenerationError::PersistenceFailed(err.to_string()))?;
        Ok(url)
    }

    fn memory(&self) -> MutexGuard<'_, HashMap<GenerationKey, CacheEntry>> {
        self.memory.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// `<mode>_<id-or-hash>_<timestamp_ms>.<ext>`
fn blob_name(request: &PersistRequest<'_>) -> String {
    let tag = match (request.top_id, request.bottom_id) {
        (Some(top_id), Some(bottom_id)) => {
            format!("{}-{}", sanitize(top_id), sanitize(bottom_id))
        }
        _ => {
            let digest = hex::encode(Sha256::digest(request.key.as_str().as_bytes()));
            digest[..16].to_string()
        }
    };
    format!(
        "{}_{}_{}.{}",
        request.source,
        tag,
        request.stamp_ms,
        request.image.extension()
    )
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' {
                ch
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use closet_contracts::keys::GenerationKey;
    use closet_contracts::storage::{
        BlobStore, LocalBlobStore, LocalOutfitStore, OutfitStore, StoreError, StoreResult,
    };
    use closet_contracts::wardrobe::GeneratorSource;

    use super::{blob_name, CacheEntry, PersistRequest, TieredCache};
    use crate::error::GenerationError;
    use crate::remote::GeneratedImage;

    struct BrokenBlobs;

    impl BlobStore for BrokenBlobs {
        fn upload(&self, _bucket: &str, _name: &str, _bytes: &[u8]) -> StoreResult<String> {
            Err(StoreError::Unavailable("bucket offline".to_string()))
        }

        fn delete(&self, _bucket: &str, _name: &str) -> StoreResult<()> {
            Ok(())
        }

        fn public_url(&self, bucket: &str, name: &str) -> String {
            format!("https://blobs.test/{bucket}/{name}")
        }
    }

    fn png_image() -> GeneratedImage {
        GeneratedImage {
            mime_type: "image/png".to_string(),
            data: "aW1n".to_string(),
        }
    }

    fn local_cache(root: &std::path::Path) -> (TieredCache, Arc<LocalOutfitStore>) {
        let store = Arc::new(LocalOutfitStore::new(root.join("db")));
        let blobs = Arc::new(LocalBlobStore::new(root.join("blobs"), Some("https://x".to_string())));
        (TieredCache::new(store.clone(), blobs, "outfits"), store)
    }

    #[test]
    fn memory_put_is_idempotent() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (cache, _) = local_cache(temp.path());
        let key = GenerationKey::for_pair("t1", "b1");
        cache.memory_put(key.clone(), CacheEntry::generated("https://x/a.png"));
        cache.memory_put(key.clone(), CacheEntry::generated("https://x/a.png"));
        assert_eq!(cache.memory_len(), 1);
        assert_eq!(
            cache.memory_get(&key),
            Some(CacheEntry::generated("https://x/a.png"))
        );
        cache.clear_memory();
        assert_eq!(cache.memory_get(&key), None);
        Ok(())
    }

    #[test]
    fn composite_lookup_writes_back_to_memory() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (cache, store) = local_cache(temp.path());
        store.upsert_composite("t1", "b1", "https://x/img.png")?;

        assert_eq!(cache.lookup_composite("b1", "t1")?, None);
        assert_eq!(cache.memory_len(), 0);

        assert_eq!(
            cache.lookup_composite("t1", "b1")?,
            Some("https://x/img.png".to_string())
        );
        assert_eq!(
            cache.memory_get(&GenerationKey::for_pair("t1", "b1")),
            Some(CacheEntry::generated("https://x/img.png"))
        );
        Ok(())
    }

    #[test]
    fn persist_select_upserts_and_appends() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (cache, store) = local_cache(temp.path());
        let key = GenerationKey::for_pair("t1", "b1");
        let image = png_image();

        let url = cache.persist(PersistRequest {
            source: GeneratorSource::Select,
            key: &key,
            top_id: Some("t1"),
            bottom_id: Some("b1"),
            image: &image,
            stamp_ms: 1_700_000_000_123,
        })?;
        assert_eq!(url, "https://x/outfits/select_t1-b1_1700000000123.png");
        assert_eq!(
            std::fs::read(temp.path().join("blobs/outfits/select_t1-b1_1700000000123.png"))?,
            b"img"
        );
        assert_eq!(store.find_composite("t1", "b1")?, Some(url.clone()));

        let outfits = store.list_outfits()?;
        assert_eq!(outfits.len(), 1);
        assert_eq!(outfits[0].generated_image_url, url);
        assert_eq!(outfits[0].generator_source, GeneratorSource::Select);
        Ok(())
    }

    #[test]
    fn persist_nano_only_appends() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (cache, store) = local_cache(temp.path());
        let key = GenerationKey::for_occasion("v2", "gala");
        let image = png_image();

        let url = cache.persist(PersistRequest {
            source: GeneratorSource::Nano,
            key: &key,
            top_id: None,
            bottom_id: None,
            image: &image,
            stamp_ms: 5,
        })?;
        assert!(url.starts_with("https://x/outfits/nano_"));
        assert!(url.ends_with("_5.png"));
        let outfits = store.list_outfits()?;
        assert_eq!(outfits.len(), 1);
        assert_eq!(outfits[0].top_id, None);
        Ok(())
    }

    #[test]
    fn upload_failure_is_persistence_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = Arc::new(LocalOutfitStore::new(temp.path()));
        let cache = TieredCache::new(store.clone(), Arc::new(BrokenBlobs), "outfits");
        let key = GenerationKey::for_pair("t1", "b1");
        let image = png_image();

        let err = cache
            .persist(PersistRequest {
                source: GeneratorSource::Select,
                key: &key,
                top_id: Some("t1"),
                bottom_id: Some("b1"),
                image: &image,
                stamp_ms: 1,
            })
            .unwrap_err();
        assert!(matches!(err, GenerationError::PersistenceFailed(_)));
        assert!(store.list_outfits()?.is_empty());
        Ok(())
    }

    #[test]
    fn blob_names_sanitize_ids_and_hash_keys() {
        let key = GenerationKey::for_pair("top 1", "b/2");
        let image = GeneratedImage {
            mime_type: "image/jpeg".to_string(),
            data: String::new(),
        };
        let name = blob_name(&PersistRequest {
            source: GeneratorSource::Select,
            key: &key,
            top_id: Some("top 1"),
            bottom_id: Some("b/2"),
            image: &image,
            stamp_ms: 9,
        });
        assert_eq!(name, "select_top-1-b-2_9.jpg");

        let transfer_key = GenerationKey::for_transfer("v2", "look.jpg:2048");
        let name = blob_name(&PersistRequest {
            source: GeneratorSource::Transfer,
            key: &transfer_key,
            top_id: None,
            bottom_id: None,
            image: &image,
            stamp_ms: 9,
        });
        assert!(name.starts_with("transfer_"));
        assert_eq!(name.len(), "transfer_".len() + 16 + "_9.jpg".len());
    }
}
