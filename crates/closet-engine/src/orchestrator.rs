//! The three generation modes and the request pipeline in front of the paid
//! image model: in-flight guard, configuration check, memory tier, durable
//! composite tier, reference loading, rate limiter, retrying remote call,
//! persistence, and the local composite fallback for paired selections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use closet_contracts::events::{ClosetEvent, EventWriter};
use closet_contracts::keys::{content_fingerprint, name_size_fingerprint, GenerationKey};
use closet_contracts::storage::{BlobStore, OutfitStore};
use closet_contracts::wardrobe::GeneratorSource;
use serde::Serialize;
use serde_json::{json, Value};

use crate::cache::{CacheEntry, PersistRequest, TieredCache};
use crate::clock::{Clock, SystemClock};
use crate::compositor::{Compositor, StackCompositor};
use crate::config::{ClosetConfig, TransferFingerprint};
use crate::error::GenerationError;
use crate::limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
use crate::loader::{mime_for_path, FsImageLoader, ImageLoader, ImageSource, LoadedImage};
use crate::map_object;
use crate::prompts::{nano_prompt, select_prompt, transfer_prompt, PROMPT_TEMPLATE_VERSION};
use crate::remote::{
    GeminiTransport, GeneratedImage, GenerationTransport, InlineImage, RemoteRequest,
    RetryPolicy, RetryingCaller,
};

/// One garment of a paired selection. `id` is set for wardrobe items and
/// absent for ad-hoc local files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GarmentInput {
    pub id: Option<String>,
    pub image: ImageSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspirationImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// May be empty; the file extension decides then.
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Memory,
    Durable,
    Remote,
    Composite,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Durable => "durable",
            CacheTier::Remote => "remote",
            CacheTier::Composite => "composite",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedOutfitImage {
    pub url: String,
    pub is_composite: bool,
    /// Where the image came from on this call.
    pub tier: CacheTier,
    pub key: GenerationKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Ready(GeneratedOutfitImage),
    /// Another generation was already running; nothing was done.
    Busy,
    Failed(GenerationError),
}

impl GenerationOutcome {
    pub fn image(&self) -> Option<&GeneratedOutfitImage> {
        match self {
            GenerationOutcome::Ready(image) => Some(image),
            _ => None,
        }
    }
}

/// Releases the in-flight flag when dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct GenerationOrchestrator {
    model: String,
    body_reference: Option<ImageSource>,
    transfer_fingerprint: TransferFingerprint,
    transport: Option<Arc<dyn GenerationTransport>>,
    retry_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    limiter: Mutex<RateLimiter>,
    cache: TieredCache,
    loader: Arc<dyn ImageLoader>,
    compositor: Arc<dyn Compositor>,
    events: EventWriter,
    in_flight: AtomicBool,
    last_error: Mutex<Option<GenerationError>>,
}

impl GenerationOrchestrator {
    /// Wires the Gemini transport when an API key is configured. Without one
    /// every generation fails with a configuration error.
    pub fn new(
        config: &ClosetConfig,
        store: Arc<dyn OutfitStore>,
        blobs: Arc<dyn BlobStore>,
        events: EventWriter,
    ) -> Self {
        let transport = config.api_key.as_ref().map(|key| {
            Arc::new(GeminiTransport::new(
                Some(config.api_base.as_str()),
                key.clone(),
                config.request_timeout(),
            )) as Arc<dyn GenerationTransport>
        });
        Self {
            model: config.model.clone(),
            body_reference: config
                .body_reference
                .as_ref()
                .map(|path| ImageSource::Path(path.clone())),
            transfer_fingerprint: config.transfer_fingerprint,
            transport,
            retry_policy: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            limiter: Mutex::new(RateLimiter::new(config.rate_limit)),
            cache: TieredCache::new(store, blobs, config.bucket.clone()),
            loader: Arc::new(FsImageLoader::new(config.request_timeout())),
            compositor: Arc::new(StackCompositor),
            events,
            in_flight: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn GenerationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn ImageLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_compositor(mut self, compositor: Arc<dyn Compositor>) -> Self {
        self.compositor = compositor;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Error of the most recent non-busy generation, cleared by a success.
    pub fn last_error(&self) -> Option<GenerationError> {
        lock(&self.last_error).clone()
    }

    pub fn is_generating(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        lock(&self.limiter).status(self.clock.now_ms())
    }

    pub fn reconfigure_rate_limit(&self, config: RateLimitConfig) {
        lock(&self.limiter).reconfigure(config);
        tracing::info!(
            cooldown_ms = config.cooldown_ms,
            max_calls = config.max_calls,
            window_ms = config.window_ms,
            "rate limit reconfigured",
        );
    }

    /// Paired selection: dress the mannequin in `top` and `bottom`.
    pub fn generate_outfit(&self, top: &GarmentInput, bottom: &GarmentInput) -> GenerationOutcome {
        self.run(GeneratorSource::Select, || self.select_flow(top, bottom))
    }

    /// Free-text styling for an occasion.
    pub fn generate_nano_outfit(&self, occasion: &str) -> GenerationOutcome {
        self.run(GeneratorSource::Nano, || self.nano_flow(occasion))
    }

    /// Moves the outfit in an inspiration photo onto the mannequin.
    pub fn generate_outfit_transfer(&self, inspiration: &InspirationImage) -> GenerationOutcome {
        self.run(GeneratorSource::Transfer, || self.transfer_flow(inspiration))
    }

    fn run<F>(&self, source: GeneratorSource, flow: F) -> GenerationOutcome
    where
        F: FnOnce() -> Result<GeneratedOutfitImage, GenerationError>,
    {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::info!(mode = %source, "generation already in flight, skipping");
            self.emit(ClosetEvent::GenerationSkipped, json!({ "mode": source.as_str() }));
            return GenerationOutcome::Busy;
        };

        match flow() {
            Ok(image) => {
                *lock(&self.last_error) = None;
                GenerationOutcome::Ready(image)
            }
            Err(err) => {
                tracing::warn!(mode = %source, kind = err.kind(), error = %err, "generation failed");
                self.emit(
                    ClosetEvent::GenerationFailed,
                    json!({
                        "mode": source.as_str(),
                        "error_kind": err.kind(),
                        "error": err.to_string(),
                    }),
                );
                *lock(&self.last_error) = Some(err.clone());
                GenerationOutcome::Failed(err)
            }
        }
    }

    fn select_flow(
        &self,
        top: &GarmentInput,
        bottom: &GarmentInput,
    ) -> Result<GeneratedOutfitImage, GenerationError> {
        let (transport, body) = self.configured()?;
        let prompt = select_prompt();
        let ids = top.id.as_deref().zip(bottom.id.as_deref());
        let key = match ids {
            Some((top_id, bottom_id)) => GenerationKey::for_pair(top_id, bottom_id),
            None => GenerationKey::for_local_pair(
                &top.image.to_string(),
                &bottom.image.to_string(),
                &body.to_string(),
                prompt.len(),
            ),
        };
        if let Some(hit) = self.memory_hit(&key) {
            return Ok(hit);
        }
        if let Some((top_id, bottom_id)) = ids {
            match self.cache.lookup_composite(top_id, bottom_id) {
                Ok(Some(url)) => {
                    self.emit(
                        ClosetEvent::CacheHit,
                        json!({ "tier": CacheTier::Durable.as_str(), "key": key.as_str() }),
                    );
                    return Ok(GeneratedOutfitImage {
                        url,
                        is_composite: false,
                        tier: CacheTier::Durable,
                        key,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "durable composite lookup failed");
                }
            }
        }

        let body_image = self.loader.load(body)?;
        let top_image = self.loader.load(&top.image)?;
        let bottom_image = self.loader.load(&bottom.image)?;
        let images = vec![
            body_image.to_inline(),
            top_image.to_inline(),
            bottom_image.to_inline(),
        ];
        self.admit(GeneratorSource::Select, &key)?;

        match self.call_remote(transport, GeneratorSource::Select, &key, prompt, images) {
            Ok(image) => Ok(self.finish_remote(
                GeneratorSource::Select,
                key,
                ids,
                &image,
            )),
            Err(remote) => self.composite_fallback(key, remote, &top_image, &bottom_image),
        }
    }

    fn nano_flow(&self, occasion: &str) -> Result<GeneratedOutfitImage, GenerationError> {
        let (transport, body) = self.configured()?;
        let occasion = occasion.trim();
        let key = GenerationKey::for_occasion(PROMPT_TEMPLATE_VERSION, occasion);
        if let Some(hit) = self.memory_hit(&key) {
            return Ok(hit);
        }
        let body_image = self.loader.load(body)?;
        self.admit(GeneratorSource::Nano, &key)?;
        let image = self.call_remote(
            transport,
            GeneratorSource::Nano,
            &key,
            nano_prompt(occasion),
            vec![body_image.to_inline()],
        )?;
        Ok(self.finish_remote(GeneratorSource::Nano, key, None, &image))
    }

    fn transfer_flow(
        &self,
        inspiration: &InspirationImage,
    ) -> Result<GeneratedOutfitImage, GenerationError> {
        let (transport, body) = self.configured()?;
        let fingerprint = match self.transfer_fingerprint {
            TransferFingerprint::NameSize => {
                name_size_fingerprint(&inspiration.file_name, inspiration.bytes.len())
            }
            TransferFingerprint::Content => content_fingerprint(&inspiration.bytes),
        };
        let key = GenerationKey::for_transfer(PROMPT_TEMPLATE_VERSION, &fingerprint);
        if let Some(hit) = self.memory_hit(&key) {
            return Ok(hit);
        }
        let body_image = self.loader.load(body)?;
        let mime_type = if inspiration.mime_type.trim().is_empty() {
            mime_for_path(std::path::Path::new(&inspiration.file_name))
                .unwrap_or("image/png")
                .to_string()
        } else {
            inspiration.mime_type.clone()
        };
        let images = vec![
            body_image.to_inline(),
            InlineImage::from_bytes(mime_type, &inspiration.bytes),
        ];
        self.admit(GeneratorSource::Transfer, &key)?;
        let image = self.call_remote(
            transport,
            GeneratorSource::Transfer,
            &key,
            transfer_prompt(),
            images,
        )?;
        Ok(self.finish_remote(GeneratorSource::Transfer, key, None, &image))
    }

    fn configured(&self) -> Result<(Arc<dyn GenerationTransport>, &ImageSource), GenerationError> {
        let Some(transport) = self.transport.clone() else {
            return Err(GenerationError::Configuration(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string(),
            ));
        };
        let Some(body) = self.body_reference.as_ref() else {
            return Err(GenerationError::Configuration(
                "body_reference is not set".to_string(),
            ));
        };
        Ok((transport, body))
    }

    fn memory_hit(&self, key: &GenerationKey) -> Option<GeneratedOutfitImage> {
        let entry = self.cache.memory_get(key)?;
        self.emit(
            ClosetEvent::CacheHit,
            json!({ "tier": CacheTier::Memory.as_str(), "key": key.as_str() }),
        );
        Some(GeneratedOutfitImage {
            url: entry.url,
            is_composite: entry.is_composite,
            tier: CacheTier::Memory,
            key: key.clone(),
        })
    }

    /// Checks the limiter and records the call when allowed. Runs only once
    /// the request is fully built, right before the transport is invoked.
    fn admit(&self, source: GeneratorSource, key: &GenerationKey) -> Result<(), GenerationError> {
        let now_ms = self.clock.now_ms();
        let mut limiter = lock(&self.limiter);
        let decision = limiter.can_make_call(now_ms);
        if let (false, Some(reason)) = (decision.allowed, decision.reason) {
            drop(limiter);
            let wait_ms = decision.wait_time_ms.unwrap_or_default();
            self.emit(
                ClosetEvent::RateLimited,
                json!({
                    "mode": source.as_str(),
                    "key": key.as_str(),
                    "reason": reason.as_str(),
                    "wait_ms": wait_ms,
                }),
            );
            return Err(GenerationError::RateLimited { reason, wait_ms });
        }
        limiter.record_call(now_ms);
        Ok(())
    }

    fn call_remote(
        &self,
        transport: Arc<dyn GenerationTransport>,
        source: GeneratorSource,
        key: &GenerationKey,
        prompt: String,
        images: Vec<InlineImage>,
    ) -> Result<GeneratedImage, GenerationError> {
        let request = RemoteRequest {
            model: self.model.clone(),
            prompt,
            images,
        };
        self.emit(
            ClosetEvent::GenerationStarted,
            json!({
                "mode": source.as_str(),
                "key": key.as_str(),
                "model": request.model,
                "references": request.images.len(),
            }),
        );
        let caller =
            RetryingCaller::new(transport, self.clock.clone()).with_policy(self.retry_policy);
        caller.call_observed(&request, &mut |attempt: u32, delay: Duration| {
            self.emit(
                ClosetEvent::GenerationRetry,
                json!({
                    "mode": source.as_str(),
                    "key": key.as_str(),
                    "attempt": attempt,
                    "delay_ms": delay.as_millis() as u64,
                }),
            );
        })
    }

    /// Persists a fresh generation and caches it. Persistence problems
    /// degrade to the transient data URL.
    fn finish_remote(
        &self,
        source: GeneratorSource,
        key: GenerationKey,
        ids: Option<(&str, &str)>,
        image: &GeneratedImage,
    ) -> GeneratedOutfitImage {
        let persisted = self.cache.persist(PersistRequest {
            source,
            key: &key,
            top_id: ids.map(|(top_id, _)| top_id),
            bottom_id: ids.map(|(_, bottom_id)| bottom_id),
            image,
            stamp_ms: self.clock.now_ms(),
        });
        let (url, persisted) = match persisted {
            Ok(url) => (url, true),
            Err(err) => {
                tracing::warn!(mode = %source, key = %key, error = %err, "persisting generation failed");
                self.emit(
                    ClosetEvent::PersistenceFailed,
                    json!({ "mode": source.as_str(), "key": key.as_str(), "error": err.to_string() }),
                );
                (image.data_url(), false)
            }
        };
        self.cache
            .memory_put(key.clone(), CacheEntry::generated(url.clone()));
        self.emit(
            ClosetEvent::GenerationSucceeded,
            json!({
                "mode": source.as_str(),
                "key": key.as_str(),
                "tier": CacheTier::Remote.as_str(),
                "persisted": persisted,
                "url": persisted.then(|| url.clone()),
            }),
        );
        GeneratedOutfitImage {
            url,
            is_composite: false,
            tier: CacheTier::Remote,
            key,
        }
    }

    fn composite_fallback(
        &self,
        key: GenerationKey,
        remote: GenerationError,
        top: &LoadedImage,
        bottom: &LoadedImage,
    ) -> Result<GeneratedOutfitImage, GenerationError> {
        tracing::warn!(key = %key, error = %remote, "remote generation failed, compositing locally");
        match self.compositor.compose(top, bottom) {
            Ok(image) => {
                let url = image.data_url();
                self.cache
                    .memory_put(key.clone(), CacheEntry::composite(url.clone()));
                self.emit(
                    ClosetEvent::CompositeFallback,
                    json!({ "key": key.as_str(), "remote_error": remote.to_string() }),
                );
                Ok(GeneratedOutfitImage {
                    url,
                    is_composite: true,
                    tier: CacheTier::Composite,
                    key,
                })
            }
            Err(err) => Err(GenerationError::CompositeFallbackFailed {
                remote: remote.to_string(),
                fallback: format!("{err:#}"),
            }),
        }
    }

    fn emit(&self, event: ClosetEvent, payload: Value) {
        if let Err(err) = self.events.emit(event, map_object(payload)) {
            tracing::warn!(event = %event, error = %err, "failed writing event");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}
