use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;

use crate::error::GenerationError;
use crate::remote::InlineImage;

/// Where a reference image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    /// `http(s)://` or `file://` URL.
    Url(String),
}

impl ImageSource {
    /// Strings that look like URLs become [`ImageSource::Url`]; anything else
    /// is a filesystem path.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("file://")
        {
            ImageSource::Url(trimmed.to_string())
        } else {
            ImageSource::Path(PathBuf::from(trimmed))
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Path(path) => write!(f, "{}", path.display()),
            ImageSource::Url(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl LoadedImage {
    pub fn to_inline(&self) -> InlineImage {
        InlineImage::from_bytes(self.mime_type.clone(), &self.bytes)
    }
}

pub trait ImageLoader: Send + Sync {
    fn load(&self, source: &ImageSource) -> Result<LoadedImage, GenerationError>;
}

/// Reads local paths and `file://` URLs from disk, fetches `http(s)` URLs.
pub struct FsImageLoader {
    http: HttpClient,
    timeout: Duration,
}

impl FsImageLoader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(),
            timeout,
        }
    }

    fn read_path(&self, path: &Path) -> Result<LoadedImage, GenerationError> {
        let bytes = fs::read(path).map_err(|err| {
            GenerationError::ReferenceImage(format!("failed reading {}: {err}", path.display()))
        })?;
        Ok(LoadedImage {
            mime_type: mime_for_path(path).unwrap_or("image/png").to_string(),
            bytes,
        })
    }

    fn fetch(&self, url: &str) -> Result<LoadedImage, GenerationError> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .map_err(|err| GenerationError::ReferenceImage(format!("failed fetching {url}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::ReferenceImage(format!(
                "failed fetching {url}: HTTP {}",
                status.as_u16()
            )));
        }
        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or_default().trim().to_string())
            .filter(|value| value.starts_with("image/"));
        let bytes = response
            .bytes()
            .map_err(|err| GenerationError::ReferenceImage(format!("failed reading {url}: {err}")))?
            .to_vec();
        let mime_type = header_mime
            .or_else(|| mime_for_path(Path::new(strip_query(url))).map(str::to_string))
            .unwrap_or_else(|| "image/png".to_string());
        Ok(LoadedImage { mime_type, bytes })
    }
}

impl ImageLoader for FsImageLoader {
    fn load(&self, source: &ImageSource) -> Result<LoadedImage, GenerationError> {
        match source {
            ImageSource::Path(path) => self.read_path(path),
            ImageSource::Url(url) => match url.strip_prefix("file://") {
                Some(path) => self.read_path(Path::new(path)),
                None => self.fetch(url),
            },
        }
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}
