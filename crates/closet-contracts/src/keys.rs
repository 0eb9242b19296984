//! Cache keys for generation requests.
//!
//! A [`GenerationKey`] is the identity of a logical generation request: the
//! same request always yields the same key, byte for byte. Components are
//! joined with [`KEY_DELIMITER`]; every component is escaped first so that a
//! component can never contain the delimiter (`%` becomes `%25`, `_` becomes
//! `%5F`). Keys are case-sensitive.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const KEY_DELIMITER: &str = "__";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationKey(String);

impl GenerationKey {
    /// Paired selection of two known clothing items. Directional: swapping
    /// top and bottom yields a different key.
    pub fn for_pair(top_id: &str, bottom_id: &str) -> Self {
        Self::join(&[escape_component(top_id), escape_component(bottom_id)])
    }

    /// Paired selection of anonymous inputs (no item ids), keyed by the
    /// reference locations and the prompt length.
    pub fn for_local_pair(top: &str, bottom: &str, body: &str, prompt_len: usize) -> Self {
        let digest = digest_parts(&[
            top.as_bytes(),
            bottom.as_bytes(),
            body.as_bytes(),
            prompt_len.to_string().as_bytes(),
        ]);
        Self::join(&["select-local".to_string(), digest])
    }

    /// Free-text styling, keyed by the occasion text's content.
    pub fn for_occasion(template_version: &str, occasion: &str) -> Self {
        Self::join(&[
            "nano".to_string(),
            escape_component(template_version),
            digest_parts(&[occasion.as_bytes()]),
        ])
    }

    /// Outfit transfer, keyed by a caller-chosen fingerprint of the
    /// inspiration image.
    pub fn for_transfer(template_version: &str, fingerprint: &str) -> Self {
        Self::join(&[
            "transfer".to_string(),
            escape_component(template_version),
            escape_component(fingerprint),
        ])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Components of the key with escaping undone.
    pub fn components(&self) -> Vec<String> {
        self.0.split(KEY_DELIMITER).map(unescape_component).collect()
    }

    fn join(parts: &[String]) -> Self {
        Self(parts.join(KEY_DELIMITER))
    }
}

impl fmt::Display for GenerationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cheap inspiration-image fingerprint: file name plus byte size. Not
/// content-addressed; two different files with the same name and size collide.
pub fn name_size_fingerprint(file_name: &str, size: usize) -> String {
    format!("{file_name}:{size}")
}

/// Content-addressed inspiration-image fingerprint.
pub fn content_fingerprint(bytes: &[u8]) -> String {
    digest_parts(&[bytes])
}

pub fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            other => out.push(other),
        }
    }
    out
}

pub fn unescape_component(raw: &str) -> String {
    raw.replace("%5F", "_").replace("%25", "%")
}

fn digest_parts(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}
