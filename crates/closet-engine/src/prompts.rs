//! Prompt templates. Cache keys for nano and transfer embed
//! [`PROMPT_TEMPLATE_VERSION`], so bump it whenever wording changes.

pub const PROMPT_TEMPLATE_VERSION: &str = "v2";

/// Reference order: mannequin, top, bottom.
pub fn select_prompt() -> String {
    format!(
        "[closet prompt {PROMPT_TEMPLATE_VERSION}] \
Dress the person in the first image in the top from the second image and the \
bottoms from the third image. Preserve the person's identity, face, body shape \
and pose exactly. Reproduce each garment's color, pattern and fit faithfully. \
Full-body shot on a pure white background (#FFFFFF), no props, no text."
    )
}

/// Reference order: mannequin.
pub fn nano_prompt(occasion: &str) -> String {
    format!(
        "[closet prompt {PROMPT_TEMPLATE_VERSION}] \
Style the person in the reference image in a complete outfit suited to this \
occasion: \"{}\". Preserve the person's identity, face, body shape and pose \
exactly. Full-body shot on a pure white background (#FFFFFF), no props, no text.",
        occasion.trim()
    )
}

/// Reference order: mannequin, inspiration photo.
pub fn transfer_prompt() -> String {
    format!(
        "[closet prompt {PROMPT_TEMPLATE_VERSION}] \
Take the complete outfit worn in the second image and dress the person in the \
first image in it. Ignore the second image's person, pose and background. \
Preserve the first person's identity, face, body shape and pose exactly. \
Full-body shot on a pure white background (#FFFFFF), no props, no text."
    )
}
