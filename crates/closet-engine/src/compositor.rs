use std::io::Cursor;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::loader::LoadedImage;
use crate::remote::GeneratedImage;

const MAX_COMPOSITE_WIDTH: u32 = 1024;

/// Local stand-in for a generated outfit when the remote call fails.
pub trait Compositor: Send + Sync {
    fn compose(&self, top: &LoadedImage, bottom: &LoadedImage) -> Result<GeneratedImage>;
}

/// Stacks the top above the bottom on a white canvas, both scaled to a shared
/// width, and encodes the result as PNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackCompositor;

impl Compositor for StackCompositor {
    fn compose(&self, top: &LoadedImage, bottom: &LoadedImage) -> Result<GeneratedImage> {
        let top = image::load_from_memory(&top.bytes).context("failed decoding top image")?;
        let bottom =
            image::load_from_memory(&bottom.bytes).context("failed decoding bottom image")?;

        let width = top.width().max(bottom.width()).clamp(1, MAX_COMPOSITE_WIDTH);
        let top = scale_to_width(&top, width);
        let bottom = scale_to_width(&bottom, width);

        let height = top.height() + bottom.height();
        let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
        imageops::overlay(&mut canvas, &top, centered(width, top.width()), 0);
        imageops::overlay(
            &mut canvas,
            &bottom,
            centered(width, bottom.width()),
            i64::from(top.height()),
        );

        let mut encoded = Vec::new();
        DynamicImage::ImageRgba8(canvas)
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .context("failed encoding composite")?;
        Ok(GeneratedImage {
            mime_type: "image/png".to_string(),
            data: BASE64.encode(encoded),
        })
    }
}

fn scale_to_width(source: &DynamicImage, width: u32) -> RgbaImage {
    if source.width() == width {
        return source.to_rgba8();
    }
    let height = ((u64::from(source.height()) * u64::from(width)) / u64::from(source.width().max(1)))
        .max(1) as u32;
    imageops::resize(&source.to_rgba8(), width, height, FilterType::Triangle)
}

fn centered(canvas_width: u32, width: u32) -> i64 {
    i64::from(canvas_width.saturating_sub(width) / 2)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use super::{Compositor, StackCompositor};
    use crate::loader::LoadedImage;

    fn png(width: u32, height: u32, color: [u8; 3]) -> LoadedImage {
        let image = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        LoadedImage {
            mime_type: "image/png".to_string(),
            bytes,
        }
    }

    #[test]
    fn stacks_top_over_bottom() -> anyhow::Result<()> {
        let top = png(40, 20, [200, 0, 0]);
        let bottom = png(20, 10, [0, 0, 200]);

        let composite = StackCompositor.compose(&top, &bottom)?;
        assert_eq!(composite.mime_type, "image/png");
        assert!(composite.data_url().starts_with("data:image/png;base64,"));

        let decoded = image::load_from_memory(&composite.decode_bytes()?)?.to_rgba8();
        assert_eq!(decoded.dimensions(), (40, 40));
        assert_eq!(decoded.get_pixel(20, 5).0, [200, 0, 0, 255]);
        let lower = decoded.get_pixel(20, 30).0;
        assert!(lower[0] < 10 && lower[2] > 190, "{lower:?}");
        Ok(())
    }

    #[test]
    fn undecodable_input_errors() {
        let top = png(4, 4, [1, 2, 3]);
        let garbage = LoadedImage {
            mime_type: "image/png".to_string(),
            bytes: b"not an image".to_vec(),
        };
        assert!(StackCompositor.compose(&top, &garbage).is_err());
    }
}
