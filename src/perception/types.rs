use std::sync::OnceLock;

use image::{DynamicImage, GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::errors::{FlowshotError, FlowshotResult};
use crate::perception::fingerprint::Fingerprint;
use crate::perception::structural;

/// One visual observation of the page: encoded PNG plus the derived
/// descriptors the change detector compares.
#[derive(Debug)]
pub struct Snapshot {
    png: Vec<u8>,
    width: u32,
    height: u32,
    fingerprint: Fingerprint,
    image: DynamicImage,
    structural: OnceLock<GrayImage>,
}

impl Snapshot {
    pub fn from_png(png: Vec<u8>) -> FlowshotResult<Self> {
        if png.is_empty() {
            return Err(FlowshotError::Perception("empty screenshot".into()));
        }
        let image = image::load_from_memory(&png)?;
        Ok(Self::build(png, image))
    }

    /// Encodes `image` as PNG. Used by drivers that hand back raw frames.
    pub fn from_image(image: DynamicImage) -> FlowshotResult<Self> {
        let mut png = Vec::new();
        image.write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(Self::build(png, image))
    }

    fn build(png: Vec<u8>, image: DynamicImage) -> Self {
        let fingerprint = Fingerprint::of(&image);
        Self {
            png,
            width: image.width(),
            height: image.height(),
            fingerprint,
            image,
            structural: OnceLock::new(),
        }
    }

    pub fn png(&self) -> &[u8] {
        &self.png
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Downscaled grayscale plane used by the structural comparison, built on first use.
    pub fn structural_plane(&self) -> &GrayImage {
        self.structural
            .get_or_init(|| structural::prepare(&self.image))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// Text the goal monitor evaluates against: location plus visible content.
#[derive(Debug, Clone, Default)]
pub struct PageSignals {
    pub url: String,
    pub title: String,
    pub visible_text: String,
}

impl PageSignals {
    pub fn haystack(&self) -> String {
        format!("{}\n{}\n{}", self.url, self.title, self.visible_text).to_lowercase()
    }
}
