use image::imageops::FilterType;
use image::DynamicImage;

const SIDE: u32 = 16;
const BITS: u32 = SIDE * SIDE;

/// 256-bit horizontal gradient hash. Robust to re-encoding and minor
/// anti-aliasing noise, sensitive to layout and content shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u64; 4]);

impl Fingerprint {
    pub fn of(image: &DynamicImage) -> Self {
        let small = image
            .resize_exact(SIDE + 1, SIDE, FilterType::Triangle)
            .to_luma8();

        let mut words = [0u64; 4];
        let mut bit = 0usize;
        for y in 0..SIDE {
            for x in 0..SIDE {
                let left = small.get_pixel(x, y)[0];
                let right = small.get_pixel(x + 1, y)[0];
                if left > right {
                    words[bit / 64] |= 1 << (bit % 64);
                }
                bit += 1;
            }
        }
        Self(words)
    }

    pub fn hamming(&self, other: &Fingerprint) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// Normalized distance in [0, 1]; 0 means identical fingerprints.
    pub fn distance(&self, other: &Fingerprint) -> f64 {
        f64::from(self.hamming(other)) / f64::from(BITS)
    }
}
