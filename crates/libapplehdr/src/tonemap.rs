use log::debug;

use crate::colorspace::ColorPrimaries;
use crate::synthesis::SynthesizedHdrImage;

const MIN_LUMINANCE: f32 = 1e-6;

/// Luminance compression curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToneCurve {
    /// `L (1 + L / W²) / (1 + L)`: maps `W` to 1.0 and leaves SDR content untouched when `W` is 1.
    ///
    /// `white` defaults to the image's peak luminance.
    ExtendedReinhard { white: Option<f32> },
    /// `L / (1 + L)`.
    Reinhard,
}

impl Default for ToneCurve {
    fn default() -> Self {
        ToneCurve::ExtendedReinhard { white: None }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ToneMapConfig {
    pub curve: ToneCurve,
}

impl ToneMapConfig {
    pub fn reinhard() -> Self {
        Self { curve: ToneCurve::Reinhard }
    }

    pub fn extended_reinhard(white: Option<f32>) -> Self {
        Self { curve: ToneCurve::ExtendedReinhard { white } }
    }
}

/// Compresses an HDR image into `[0, 1]`, scaling each pixel by `f(L) / L` to preserve hue.
///
/// An image that is already tone mapped is returned as is.
pub fn tone_map(image: &SynthesizedHdrImage, config: &ToneMapConfig) -> SynthesizedHdrImage {
    if image.tone_mapped {
        debug!("Image is already tone mapped");
        return image.clone();
    }

    let luminance = |rgb: [f32; 3]| ColorPrimaries::Bt2020.luminance(rgb).max(MIN_LUMINANCE);

    let curve: Box<dyn Fn(f32) -> f32> = match config.curve {
        ToneCurve::ExtendedReinhard { white } => {
            let white = white
                .unwrap_or_else(|| image.raster.pixels().map(|p| luminance([p[0], p[1], p[2]])).fold(0.0, f32::max))
                .max(1.0);
            debug!("Extended Reinhard tone mapping, white {}", white);
            let inv_white_sq = (white * white).recip();
            Box::new(move |l| l * (1.0 + l * inv_white_sq) / (1.0 + l))
        }
        ToneCurve::Reinhard => {
            debug!("Reinhard tone mapping");
            Box::new(|l| l / (1.0 + l))
        }
    };

    let raster = image.raster.map_rgb(|rgb| {
        let l = luminance(rgb);
        let scale = curve(l) / l;
        rgb.map(|v| (v * scale).clamp(0.0, 1.0))
    });

    SynthesizedHdrImage {
        raster,
        primaries: image.primaries,
        tone_mapped: true,
    }
}
