use log::debug;

use crate::colorspace::{ColorPrimaries, PrimariesTransform};
use crate::error::{Error, Result};
use crate::metadata::{GainMapDirection, GainMapMetadata};
use crate::raster::PixelRaster;

/// Linear-light HDR image, relative to SDR reference white (1.0).
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedHdrImage {
    pub raster: PixelRaster,
    pub primaries: ColorPrimaries,
    pub tone_mapped: bool,
}

impl SynthesizedHdrImage {
    /// Highest luminance in the image, with the coefficients of its primaries.
    pub fn peak_luminance(&self) -> f32 {
        self.raster
            .pixels()
            .map(|p| self.primaries.luminance([p[0], p[1], p[2]]))
            .fold(0.0, f32::max)
    }
}

/// Per-pixel gain map application, with the metadata-derived constants precomputed.
#[derive(Debug, Clone, Copy)]
pub struct HdrSynthesizer {
    headroom: f32,
    inv_gamma: f32,
    gain_offset: f32,
    direction: GainMapDirection,
}

impl HdrSynthesizer {
    pub fn new(metadata: &GainMapMetadata) -> Self {
        Self {
            headroom: metadata.headroom(),
            inv_gamma: metadata.gamma().recip(),
            gain_offset: metadata.gain_offset(),
            direction: metadata.direction(),
        }
    }

    pub fn headroom(&self) -> f32 {
        self.headroom
    }

    /// Multiplier applied to a base pixel for a normalized gain sample.
    #[inline]
    pub fn scale(&self, gain: f32) -> f32 {
        let gain = (gain + self.gain_offset).clamp(0.0, 1.0);
        let gain = gain.powf(self.inv_gamma);
        1.0 + (self.headroom - 1.0) * gain
    }

    #[inline]
    pub fn apply_pixel(&self, base: [f32; 3], gain: f32) -> [f32; 3] {
        let scale = self.scale(gain);
        match self.direction {
            GainMapDirection::Positive => base.map(|v| v * scale),
            GainMapDirection::Negative => base.map(|v| v / scale),
        }
    }
}

/// Combines a linear base raster with its single-channel gain map and converts the result to BT.2020.
///
/// Output values are not clamped; highlights exceed 1.0 by up to the headroom.
pub fn synthesize(
    base: &PixelRaster,
    gain: &PixelRaster,
    metadata: &GainMapMetadata,
    source_primaries: Option<ColorPrimaries>,
) -> Result<SynthesizedHdrImage> {
    if base.extent() != gain.extent() {
        return Err(Error::internal(format!(
            "base image is {:?} but gain map is {:?}", base.extent(), gain.extent(),
        )));
    }
    if base.channels() != 3 || gain.channels() != 1 {
        return Err(Error::internal(format!(
            "expected 3-channel base and 1-channel gain map, got {} and {}", base.channels(), gain.channels(),
        )));
    }

    let synthesizer = HdrSynthesizer::new(metadata);
    let transform = PrimariesTransform::new(source_primaries.unwrap_or(ColorPrimaries::DisplayP3), ColorPrimaries::Bt2020);
    debug!(
        "Synthesizing {}x{} HDR image: headroom {}, {:?} -> {:?}",
        base.width(), base.height(), synthesizer.headroom(), transform.src(), transform.dst(),
    );

    let samples = base
        .pixels()
        .zip(gain.samples())
        .flat_map(|(p, &g)| transform.apply(synthesizer.apply_pixel([p[0], p[1], p[2]], g)))
        .collect();

    Ok(SynthesizedHdrImage {
        raster: PixelRaster::from_samples(base.width(), base.height(), 3, samples)?,
        primaries: ColorPrimaries::Bt2020,
        tone_mapped: false,
    })
}

/// Converts a linear base raster to BT.2020 without applying any gain.
pub fn base_only(base: &PixelRaster, source_primaries: Option<ColorPrimaries>) -> SynthesizedHdrImage {
    let transform = PrimariesTransform::new(source_primaries.unwrap_or(ColorPrimaries::DisplayP3), ColorPrimaries::Bt2020);
    let raster = if transform.is_identity() {
        base.clone()
    } else {
        base.map_rgb(|rgb| transform.apply(rgb))
    };

    SynthesizedHdrImage {
        raster,
        primaries: ColorPrimaries::Bt2020,
        tone_mapped: false,
    }
}
