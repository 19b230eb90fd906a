use log::{debug, trace, warn};
use zune_jpeg::zune_core::colorspace::ColorSpace as JpegColorSpace;

use crate::colorspace::{ColorPrimaries, TransferLut};
use crate::error::{DecodeTarget, Error, Result};
use crate::raster::PixelRaster;

/// BT.601 luma weights, used to reduce an RGB gain map to a single channel.
const GAIN_MAP_LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

/// Integer samples as produced by an image codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

/// A decoded image in its native encoding: interleaved integer samples, not yet normalized or linearized.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: usize,
    pub height: usize,
    /// 1 (gray) or 3 (RGB).
    pub channels: usize,
    pub samples: Samples,
    pub icc_profile: Option<Vec<u8>>,
}

/// The image-decode capability the pipeline depends on.
pub trait ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> std::result::Result<DecodedImage, String>;
}

/// [`ImageDecoder`] backed by `zune-jpeg`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZuneJpegDecoder;

impl ImageDecoder for ZuneJpegDecoder {
    fn decode(&self, bytes: &[u8]) -> std::result::Result<DecodedImage, String> {
        use zune_jpeg::JpegDecoder;
        use zune_jpeg::zune_core::bytestream::ZCursor;

        let mut jpeg_decoder = JpegDecoder::new(ZCursor::new(bytes));
        jpeg_decoder.decode_headers()
            .map_err(|e| format!("Failed to decode JPEG headers: {}", e))
            ?;

        let jpeg_info = jpeg_decoder.info()
            .ok_or_else(|| "Failed to get JPEG image info".to_string())
            ?;

        let jpeg_output_color_space = jpeg_decoder.output_colorspace()
            .ok_or_else(|| "Failed to get JPEG output ColorSpace".to_string())
            ?;
        trace!("Output color space: {:?}", jpeg_output_color_space);

        let pixels = jpeg_decoder.decode()
            .map_err(|e| format!("Failed to decode JPEG image: {}", e))
            ?;
        let (width, height) = (jpeg_info.width as usize, jpeg_info.height as usize);
        trace!("Decoded JPEG: {}x{} with {} bytes", width, height, pixels.len());

        // Alpha, when present, is dropped.
        let (components, channels) = match jpeg_output_color_space {
            JpegColorSpace::RGB => (3, 3),
            JpegColorSpace::RGBA => (4, 3),
            JpegColorSpace::Luma => (1, 1),
            JpegColorSpace::LumaA => (2, 1),
            other => return Err(format!("Unsupported JPEG output ColorSpace {:?}", other)),
        };

        if pixels.len() != width * height * components {
            return Err(format!("Decoder returned {} bytes for a {}x{}x{} image", pixels.len(), width, height, components));
        }

        let samples = if components == channels {
            pixels
        } else {
            pixels
                .chunks_exact(components)
                .flat_map(|p| p[..channels].iter().copied())
                .collect()
        };

        Ok(DecodedImage {
            width,
            height,
            channels,
            samples: Samples::U8(samples),
            icc_profile: jpeg_decoder.icc_profile(),
        })
    }
}

impl Samples {
    fn len(&self) -> usize {
        match self {
            Samples::U8(samples) => samples.len(),
            Samples::U16(samples) => samples.len(),
        }
    }

    fn max_code(&self) -> u16 {
        match self {
            Samples::U8(_) => u8::MAX as u16,
            Samples::U16(_) => u16::MAX,
        }
    }

    fn code(&self, index: usize) -> u16 {
        match self {
            Samples::U8(samples) => samples[index] as u16,
            Samples::U16(samples) => samples[index],
        }
    }
}

impl DecodedImage {
    fn validate(&self, what: DecodeTarget) -> Result<()> {
        if !matches!(self.channels, 1 | 3) {
            return Err(Error::decode(what, format!("unsupported channel count {}", self.channels)));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::decode(what, "image has no pixels"));
        }
        if self.samples.len() != self.width * self.height * self.channels {
            return Err(Error::decode(what, format!(
                "{} samples do not fill a {}x{}x{} image", self.samples.len(), self.width, self.height, self.channels,
            )));
        }
        Ok(())
    }
}

/// The base image, in linear light.
#[derive(Debug, Clone)]
pub struct BaseImage {
    pub raster: PixelRaster,
    /// Primaries named by the embedded ICC profile, if there is one and it is recognized.
    pub primaries: Option<ColorPrimaries>,
}

/// Base and gain map rasters of equal extent.
#[derive(Debug, Clone)]
pub struct DecodedPair {
    pub base: BaseImage,
    /// Single channel, normalized to `[0, 1]`.
    pub gain: PixelRaster,
}

/// Decodes the base image to a 3-channel linear raster.
///
/// The transfer curve of the embedded ICC profile is used when present; otherwise the sRGB EOTF (which Display P3
/// shares) is assumed.
pub fn decode_base<D: ImageDecoder + ?Sized>(decoder: &D, bytes: &[u8]) -> Result<BaseImage> {
    let image = decoder.decode(bytes)
        .map_err(|e| Error::decode(DecodeTarget::BaseImage, e))?;
    image.validate(DecodeTarget::BaseImage)?;

    let max_code = image.samples.max_code();

    let icc_profile = image.icc_profile.as_deref().and_then(|bytes| {
        lcms2::Profile::new_icc(bytes)
            .map_err(|e| warn!("Ignoring unparsable ICC profile: {}", e))
            .ok()
    });
    let primaries = icc_profile.as_ref().and_then(ColorPrimaries::from_icc_profile);
    let lut = icc_profile
        .as_ref()
        .and_then(|profile| TransferLut::from_icc_profile(profile, max_code))
        .unwrap_or_else(|| TransferLut::srgb(max_code));
    debug!("Base image {}x{}, ICC primaries {:?}", image.width, image.height, primaries);

    let mut samples = Vec::with_capacity(image.width * image.height * 3);
    for i in 0..image.width * image.height {
        for c in 0..3 {
            let index = if image.channels == 3 { i * 3 + c } else { i };
            samples.push(lut.linearize(c, image.samples.code(index)));
        }
    }

    Ok(BaseImage {
        raster: PixelRaster::from_samples(image.width, image.height, 3, samples)?,
        primaries,
    })
}

/// Decodes the gain map to a single channel normalized to `[0, 1]`. Gain samples are not linearized.
pub fn decode_gain_map<D: ImageDecoder + ?Sized>(decoder: &D, bytes: &[u8]) -> Result<PixelRaster> {
    let image = decoder.decode(bytes)
        .map_err(|e| Error::decode(DecodeTarget::GainMap, e))?;
    image.validate(DecodeTarget::GainMap)?;

    let max = image.samples.max_code() as f32;
    let samples: Vec<f32> = match image.channels {
        1 => (0..image.samples.len()).map(|i| image.samples.code(i) as f32 / max).collect(),
        _ => (0..image.width * image.height)
            .map(|i| {
                GAIN_MAP_LUMA_WEIGHTS
                    .iter()
                    .enumerate()
                    .map(|(c, w)| w * image.samples.code(i * 3 + c) as f32 / max)
                    .sum::<f32>()
                    .clamp(0.0, 1.0)
            })
            .collect(),
    };

    PixelRaster::from_samples(image.width, image.height, 1, samples)
}

/// Decodes both images and brings the gain map to the base image's resolution.
pub fn decode_pair<D: ImageDecoder + ?Sized>(decoder: &D, base_bytes: &[u8], gain_map_bytes: &[u8]) -> Result<DecodedPair> {
    let base = decode_base(decoder, base_bytes)?;
    let gain = decode_gain_map(decoder, gain_map_bytes)?;

    let (width, height) = base.raster.extent();
    let gain = if gain.extent() != (width, height) {
        debug!("Resampling gain map {}x{} to {}x{}", gain.width(), gain.height(), width, height);
        gain.resize_bilinear(width, height)
    } else {
        gain
    };

    if gain.extent() != base.raster.extent() {
        return Err(Error::internal(format!(
            "gain map is {:?} after resampling, base image is {:?}", gain.extent(), base.raster.extent(),
        )));
    }

    Ok(DecodedPair { base, gain })
}
