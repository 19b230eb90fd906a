//! Reconstruction of HDR images from Apple gain map photos: an SDR JPEG carrying a single-channel gain map as a
//! secondary image in its Multi-Picture Format (MPF) container.

pub mod analysis;
pub mod colorspace;
pub mod decode;
pub mod error;
pub mod metadata;
pub mod mpf;
#[cfg(feature = "exr")]
pub mod outexr;
#[cfg(feature = "avif")]
pub mod outavif;
pub mod raster;
mod segments;
pub mod synthesis;
mod tiff;
pub mod tonemap;

use log::{debug, warn};

pub use crate::analysis::{Analysis, GainMapStatistics, analyze};
pub use crate::colorspace::ColorPrimaries;
pub use crate::decode::{DecodedImage, ImageDecoder, Samples, ZuneJpegDecoder};
pub use crate::error::{Error, Result};
pub use crate::metadata::{GainMapDirection, GainMapMetadata, RawTags, TagValue};
pub use crate::mpf::MpfContainer;
pub use crate::raster::PixelRaster;
pub use crate::synthesis::{HdrSynthesizer, SynthesizedHdrImage};
pub use crate::tonemap::{ToneCurve, ToneMapConfig};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConversionOptions {
    /// Compress the result into `[0, 1]`. Without it the output is unclamped linear HDR.
    pub tone_mapping: Option<ToneMapConfig>,
    /// Overrides the base image's primaries, which are otherwise taken from the tags, then the ICC profile, then
    /// assumed to be Display P3.
    pub source_primaries: Option<ColorPrimaries>,
}

/// Result of [`convert`].
#[derive(Debug, Clone)]
pub struct Conversion {
    pub image: SynthesizedHdrImage,
    /// `None` when the base image was converted alone.
    pub metadata: Option<GainMapMetadata>,
    /// The recoverable error that made the conversion fall back to the base image.
    pub fallback: Option<Error>,
}

/// Reconstructs the HDR image of an Apple gain map photo.
///
/// `tags` are extractor-provided metadata; when absent, the XMP packets of the gain map and the primary image are
/// read instead.
pub fn synthesize_from_bytes<D: ImageDecoder + ?Sized>(
    file: &[u8],
    tags: Option<&RawTags>,
    decoder: &D,
    options: &ConversionOptions,
) -> Result<SynthesizedHdrImage> {
    reconstruct(file, tags, decoder, options).map(|(image, _)| image)
}

/// Like [`synthesize_from_bytes`], but an asset without a usable gain map or metadata is converted from its base image
/// alone, and the reason is reported in [`Conversion::fallback`].
pub fn convert<D: ImageDecoder + ?Sized>(
    file: &[u8],
    tags: Option<&RawTags>,
    decoder: &D,
    options: &ConversionOptions,
) -> Result<Conversion> {
    match reconstruct(file, tags, decoder, options) {
        Ok((image, metadata)) => Ok(Conversion { image, metadata: Some(metadata), fallback: None }),
        Err(e) if e.is_recoverable() => {
            warn!("Converting the base image only: {}", e);

            let base = decode::decode_base(decoder, file)?;
            let primaries = options.source_primaries
                .or_else(|| tags.and_then(RawTags::color_primaries_hint))
                .or(base.primaries);
            let image = synthesis::base_only(&base.raster, primaries);

            Ok(Conversion {
                image: apply_tone_mapping(image, options),
                metadata: None,
                fallback: Some(e),
            })
        }
        Err(e) => Err(e),
    }
}

fn reconstruct<D: ImageDecoder + ?Sized>(
    file: &[u8],
    tags: Option<&RawTags>,
    decoder: &D,
    options: &ConversionOptions,
) -> Result<(SynthesizedHdrImage, GainMapMetadata)> {
    let container = MpfContainer::locate(file)?;

    let embedded;
    let tags = match tags {
        Some(tags) => tags,
        None => {
            embedded = embedded_tags(&container);
            &embedded
        }
    };

    let metadata = GainMapMetadata::from_raw_tags(tags)?;
    debug!("Gain map metadata: {:?}", metadata);

    let pair = decode::decode_pair(decoder, container.base_image, container.gain_map)?;

    let primaries = options.source_primaries
        .or_else(|| tags.color_primaries_hint())
        .or(pair.base.primaries);
    debug!("Source primaries: {:?}", primaries);

    let image = synthesis::synthesize(&pair.base.raster, &pair.gain, &metadata, primaries)?;

    Ok((apply_tone_mapping(image, options), metadata))
}

fn apply_tone_mapping(image: SynthesizedHdrImage, options: &ConversionOptions) -> SynthesizedHdrImage {
    match &options.tone_mapping {
        Some(config) => tonemap::tone_map(&image, config),
        None => image,
    }
}

/// Tags from the XMP packets of the primary image and the gain map stream. The gain map's tags win.
pub(crate) fn embedded_tags(container: &MpfContainer<'_>) -> RawTags {
    let mut tags = RawTags::new();
    for stream in [container.base_image, container.gain_map] {
        if let Some(packet) = segments::xmp_packet(stream) {
            tags.merge(RawTags::from_xmp(packet));
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::test_support::{FakeDecoder, gray8, rgb8};
    use crate::error::NoGainMapReason;
    use crate::mpf::test_support::{UNDEFINED, mpf_file};
    use crate::segments::test_support::jpeg_with_segments;
    use crate::segments::{MARKER_APP1, XMP_SIGNATURE};

    fn xmp_segment_with(attributes: &str) -> Vec<u8> {
        let mut payload = XMP_SIGNATURE.to_vec();
        payload.extend_from_slice(format!(
            r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><rdf:Description rdf:about="" xmlns:hdrgm="http://ns.adobe.com/hdr-gain-map/1.0/" {}/></rdf:RDF></x:xmpmeta>"#,
            attributes,
        ).as_bytes());
        payload
    }

    fn xmp_segment(headroom_max: &str) -> Vec<u8> {
        xmp_segment_with(&format!(r#"hdrgm:HDRCapacityMin="0" hdrgm:HDRCapacityMax="{}""#, headroom_max))
    }

    /// An MPF file whose base image is uniformly linear 1.0 and whose 1x1 gain map is fully on.
    fn photo(gain_stream: &[u8]) -> (Vec<u8>, FakeDecoder) {
        let (file, offsets) = mpf_file(&[(UNDEFINED, gain_stream)], false);
        let decoder = FakeDecoder::default()
            .with(&file[..offsets[0]], rgb8(2, 2, vec![255; 12]))
            .with(&file, rgb8(2, 2, vec![255; 12]))
            .with(gain_stream, gray8(1, 1, vec![255]));
        (file, decoder)
    }

    #[test]
    fn reconstructs_from_embedded_xmp() {
        let gain_stream = jpeg_with_segments(&[(MARKER_APP1, &xmp_segment("3.281809"))]);
        let (file, decoder) = photo(&gain_stream);

        let options = ConversionOptions { source_primaries: Some(ColorPrimaries::Bt2020), ..Default::default() };
        let image = synthesize_from_bytes(&file, None, &decoder, &options).unwrap();

        assert_eq!(image.raster.extent(), (2, 2));
        assert_eq!(image.primaries, ColorPrimaries::Bt2020);
        assert!(image.raster.samples().iter().all(|v| (v - 3.281809).abs() < 1e-4), "{:?}", image.raster.samples());
    }

    #[test]
    fn embedded_tags_combine_both_packets() {
        let gain_stream = jpeg_with_segments(&[(MARKER_APP1, &xmp_segment_with(r#"hdrgm:Version="1.0" hdrgm:Gamma="2.0""#))]);
        let (file, _) = mpf_file(&[(UNDEFINED, &gain_stream)], false);
        let primary_stream = jpeg_with_segments(&[
            (MARKER_APP1, &xmp_segment_with(r#"hdrgm:HDRCapacityMin="0" hdrgm:HDRCapacityMax="3.0" hdrgm:Gamma="1.0""#)),
        ]);

        let mut container = MpfContainer::locate(&file).unwrap();
        container.base_image = primary_stream.as_slice();
        let tags = embedded_tags(&container);

        let metadata = GainMapMetadata::from_raw_tags(&tags).unwrap();
        assert_eq!(metadata.headroom(), 3.0);
        assert_eq!(metadata.gamma(), 2.0);
        assert_eq!(tags.get("Version"), Some(&TagValue::Text("1.0".into())));
    }

    #[test]
    fn supplied_tags_take_precedence() {
        let gain_stream = jpeg_with_segments(&[(MARKER_APP1, &xmp_segment("3.281809"))]);
        let (file, decoder) = photo(&gain_stream);

        let mut tags = RawTags::new();
        tags.insert("HDRCapacityMax", 2.0);
        tags.insert("HDRCapacityMin", 0.0);
        tags.insert("ColorSpace", "BT.2020");

        let image = synthesize_from_bytes(&file, Some(&tags), &decoder, &ConversionOptions::default()).unwrap();
        assert!(image.raster.samples().iter().all(|v| (v - 2.0).abs() < 1e-4));
    }

    #[test]
    fn sdr_photo_survives_synthesis_and_tone_mapping() {
        let gain_stream = jpeg_with_segments(&[]);
        let (file, offsets) = mpf_file(&[(UNDEFINED, &gain_stream)], true);
        let base = rgb8(2, 1, vec![255, 255, 255, 0, 0, 0]);
        let decoder = FakeDecoder::default()
            .with(&file[..offsets[0]], base)
            .with(&gain_stream, gray8(2, 1, vec![255, 128]));

        let mut tags = RawTags::new();
        tags.insert("HDRCapacityMax", 1.0);
        tags.insert("HDRCapacityMin", 0.0);

        let options = ConversionOptions {
            tone_mapping: Some(ToneMapConfig::default()),
            source_primaries: Some(ColorPrimaries::Bt2020),
        };
        let image = synthesize_from_bytes(&file, Some(&tags), &decoder, &options).unwrap();

        assert!(image.tone_mapped);
        assert!(image.raster.rgb(0, 0).iter().all(|v| (v - 1.0).abs() < 1e-5));
        assert_eq!(image.raster.rgb(1, 0), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn plain_jpeg_falls_back_to_base_image() {
        let file = jpeg_with_segments(&[]);
        let decoder = FakeDecoder::default().with(&file, rgb8(1, 1, vec![255, 255, 255]));

        assert!(matches!(
            synthesize_from_bytes(&file, None, &decoder, &ConversionOptions::default()),
            Err(Error::NoGainMap { reason: NoGainMapReason::NoMpfMarker })
        ));

        let conversion = convert(&file, None, &decoder, &ConversionOptions::default()).unwrap();
        assert!(matches!(conversion.fallback, Some(Error::NoGainMap { .. })));
        assert!(conversion.metadata.is_none());
        assert_eq!(conversion.image.primaries, ColorPrimaries::Bt2020);
        assert!(conversion.image.raster.rgb(0, 0).iter().all(|v| (v - 1.0).abs() < 1e-5));
    }

    #[test]
    fn missing_metadata_falls_back_to_base_image() {
        let gain_stream = jpeg_with_segments(&[]);
        let (file, decoder) = photo(&gain_stream);

        let conversion = convert(&file, None, &decoder, &ConversionOptions::default()).unwrap();
        assert!(matches!(conversion.fallback, Some(Error::MissingMetadata { .. })));
    }

    #[test]
    fn decode_failures_are_not_recovered() {
        let gain_stream = jpeg_with_segments(&[(MARKER_APP1, &xmp_segment("2.0"))]);
        let (file, offsets) = mpf_file(&[(UNDEFINED, &gain_stream)], false);
        let decoder = FakeDecoder::default().with(&file[..offsets[0]], rgb8(1, 1, vec![0, 0, 0]));

        assert!(matches!(
            convert(&file, None, &decoder, &ConversionOptions::default()),
            Err(Error::Decode { .. })
        ));
    }
}
