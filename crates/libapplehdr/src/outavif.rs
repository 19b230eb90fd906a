#![cfg(feature = "avif")]

use std::io::Write;

use log::debug;
use ravif::*;
use rav1e::color::ColorPrimaries as Rav1eColorPrimaries;
use rav1e::color::TransferCharacteristics as Rav1eTransferCharacteristics;
use rav1e::color::PixelRange;

use crate::colorspace::{ColorPrimaries, PrimariesTransform};
use crate::synthesis::SynthesizedHdrImage;

/// Diffuse white of the reference viewing environment of ITU-R BT.2408, in cd/m².
pub const DEFAULT_SDR_WHITE_NITS: f32 = 203.0;

const PQ_PEAK_NITS: f32 = 10000.0;

/// Encodes a linear HDR image as a 10-bit HDR10 (PQ, BT.2020) AVIF.
///
/// - `sdr_white_nits`: absolute luminance that a linear value of 1.0 is mapped to.
pub fn write_hdr_image_to_avif<W: Write>(
    writer: &mut W,
    hdr_image: &SynthesizedHdrImage,
    sdr_white_nits: f32,
) -> std::io::Result<()> {
    let (width, height) = hdr_image.raster.extent();
    let to_bt2020 = PrimariesTransform::new(hdr_image.primaries, ColorPrimaries::Bt2020);
    debug!("Encoding {}x{} AVIF, SDR white at {} nits", width, height, sdr_white_nits);

    let ycbcr_pixels: Vec<[u16; 3]> = hdr_image.raster
        .pixels()
        .map(|p| {
            let rgb = to_bt2020.apply([p[0], p[1], p[2]]);

            // Absolute luminance, normalized to [0, 1] for the PQ OETF.
            let [r, g, b] = rgb.map(|v| st2084_oetf((v * sdr_white_nits).clamp(0.0, PQ_PEAK_NITS) / PQ_PEAK_NITS));

            // Rec. ITU-R BT.2100-3,
            // "Non-Constant Luminance Y'C'bC'r signal format", Derivation of Y', Derivation of colour difference signals
            let y = 0.2627 * r + 0.6780 * g + 0.0593 * b;
            let cb = (b - y) / 1.8814 + 0.5;
            let cr = (r - y) / 1.4746 + 0.5;

            [y, cb, cr].map(|v| (v.clamp(0.0, 1.0) * 1023.0).round() as u16)
        })
        .collect();

    write_hdr10_ycbcr_pixels_to_avif(writer, width, height, &ycbcr_pixels)
}

/// - `ycbcr_pixels`: HDR10 pixels, each represented as an array of 3 `u16` values (Y', Cb, Cr).
///   The values MUST be in the range [0, 1023].
fn write_hdr10_ycbcr_pixels_to_avif<W: Write>(
    writer: &mut W,
    width: usize,
    height: usize,
    ycbcr_pixels: &[[u16; 3]],
) -> std::io::Result<()> {
    const TRANSFER_CHARACTERISTICS: Rav1eTransferCharacteristics = Rav1eTransferCharacteristics::SMPTE2084;
    const COLOR_PRIMARIES: Rav1eColorPrimaries = Rav1eColorPrimaries::BT2020;
    const MATRIX_COEFFICIENTS: MatrixCoefficients = MatrixCoefficients::BT2020NCL;

    let res = Encoder::new()
        .with_quality(100.0)
        .with_speed(4)
        .encode_raw_plane_10_with_params(
            width, height,
            ycbcr_pixels.iter().cloned(),
            None::<[_; 0]>,
            PixelRange::Full,
            TRANSFER_CHARACTERISTICS,
            COLOR_PRIMARIES,
            MATRIX_COEFFICIENTS
        )
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    writer.write_all(&res.avif_file)?;
    Ok(())
}

/// SMPTE ST.2084 PQ (Perceptual Quantizer) EOTF^-1:
/// PQ is actually defined by the EOTF. This is its inverse, divided by 10,000.
///
/// Also in [_Rec. ITU-R BT.2100-3_](https://www.itu.int/rec/R-REC-BT.2100-3-202502-I/en).
///
/// - `color`: Normalized color [0, 1] to map non-linearly to [0, 1].
fn st2084_oetf(color: f32) -> f32 {
    const M1: f32 = 2610.0 / 16384.0;
    const M2: f32 = 2523.0 / 4096.0 * 128.0;
    const C1: f32 = 3424.0 / 4096.0;
    const C2: f32 = 2413.0 / 4096.0 * 32.0;
    const C3: f32 = 2392.0 / 4096.0 * 32.0;

    let cp = f32::powf(color.abs(), M1);
    let numerator = C1 + C2 * cp;
    let denominator = 1.0 + C3 * cp;

    f32::powf(numerator / denominator, M2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pq_curve_endpoints() {
        assert!(st2084_oetf(0.0) < 1e-5);
        assert!((st2084_oetf(1.0) - 1.0).abs() < 1e-5);
        // 203 cd/m² sits at about 58% of the PQ signal range.
        assert!((st2084_oetf(DEFAULT_SDR_WHITE_NITS / PQ_PEAK_NITS) - 0.58).abs() < 0.01);
    }
}
