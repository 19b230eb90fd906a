#![cfg(feature = "exr")]

use std::path::Path;

use exr::prelude::*;
use exr::meta::attribute::Chromaticities;

use crate::synthesis::SynthesizedHdrImage;

/// Writes a linear HDR image as 32-bit float RGB OpenEXR, tagged with the image's chromaticities.
pub fn write_hdr_image_to_exr<P: AsRef<Path>>(path: P, hdr_image: &SynthesizedHdrImage) -> std::io::Result<()> {
    let (width, height) = hdr_image.raster.extent();
    let xy = hdr_image.primaries.chromaticities();

    let chromaticities = Chromaticities {
        red: Vec2(xy.red[0], xy.red[1]),
        green: Vec2(xy.green[0], xy.green[1]),
        blue: Vec2(xy.blue[0], xy.blue[1]),
        white: Vec2(xy.white[0], xy.white[1]),
    };

    let mut image_attributes = ImageAttributes::new(IntegerBounds::from_dimensions((width, height)));
    image_attributes.chromaticities = Some(chromaticities);

    let channels = SpecificChannels::rgb(|Vec2(x, y): Vec2<usize>| {
        let [r, g, b] = hdr_image.raster.rgb(x, y);
        (r, g, b)
    });

    let mut image = Image::from_channels((width, height), channels);
    image.attributes = image_attributes;

    image.layer_data.encoding.compression = Compression::ZIP16;

    image.write().to_file(path.as_ref()).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colorspace::ColorPrimaries;
    use crate::raster::PixelRaster;

    #[test]
    fn writes_openexr_file() {
        let hdr_image = SynthesizedHdrImage {
            raster: PixelRaster::filled(4, 3, &[1.5, 0.5, 0.25]),
            primaries: ColorPrimaries::Bt2020,
            tone_mapped: false,
        };

        let path = std::env::temp_dir().join(format!("libapplehdr-outexr-{}.exr", std::process::id()));
        write_hdr_image_to_exr(&path, &hdr_image).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(&bytes[..4], &[0x76, 0x2F, 0x31, 0x01]);
    }
}
