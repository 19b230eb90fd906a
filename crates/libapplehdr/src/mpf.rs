use log::{debug, trace, warn};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::error::{Error, NoGainMapReason, Result};
use crate::segments::{self, MARKER_APP2};
use crate::tiff;

/// Identifier at the start of the APP2 payload of an MPF segment.
pub const MPF_IDENTIFIER: &[u8] = b"MPF\0";

const TAG_MPF_VERSION: u16 = 0xB000;
const TAG_NUMBER_OF_IMAGES: u16 = 0xB001;
const TAG_MP_ENTRY: u16 = 0xB002;

const MP_ENTRY_SIZE: usize = 16;

/// The MP Index IFD of a Multi-Picture Format segment.
///
/// See _CIPA DC-007-2009_: https://web.archive.org/web/20160405200235/http://cipa.jp/std/documents/e/DC-007_E.pdf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpfDirectory {
    entries: Vec<MpfEntry>,
}

/// One 16-byte MP Entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpfEntry {
    /// Offset of the image data, relative to the MPF TIFF header. `0` for the first image, meaning the start of the file.
    pub offset: u32,
    /// Size of the image data in bytes.
    pub length: u32,
    pub type_code: MpTypeCode,
    /// Bits 31..27 of the individual image attribute (dependent parent/child, representative image).
    pub flags: u8,
    pub dependent_image_1_entry_number: u16,
    pub dependent_image_2_entry_number: u16,
}

/// MP Type Code, bits 23..0 of the individual image attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpTypeCode {
    Known(KnownMpType),
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum KnownMpType {
    /// Also used by gain maps (Apple, Ultra HDR).
    Undefined = 0x000000,
    LargeThumbnailVga = 0x010001,
    LargeThumbnailFullHd = 0x010002,
    Panorama = 0x020001,
    Disparity = 0x020002,
    MultiAngle = 0x020003,
    BaselinePrimary = 0x030000,
}

impl MpTypeCode {
    pub fn from_raw(raw: u32) -> Self {
        let raw = raw & 0x00FF_FFFF;
        KnownMpType::from_u32(raw)
            .map(MpTypeCode::Known)
            .unwrap_or(MpTypeCode::Other(raw))
    }

    pub fn raw(&self) -> u32 {
        match self {
            MpTypeCode::Known(known) => *known as u32,
            MpTypeCode::Other(raw) => *raw,
        }
    }

    /// Whether an image of this type may carry a gain map (as opposed to a thumbnail or another view).
    pub fn is_auxiliary(&self) -> bool {
        matches!(self, MpTypeCode::Known(KnownMpType::Undefined))
    }
}

impl MpfEntry {
    /// * `bytes` - Exactly [`MP_ENTRY_SIZE`] bytes.
    fn from_bytes(bytes: &[u8], endianness: tiff::Endianness) -> Self {
        let attribute = endianness.u32_from_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let length = endianness.u32_from_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let offset = endianness.u32_from_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let dependent_image_1_entry_number = endianness.u16_from_bytes([bytes[12], bytes[13]]);
        let dependent_image_2_entry_number = endianness.u16_from_bytes([bytes[14], bytes[15]]);

        Self {
            offset,
            length,
            type_code: MpTypeCode::from_raw(attribute),
            flags: (attribute >> 27) as u8,
            dependent_image_1_entry_number,
            dependent_image_2_entry_number,
        }
    }
}

impl MpfDirectory {
    pub fn entries(&self) -> &[MpfEntry] {
        &self.entries
    }

    /// The first entry after the primary image whose type marks it as an auxiliary image, with its index.
    pub fn auxiliary_entry(&self) -> Option<(usize, &MpfEntry)> {
        self.entries
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, entry)| entry.type_code.is_auxiliary())
    }

    /// Parses the MPF payload, i.e. the bytes following the `MPF\0` identifier, which form a TIFF structure.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let malformed = |what: &str| {
            warn!("Malformed MPF directory: {}", what);
            Error::no_gain_map(NoGainMapReason::MalformedDirectory)
        };

        let mpf_tiff = tiff::Tiff::from_reader(&mut std::io::Cursor::new(payload))
            .map_err(|e| malformed(&e.to_string()))?;
        let endianness = mpf_tiff.header.endianness;

        let mp_index_ifd = mpf_tiff.ifds.first()
            .ok_or_else(|| malformed("no MP Index IFD"))?;

        match mp_index_ifd.entry_with_tag(TAG_MPF_VERSION).and_then(|entry| entry.field_value_as_undefined()) {
            Some(b"0100") => {}
            Some(version) => debug!("Unexpected MPF version {:?}; parsing anyway", version),
            None => debug!("MPF version tag missing; parsing anyway"),
        }

        let number_of_images = mp_index_ifd.entry_with_tag(TAG_NUMBER_OF_IMAGES)
            .and_then(|entry| entry.field_value_as_long())
            .and_then(|values| values.first().copied())
            .ok_or_else(|| malformed("missing number of images"))? as usize;

        let mp_entry_bytes = mp_index_ifd.entry_with_tag(TAG_MP_ENTRY)
            .and_then(|entry| entry.field_value_as_undefined())
            .ok_or_else(|| malformed("missing MP Entry tag"))?;

        if mp_entry_bytes.len() / MP_ENTRY_SIZE < number_of_images {
            return Err(malformed("MP Entry tag shorter than the number of images"));
        }

        let entries = mp_entry_bytes
            .chunks_exact(MP_ENTRY_SIZE)
            .take(number_of_images)
            .map(|chunk| MpfEntry::from_bytes(chunk, endianness))
            .collect();

        Ok(Self { entries })
    }
}

/// The byte ranges of a multi-picture asset that matter for HDR reconstruction.
#[derive(Debug, Clone)]
pub struct MpfContainer<'a> {
    pub directory: MpfDirectory,
    /// Absolute position of the MPF TIFF header, the base for entry offsets.
    pub tiff_header_offset: usize,
    pub base_image: &'a [u8],
    pub gain_map: &'a [u8],
    pub gain_map_entry: MpfEntry,
}

impl<'a> MpfContainer<'a> {
    /// Finds the MPF segment of a JPEG stream and resolves the base and gain map byte ranges.
    ///
    /// Every failure is reported as [`Error::NoGainMap`], since the base image alone remains usable.
    pub fn locate(bytes: &'a [u8]) -> Result<Self> {
        let segment = segments::find_segment(bytes, MARKER_APP2, MPF_IDENTIFIER)
            .ok_or_else(|| Error::no_gain_map(NoGainMapReason::NoMpfMarker))?;

        let tiff_header_offset = segment.payload_offset + MPF_IDENTIFIER.len();
        trace!("MPF segment at {}, TIFF header at {}", segment.offset, tiff_header_offset);

        let directory = MpfDirectory::from_payload(&segment.payload[MPF_IDENTIFIER.len()..])?;
        debug!("MPF directory: {:?}", directory);

        if directory.entries().len() < 2 {
            return Err(Error::no_gain_map(NoGainMapReason::TooFewEntries(directory.entries().len())));
        }

        let (index, gain_map_entry) = directory.auxiliary_entry()
            .ok_or_else(|| Error::no_gain_map(NoGainMapReason::NoAuxiliaryEntry))?;
        let gain_map_entry = *gain_map_entry;
        trace!("Using MP entry #{} as the gain map: {:?}", index, gain_map_entry);

        let gain_map = resolve_range(bytes, tiff_header_offset, &gain_map_entry)
            .ok_or_else(|| Error::no_gain_map(NoGainMapReason::EntryOutOfBounds))?;

        // The primary image always starts the file. Some writers record a size that overshoots; the decoder stops at EOI anyway.
        let primary = &directory.entries()[0];
        let base_end = (primary.length as usize).min(bytes.len());
        let base_image = if base_end == 0 { bytes } else { &bytes[..base_end] };

        Ok(Self {
            directory,
            tiff_header_offset,
            base_image,
            gain_map,
            gain_map_entry,
        })
    }
}

fn resolve_range<'a>(bytes: &'a [u8], tiff_header_offset: usize, entry: &MpfEntry) -> Option<&'a [u8]> {
    if entry.offset == 0 || entry.length == 0 {
        return None;
    }
    let start = tiff_header_offset.checked_add(entry.offset as usize)?;
    let end = start.checked_add(entry.length as usize)?;
    bytes.get(start..end)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::segments::test_support::jpeg_with_segments;
    use crate::segments::MARKER_APP2;

    use super::MPF_IDENTIFIER;

    pub const PRIMARY: u32 = 0x030000;
    pub const UNDEFINED: u32 = 0x000000;
    pub const THUMBNAIL: u32 = 0x010001;

    /// Builds an MPF payload (identifier included) with the given `(attribute, length, offset)` entries.
    pub fn mpf_payload(entries: &[(u32, u32, u32)], big_endian: bool) -> Vec<u8> {
        let u16b = |v: u16| if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        let u32b = |v: u32| if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };

        let mut tiff = Vec::new();
        tiff.extend_from_slice(if big_endian { b"MM" } else { b"II" });
        tiff.extend_from_slice(&u16b(42));
        tiff.extend_from_slice(&u32b(8));

        tiff.extend_from_slice(&u16b(3));
        // Version, inline
        tiff.extend_from_slice(&u16b(0xB000));
        tiff.extend_from_slice(&u16b(7));
        tiff.extend_from_slice(&u32b(4));
        tiff.extend_from_slice(b"0100");
        // Number of images, inline
        tiff.extend_from_slice(&u16b(0xB001));
        tiff.extend_from_slice(&u16b(4));
        tiff.extend_from_slice(&u32b(1));
        tiff.extend_from_slice(&u32b(entries.len() as u32));
        // MP Entry, right after the IFD
        let entry_offset = 8 + 2 + 3 * 12 + 4;
        tiff.extend_from_slice(&u16b(0xB002));
        tiff.extend_from_slice(&u16b(7));
        tiff.extend_from_slice(&u32b(16 * entries.len() as u32));
        tiff.extend_from_slice(&u32b(entry_offset));
        tiff.extend_from_slice(&u32b(0));

        for (attribute, length, offset) in entries {
            tiff.extend_from_slice(&u32b(*attribute));
            tiff.extend_from_slice(&u32b(*length));
            tiff.extend_from_slice(&u32b(*offset));
            tiff.extend_from_slice(&u16b(0));
            tiff.extend_from_slice(&u16b(0));
        }

        let mut payload = MPF_IDENTIFIER.to_vec();
        payload.extend_from_slice(&tiff);
        payload
    }

    /// A primary JPEG stream carrying an MPF segment, followed by `auxiliary` streams.
    ///
    /// Returns the file bytes and the absolute offset of each auxiliary stream.
    pub fn mpf_file(auxiliary: &[(u32, &[u8])], big_endian: bool) -> (Vec<u8>, Vec<usize>) {
        // The payload size does not depend on the offsets, so lay out with placeholders first.
        let placeholder: Vec<_> = std::iter::once((PRIMARY, 0, 0))
            .chain(auxiliary.iter().map(|(attribute, bytes)| (*attribute, bytes.len() as u32, 0)))
            .collect();
        let primary_len = jpeg_with_segments(&[(MARKER_APP2, &mpf_payload(&placeholder, big_endian))]).len();

        // APP2 marker (2) + length (2) + identifier (4), right after SOI (2).
        let tiff_header_offset = 2 + 4 + MPF_IDENTIFIER.len();

        let mut absolute_offsets = Vec::new();
        let mut cursor = primary_len;
        let mut entries = vec![(PRIMARY, primary_len as u32, 0)];
        for (attribute, bytes) in auxiliary {
            absolute_offsets.push(cursor);
            entries.push((*attribute, bytes.len() as u32, (cursor - tiff_header_offset) as u32));
            cursor += bytes.len();
        }

        let mut file = jpeg_with_segments(&[(MARKER_APP2, &mpf_payload(&entries, big_endian))]);
        assert_eq!(file.len(), primary_len);
        for (_, bytes) in auxiliary {
            file.extend_from_slice(bytes);
        }
        (file, absolute_offsets)
    }
}
