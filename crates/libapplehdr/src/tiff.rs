// https://www.itu.int/itudoc/itu-t/com16/tiff-fx/docs/tiff6.pdf
//
// Only the classic (32-bit offset) layout is read; MPF payloads never use BigTIFF.

use std::io::{Read, Seek, SeekFrom};

use log::warn;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Upper bound on the IFD chain length, which also breaks offset cycles.
const MAX_IFD_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// `0x4949` (little-endian)
    LittleEndian,
    /// `0x4D4D` (big-endian)
    BigEndian,
}

#[derive(Debug, Clone)]
pub struct Tiff {
    pub header: TiffHeader,
    pub ifds: Vec<TiffIfd>,
}

#[derive(Debug, Clone, Copy)]
pub struct TiffHeader {
    pub endianness: Endianness,
    pub first_ifd_offset: u32,
}

/// Image File Directory (IFD) structure
#[derive(Debug, Clone)]
pub struct TiffIfd {
    pub entries: Vec<TiffIfdEntry>,

    next_ifd_offset: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct TiffIfdEntry {
    pub tag: u16,
    pub field_type: TiffFieldType,
    pub count: u32,
    pub field_value: TiffFieldValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum TiffFieldType {
    BYTE = 1,
    ASCII = 2,
    SHORT = 3,
    LONG = 4,
    RATIONAL = 5,
    SBYTE = 6,
    UNDEFINED = 7,
    SSHORT = 8,
    SLONG = 9,
    SRATIONAL = 10,
    FLOAT = 11,
    DOUBLE = 12,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TiffFieldValue {
    BYTE(Vec<u8>),
    ASCII(String),
    SHORT(Vec<u16>),
    LONG(Vec<u32>),
    RATIONAL(Vec<(u32, u32)>),
    SBYTE(Vec<i8>),
    UNDEFINED(Vec<u8>),
    SSHORT(Vec<i16>),
    SLONG(Vec<i32>),
    SRATIONAL(Vec<(i32, i32)>),
    FLOAT(Vec<f32>),
    DOUBLE(Vec<f64>),
}

fn invalid_data(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message.to_owned())
}

impl Endianness {
    pub fn u16_from_bytes(self, buffer: [u8; 2]) -> u16 {
        match self {
            Endianness::LittleEndian => u16::from_le_bytes(buffer),
            Endianness::BigEndian => u16::from_be_bytes(buffer),
        }
    }

    pub fn u32_from_bytes(self, buffer: [u8; 4]) -> u32 {
        match self {
            Endianness::LittleEndian => u32::from_le_bytes(buffer),
            Endianness::BigEndian => u32::from_be_bytes(buffer),
        }
    }

    pub fn read_u16<R: Read>(self, reader: &mut R) -> std::io::Result<u16> {
        let mut buffer = [0; 2];
        reader.read_exact(&mut buffer)?;
        Ok(self.u16_from_bytes(buffer))
    }

    pub fn read_u32<R: Read>(self, reader: &mut R) -> std::io::Result<u32> {
        let mut buffer = [0; 4];
        reader.read_exact(&mut buffer)?;
        Ok(self.u32_from_bytes(buffer))
    }

    fn read_u64<R: Read>(self, reader: &mut R) -> std::io::Result<u64> {
        let mut buffer = [0; 8];
        reader.read_exact(&mut buffer)?;
        match self {
            Endianness::LittleEndian => Ok(u64::from_le_bytes(buffer)),
            Endianness::BigEndian => Ok(u64::from_be_bytes(buffer)),
        }
    }
}

impl Tiff {
    /// Reads the header and the IFD chain.
    ///
    /// The first IFD must be well-formed. Later IFDs are best effort: the chain is cut at the first
    /// one that cannot be read, since callers only rely on the leading directory.
    pub fn from_reader<R: Read + Seek>(reader: &mut R) -> std::io::Result<Self> {
        let header = TiffHeader::new(reader)?;
        let stream_len = reader.seek(SeekFrom::End(0))?;

        let mut ifds: Vec<TiffIfd> = Vec::new();
        let mut visited_offsets: Vec<u32> = Vec::new();

        let mut ifd_offset = Some(header.first_ifd_offset);
        while let Some(offset) = ifd_offset {
            if visited_offsets.contains(&offset) || visited_offsets.len() >= MAX_IFD_COUNT {
                warn!("TIFF IFD chain loops or is too long at offset {}; ignoring the rest", offset);
                break;
            }
            visited_offsets.push(offset);

            reader.seek(SeekFrom::Start(offset as u64))?;
            let ifd = match TiffIfd::new(reader, header.endianness, stream_len) {
                Ok(ifd) => ifd,
                Err(e) if !ifds.is_empty() => {
                    warn!("Ignoring unreadable TIFF IFD at offset {}: {}", offset, e);
                    break;
                }
                Err(e) => return Err(e),
            };

            ifd_offset = ifd.next_ifd_offset;
            ifds.push(ifd);
        }

        Ok(Tiff { header, ifds })
    }
}

impl TiffIfd {
    pub fn entry_with_tag(&self, tag: u16) -> Option<&TiffIfdEntry> {
        self.entries.iter().find(|entry| entry.tag == tag)
    }
}

impl TiffIfdEntry {
    pub fn field_value_as_long(&self) -> Option<&[u32]> {
        if let TiffFieldValue::LONG(ref data) = self.field_value {
            Some(data)
        } else {
            None
        }
    }

    pub fn field_value_as_undefined(&self) -> Option<&[u8]> {
        if let TiffFieldValue::UNDEFINED(ref data) = self.field_value {
            Some(data)
        } else {
            None
        }
    }
}

impl TiffHeader {
    fn new<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut byte_order = [0; 2];
        reader.read_exact(&mut byte_order)?;

        let endianness = match &byte_order {
            b"II" => Endianness::LittleEndian,
            b"MM" => Endianness::BigEndian,
            _ => return Err(invalid_data("Invalid TIFF byte order")),
        };

        let version = endianness.read_u16(reader)?;
        if version != 42 {
            return Err(invalid_data("Invalid TIFF magic number"));
        }

        let first_ifd_offset = endianness.read_u32(reader)?;

        Ok(TiffHeader {
            endianness,
            first_ifd_offset,
        })
    }
}

impl TiffIfd {
    /// * `reader` - The `Read` from which to read the IFD. Must be positioned at the start of the IFD.
    /// * `stream_len` - Total length of the TIFF stream, used to reject out-of-range value offsets.
    fn new<R: Read + Seek>(reader: &mut R, endianness: Endianness, stream_len: u64) -> std::io::Result<Self> {
        const VALUE_OFFSET_SIZE: usize = 4;

        let entry_count = endianness.read_u16(reader)?;
        if entry_count < 1 {
            return Err(invalid_data("Invalid IFD entry count"));
        }

        let mut entries: Vec<TiffIfdEntry> = Vec::with_capacity(entry_count as usize);

        for _ in 0..entry_count {
            let tag = endianness.read_u16(reader)?;
            let field_type = endianness.read_u16(reader)?;
            let count = endianness.read_u32(reader)?;

            let mut value_or_offset = [0u8; VALUE_OFFSET_SIZE];
            reader.read_exact(&mut value_or_offset)?;

            let Some(field_type) = TiffFieldType::from_u16(field_type) else {
                // Unknown types are skippable; their size is unknown but the entry itself is fixed-size.
                warn!("Skipping TIFF tag {:#06X} with unknown field type {}", tag, field_type);
                continue;
            };

            let size = field_type.size()
                .checked_mul(count as usize)
                .ok_or_else(|| invalid_data("TIFF field size overflows"))?;

            let field_value = if size <= VALUE_OFFSET_SIZE {
                // The field value is stored directly in the IFD entry, left-justified.
                TiffFieldValue::from_reader(&mut &value_or_offset[..], endianness, field_type, count)?
            } else {
                // The field value is stored in a separate location.
                let value_offset = endianness.u32_from_bytes(value_or_offset) as u64;
                if value_offset + size as u64 > stream_len {
                    return Err(invalid_data("TIFF value offset out of range"));
                }

                let old_position = reader.stream_position()?;
                reader.seek(SeekFrom::Start(value_offset))?;
                let field_value = TiffFieldValue::from_reader(&mut reader.by_ref().take(size as u64), endianness, field_type, count)?;
                reader.seek(SeekFrom::Start(old_position))?;
                field_value
            };

            entries.push(TiffIfdEntry {
                tag,
                field_type,
                count,
                field_value,
            });
        }

        let next_ifd_offset = endianness.read_u32(reader)?;
        let next_ifd_offset = if next_ifd_offset == 0 {
            None
        } else {
            Some(next_ifd_offset)
        };

        Ok(TiffIfd {
            entries,

            next_ifd_offset,
        })
    }
}

impl TiffFieldType {
    fn size(&self) -> usize {
        match self {
            TiffFieldType::BYTE => 1,
            TiffFieldType::ASCII => 1,
            TiffFieldType::SHORT => 2,
            TiffFieldType::LONG => 4,
            TiffFieldType::RATIONAL => 8,
            TiffFieldType::SBYTE => 1,
            TiffFieldType::UNDEFINED => 1,
            TiffFieldType::SSHORT => 2,
            TiffFieldType::SLONG => 4,
            TiffFieldType::SRATIONAL => 8,
            TiffFieldType::FLOAT => 4,
            TiffFieldType::DOUBLE => 8,
        }
    }
}

impl TiffFieldValue {
    fn from_reader<R: Read>(reader: &mut R, endianness: Endianness, field_type: TiffFieldType, count: u32) -> std::io::Result<Self> {
        let count = count as usize;

        fn read_n<T, R: Read>(reader: &mut R, count: usize, mut read_one: impl FnMut(&mut R) -> std::io::Result<T>) -> std::io::Result<Vec<T>> {
            (0..count).map(|_| read_one(reader)).collect()
        }

        let bytes = |reader: &mut R| -> std::io::Result<Vec<u8>> {
            let mut buffer = vec![0; count];
            reader.read_exact(&mut buffer)?;
            Ok(buffer)
        };

        Ok(match field_type {
            TiffFieldType::BYTE => TiffFieldValue::BYTE(bytes(reader)?),
            TiffFieldType::ASCII => {
                let mut buffer = bytes(reader)?;
                if buffer.last() == Some(&0) {
                    buffer.pop();
                }
                let string = String::from_utf8(buffer).map_err(|_| invalid_data("Invalid ASCII string"))?;
                TiffFieldValue::ASCII(string)
            }
            TiffFieldType::SHORT => TiffFieldValue::SHORT(read_n(reader, count, |r| endianness.read_u16(r))?),
            TiffFieldType::LONG => TiffFieldValue::LONG(read_n(reader, count, |r| endianness.read_u32(r))?),
            TiffFieldType::RATIONAL => TiffFieldValue::RATIONAL(read_n(reader, count, |r| {
                Ok((endianness.read_u32(r)?, endianness.read_u32(r)?))
            })?),
            TiffFieldType::SBYTE => TiffFieldValue::SBYTE(bytes(reader)?.into_iter().map(|b| b as i8).collect()),
            TiffFieldType::UNDEFINED => TiffFieldValue::UNDEFINED(bytes(reader)?),
            TiffFieldType::SSHORT => TiffFieldValue::SSHORT(read_n(reader, count, |r| Ok(endianness.read_u16(r)? as i16))?),
            TiffFieldType::SLONG => TiffFieldValue::SLONG(read_n(reader, count, |r| Ok(endianness.read_u32(r)? as i32))?),
            TiffFieldType::SRATIONAL => TiffFieldValue::SRATIONAL(read_n(reader, count, |r| {
                Ok((endianness.read_u32(r)? as i32, endianness.read_u32(r)? as i32))
            })?),
            TiffFieldType::FLOAT => TiffFieldValue::FLOAT(read_n(reader, count, |r| Ok(f32::from_bits(endianness.read_u32(r)?)))?),
            TiffFieldType::DOUBLE => TiffFieldValue::DOUBLE(read_n(reader, count, |r| Ok(f64::from_bits(endianness.read_u64(r)?)))?),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Little-endian TIFF with one IFD: an inline SHORT, an inline 2-byte UNDEFINED and an
    /// out-of-line LONG array.
    fn little_endian_sample() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"II");
        out.extend_from_slice(&42u16.to_le_bytes());
        out.extend_from_slice(&8u32.to_le_bytes());

        out.extend_from_slice(&3u16.to_le_bytes());
        // SHORT, count 1, inline
        out.extend_from_slice(&0x0100u16.to_le_bytes());
        out.extend_from_slice(&3u16.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&[0x34, 0x12, 0, 0]);
        // UNDEFINED, count 2, inline and shorter than the value field
        out.extend_from_slice(&0x0200u16.to_le_bytes());
        out.extend_from_slice(&7u16.to_le_bytes());
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&[0xAB, 0xCD, 0, 0]);
        // LONG, count 2, at offset 50
        out.extend_from_slice(&0x0300u16.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&50u32.to_le_bytes());
        // Next IFD
        out.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(out.len(), 50);

        out.extend_from_slice(&7u32.to_le_bytes());
        out.extend_from_slice(&0xDEADBEEFu32.to_le_bytes());
        out
    }

    #[test]
    fn reads_inline_and_offset_values() {
        let tiff = Tiff::from_reader(&mut Cursor::new(little_endian_sample())).unwrap();
        assert_eq!(tiff.header.endianness, Endianness::LittleEndian);
        assert_eq!(tiff.ifds.len(), 1);

        let ifd = &tiff.ifds[0];
        assert_eq!(ifd.entry_with_tag(0x0100).unwrap().field_value, TiffFieldValue::SHORT(vec![0x1234]));
        assert_eq!(ifd.entry_with_tag(0x0200).unwrap().field_value_as_undefined(), Some(&[0xAB, 0xCD][..]));
        assert_eq!(ifd.entry_with_tag(0x0300).unwrap().field_value_as_long(), Some(&[7, 0xDEADBEEF][..]));
        assert!(ifd.entry_with_tag(0x0400).is_none());
    }

    #[test]
    fn rejects_bad_header() {
        assert!(Tiff::from_reader(&mut Cursor::new(b"XX\x00\x2A\x00\x00\x00\x08".to_vec())).is_err());
        assert!(Tiff::from_reader(&mut Cursor::new(b"MM\x00\x2B\x00\x00\x00\x08".to_vec())).is_err());
        assert!(Tiff::from_reader(&mut Cursor::new(b"MM\x00".to_vec())).is_err());
    }

    #[test]
    fn self_referencing_chain_terminates() {
        let mut bytes = little_endian_sample();
        // Point the next-IFD field back at the first IFD.
        bytes[46..50].copy_from_slice(&8u32.to_le_bytes());

        let tiff = Tiff::from_reader(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(tiff.ifds.len(), 1);
    }
}
