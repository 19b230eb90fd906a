// ITU-T T.81, Annex B: marker segments of the JPEG interchange format.

use log::trace;

pub const MARKER_SOI: u8 = 0xD8;
pub const MARKER_EOI: u8 = 0xD9;
pub const MARKER_SOS: u8 = 0xDA;
pub const MARKER_APP1: u8 = 0xE1;
pub const MARKER_APP2: u8 = 0xE2;

const MARKER_TEM: u8 = 0x01;

/// Signature that prefixes the XMP packet in an APP1 segment.
pub const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// A marker segment that carries a length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub marker: u8,
    /// Absolute position of the `0xFF` byte introducing the marker.
    pub offset: usize,
    /// Absolute position of the first payload byte (just past the length field).
    pub payload_offset: usize,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ExpectSoi,
    ExpectMarker,
    Done,
}

/// Walks the header segments of a JPEG stream, from SOI up to the first SOS (or EOI).
///
/// Iteration stops silently on the first malformed or truncated segment; callers treat a missing
/// segment the same way whether it is absent or unreachable.
#[derive(Debug, Clone)]
pub struct SegmentReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
    state: State,
}

impl<'a> SegmentReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            cursor: 0,
            state: State::ExpectSoi,
        }
    }

    fn finish(&mut self, why: &str) {
        trace!("Segment walk stopped at {}: {}", self.cursor, why);
        self.state = State::Done;
    }
}

impl<'a> Iterator for SegmentReader<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state {
                State::ExpectSoi => {
                    if self.bytes.starts_with(&[0xFF, MARKER_SOI]) {
                        self.cursor = 2;
                        self.state = State::ExpectMarker;
                    } else {
                        self.finish("missing SOI");
                    }
                }
                State::ExpectMarker => {
                    if self.bytes.get(self.cursor) != Some(&0xFF) {
                        self.finish("expected a marker");
                        continue;
                    }

                    // Any number of 0xFF fill bytes may precede the marker code.
                    let mut pos = self.cursor + 1;
                    while self.bytes.get(pos) == Some(&0xFF) {
                        pos += 1;
                    }

                    let Some(&marker) = self.bytes.get(pos) else {
                        self.finish("truncated marker");
                        continue;
                    };

                    match marker {
                        MARKER_EOI => self.finish("EOI"),
                        MARKER_SOS => self.finish("SOS"),
                        MARKER_TEM | 0xD0..=0xD7 => {
                            // Standalone markers have no length field.
                            self.cursor = pos + 1;
                        }
                        _ => {
                            let Some(length_bytes) = self.bytes.get(pos + 1..pos + 3) else {
                                self.finish("truncated length field");
                                continue;
                            };
                            let length = u16::from_be_bytes([length_bytes[0], length_bytes[1]]) as usize;
                            let payload_offset = pos + 3;
                            let end = pos + 1 + length;
                            if length < 2 || end > self.bytes.len() {
                                self.finish("segment length out of bounds");
                                continue;
                            }

                            self.cursor = end;
                            return Some(Segment {
                                marker,
                                offset: pos - 1,
                                payload_offset,
                                payload: &self.bytes[payload_offset..end],
                            });
                        }
                    }
                }
                State::Done => return None,
            }
        }
    }
}

/// Returns the first segment with the given marker whose payload starts with `signature`.
pub fn find_segment<'a>(bytes: &'a [u8], marker: u8, signature: &[u8]) -> Option<Segment<'a>> {
    SegmentReader::new(bytes).find(|segment| segment.marker == marker && segment.payload.starts_with(signature))
}

/// Returns the XMP packet of a JPEG stream, without the APP1 namespace signature.
pub fn xmp_packet(bytes: &[u8]) -> Option<&[u8]> {
    find_segment(bytes, MARKER_APP1, XMP_SIGNATURE).map(|segment| &segment.payload[XMP_SIGNATURE.len()..])
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Appends a length-prefixed marker segment.
    pub fn push_segment(out: &mut Vec<u8>, marker: u8, payload: &[u8]) {
        out.extend_from_slice(&[0xFF, marker]);
        out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(payload);
    }

    /// A structurally valid (but not decodable) JPEG stream with the given header segments.
    pub fn jpeg_with_segments(segments: &[(u8, &[u8])]) -> Vec<u8> {
        let mut out = vec![0xFF, super::MARKER_SOI];
        for (marker, payload) in segments {
            push_segment(&mut out, *marker, payload);
        }
        push_segment(&mut out, super::MARKER_SOS, &[0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);
        out.extend_from_slice(&[0x12, 0x34, 0x56]);
        out.extend_from_slice(&[0xFF, super::MARKER_EOI]);
        out
    }
}
