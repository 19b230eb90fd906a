use std::collections::HashMap;

use log::{trace, warn};

use crate::colorspace::ColorPrimaries;
use crate::error::{Error, Result};

pub const TAG_HDR_CAPACITY_MAX: &str = "HDRCapacityMax";
pub const TAG_HDR_CAPACITY_MIN: &str = "HDRCapacityMin";
pub const TAG_GAMMA: &str = "Gamma";
pub const TAG_OFFSET_SDR: &str = "OffsetSDR";
pub const TAG_BASE_RENDITION_IS_HDR: &str = "BaseRenditionIsHDR";

const COLOR_HINT_TAGS: [&str; 3] = ["ColorSpace", "ProfileDescription", "ColorProfile"];

/// Floor for `headroom_min` when it is used as a divisor.
pub const HEADROOM_EPSILON: f32 = 1e-6;

/// A raw tag value as supplied by a metadata extractor.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Number(f64),
    Text(String),
}

/// Tag name to value mapping, as produced by a metadata extractor.
///
/// Names are normalized: group prefixes such as `XMP-hdrgm:` are dropped, whitespace is removed and
/// case is folded, so `"HDR Capacity Max"` and `"hdrgm:HDRCapacityMax"` address the same tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTags {
    tags: HashMap<String, TagValue>,
}

/// Whether applying the gain map brightens (`Positive`) or darkens (`Negative`) the base image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GainMapDirection {
    #[default]
    Positive,
    Negative,
}

/// The HDR-relevant subset of the gain map metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainMapMetadata {
    /// `HDRCapacityMax`.
    headroom_max: f32,
    /// `HDRCapacityMin`.
    headroom_min: f32,
    /// `Gamma`. The stored gain samples are raised to `1 / gamma`.
    gamma: f32,
    /// `OffsetSDR`. Added to the normalized gain sample before gamma correction.
    gain_offset: f32,
    /// Derived from `BaseRenditionIsHDR`.
    direction: GainMapDirection,
}

fn normalize_tag_name(name: &str) -> String {
    let local = name.rsplit(':').next().unwrap_or(name);
    local
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Number(value)
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(value.to_owned())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Text(value)
    }
}

impl TagValue {
    /// Numeric reading of the value. Text holding a per-channel list (`"1, 1, 1"`) yields its first component.
    fn as_f32(&self) -> Option<f32> {
        let value = match self {
            TagValue::Number(number) => *number,
            TagValue::Text(text) => text.split(',').next()?.trim().parse::<f64>().ok()?,
        };
        let value = value as f32;
        value.is_finite().then_some(value)
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Number(number) => Some(*number != 0.0),
            TagValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
        }
    }
}

impl RawTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<TagValue>) {
        self.tags.insert(normalize_tag_name(name), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&TagValue> {
        self.tags.get(&normalize_tag_name(name))
    }

    /// Adds every tag of `other`, replacing tags of the same name.
    pub fn merge(&mut self, other: RawTags) {
        self.tags.extend(other.tags);
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Tags in name order, for display.
    pub fn sorted(&self) -> Vec<(&str, &TagValue)> {
        let mut tags: Vec<_> = self.tags.iter().map(|(name, value)| (name.as_str(), value)).collect();
        tags.sort_by(|a, b| a.0.cmp(b.0));
        tags
    }

    /// Collects the attributes and simple property elements of every `rdf:Description` in an XMP packet.
    ///
    /// Sequences (`rdf:Seq`/`rdf:li`) are joined with `", "`. An unparsable packet yields no tags.
    pub fn from_xmp(xmp_bytes: &[u8]) -> Self {
        let mut tags = Self::new();

        let Ok(text) = std::str::from_utf8(xmp_bytes) else {
            warn!("XMP packet is not valid UTF-8");
            return tags;
        };
        // Tolerate anything (a BOM, padding) before the first element.
        let text = text.find('<').map_or(text, |start| &text[start..]);

        let doc = match roxmltree::Document::parse(text) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to parse XMP packet: {}", e);
                return tags;
            }
        };

        for description in doc.descendants().filter(|node| node.tag_name().name() == "Description") {
            for attr in description.attributes() {
                if attr.namespace().is_some_and(|ns| ns.contains("rdf-syntax-ns")) {
                    continue;
                }
                tags.insert(attr.name(), attr.value());
            }

            for property in description.children().filter(|node| node.is_element()) {
                if let Some(value) = read_property_value(&property) {
                    tags.insert(property.tag_name().name(), value);
                }
            }
        }

        trace!("XMP tags: {:?}", tags);
        tags
    }

    /// The color space named by the extractor, if it names one of the supported primaries.
    pub fn color_primaries_hint(&self) -> Option<ColorPrimaries> {
        COLOR_HINT_TAGS.iter().find_map(|name| match self.get(name)? {
            TagValue::Text(text) => ColorPrimaries::from_name(text),
            TagValue::Number(_) => None,
        })
    }
}

fn read_property_value(property: &roxmltree::Node<'_, '_>) -> Option<String> {
    let container = property
        .children()
        .find(|node| matches!(node.tag_name().name(), "Seq" | "Bag" | "Alt"));

    if let Some(container) = container {
        let items: Vec<&str> = container
            .children()
            .filter(|node| node.tag_name().name() == "li")
            .filter_map(|li| li.text())
            .map(str::trim)
            .collect();
        return (!items.is_empty()).then(|| items.join(", "));
    }

    let text = property.text()?.trim();
    (!text.is_empty()).then(|| text.to_owned())
}

impl GainMapMetadata {
    /// Builds the metadata from raw extractor tags, validating units and ranges.
    ///
    /// `HDRCapacityMax` and `HDRCapacityMin` are required; `Gamma` defaults to `1.0`, `OffsetSDR` to `0.0`.
    pub fn from_raw_tags(tags: &RawTags) -> Result<Self> {
        let missing: Vec<String> = [TAG_HDR_CAPACITY_MAX, TAG_HDR_CAPACITY_MIN]
            .iter()
            .filter(|name| tags.get(name).is_none())
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingMetadata { tags: missing });
        }

        let number = |name: &str| -> Result<Option<f32>> {
            match tags.get(name) {
                None => Ok(None),
                Some(value) => value
                    .as_f32()
                    .map(Some)
                    .ok_or_else(|| Error::invalid_metadata(name, format!("not a number: {:?}", value))),
            }
        };

        let headroom_max = number(TAG_HDR_CAPACITY_MAX)?.unwrap_or_default();
        let headroom_min = number(TAG_HDR_CAPACITY_MIN)?.unwrap_or_default();
        let gamma = number(TAG_GAMMA)?.unwrap_or(1.0);
        let gain_offset = number(TAG_OFFSET_SDR)?.unwrap_or(0.0);

        let direction = match tags.get(TAG_BASE_RENDITION_IS_HDR) {
            None => GainMapDirection::Positive,
            Some(value) => match value.as_bool() {
                Some(true) => GainMapDirection::Negative,
                Some(false) => GainMapDirection::Positive,
                None => return Err(Error::invalid_metadata(TAG_BASE_RENDITION_IS_HDR, format!("not a boolean: {:?}", value))),
            },
        };

        Self::new(headroom_max, headroom_min, gamma, gain_offset, direction)
    }

    /// Validates and builds the metadata.
    pub fn new(headroom_max: f32, headroom_min: f32, gamma: f32, gain_offset: f32, direction: GainMapDirection) -> Result<Self> {
        if !headroom_max.is_finite() {
            return Err(Error::invalid_metadata(TAG_HDR_CAPACITY_MAX, format!("must be finite, got {}", headroom_max)));
        }
        if !headroom_min.is_finite() {
            return Err(Error::invalid_metadata(TAG_HDR_CAPACITY_MIN, format!("must be finite, got {}", headroom_min)));
        }
        if headroom_min < 0.0 {
            return Err(Error::invalid_metadata(TAG_HDR_CAPACITY_MIN, format!("must not be negative, got {}", headroom_min)));
        }
        if headroom_max <= headroom_min {
            return Err(Error::invalid_metadata(
                TAG_HDR_CAPACITY_MAX,
                format!("must exceed {} ({}), got {}", TAG_HDR_CAPACITY_MIN, headroom_min, headroom_max),
            ));
        }
        if !(gamma > 0.0) || !gamma.is_finite() {
            return Err(Error::invalid_metadata(TAG_GAMMA, format!("must be positive, got {}", gamma)));
        }
        if !gain_offset.is_finite() {
            return Err(Error::invalid_metadata(TAG_OFFSET_SDR, format!("must be finite, got {}", gain_offset)));
        }

        Ok(Self {
            headroom_max,
            headroom_min,
            gamma,
            gain_offset,
            direction,
        })
    }

    pub fn headroom_max(&self) -> f32 {
        self.headroom_max
    }

    pub fn headroom_min(&self) -> f32 {
        self.headroom_min
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    pub fn gain_offset(&self) -> f32 {
        self.gain_offset
    }

    pub fn direction(&self) -> GainMapDirection {
        self.direction
    }

    /// Ratio between the brightest representable HDR value and SDR reference white.
    ///
    /// `headroom_min == 0` (the usual Apple encoding) uses `headroom_max` directly.
    pub fn headroom(&self) -> f32 {
        if self.headroom_min == 0.0 {
            self.headroom_max
        } else {
            self.headroom_max / self.headroom_min.max(HEADROOM_EPSILON)
        }
    }
}
