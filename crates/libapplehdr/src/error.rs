use derive_more::{Display, Error};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the conversion pipeline.
///
/// `MissingMetadata`, `NoGainMap` and `InvalidMetadata` are recoverable: the caller may still
/// produce a base-image-only output. See [`Error::is_recoverable`].
#[derive(Debug, Clone, PartialEq, Display, Error)]
pub enum Error {
    /// One or more required HDR tags are absent from the supplied metadata.
    #[display("missing gain map metadata: {}", tags.join(", "))]
    MissingMetadata {
        #[error(not(source))]
        tags: Vec<String>,
    },
    /// The asset has no MPF directory, or the directory has no usable gain map entry.
    #[display("no gain map present: {reason}")]
    NoGainMap {
        #[error(not(source))]
        reason: NoGainMapReason,
    },
    /// The image codec failed on either the base image or the gain map.
    #[display("failed to decode {what}: {message}")]
    Decode {
        #[error(not(source))]
        what: DecodeTarget,
        #[error(not(source))]
        message: String,
    },
    /// An invariant that should hold by construction was violated.
    #[display("internal consistency error: {message}")]
    InternalConsistency {
        #[error(not(source))]
        message: String,
    },
    /// A tag is present but not usable (unparsable, or out of range).
    #[display("invalid gain map metadata `{tag}`: {message}")]
    InvalidMetadata {
        #[error(not(source))]
        tag: String,
        #[error(not(source))]
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum NoGainMapReason {
    #[display("no MPF marker segment")]
    NoMpfMarker,
    #[display("malformed MPF directory")]
    MalformedDirectory,
    #[display("MPF directory lists {_0} image(s), expected at least 2")]
    TooFewEntries(usize),
    #[display("no auxiliary image entry in the MPF directory")]
    NoAuxiliaryEntry,
    #[display("auxiliary image byte range lies outside the file")]
    EntryOutOfBounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DecodeTarget {
    #[display("base image")]
    BaseImage,
    #[display("gain map")]
    GainMap,
}

impl Error {
    pub(crate) fn no_gain_map(reason: NoGainMapReason) -> Self {
        Self::NoGainMap { reason }
    }

    pub(crate) fn decode(what: DecodeTarget, message: impl Into<String>) -> Self {
        Self::Decode { what, message: message.into() }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::InternalConsistency { message: message.into() }
    }

    pub(crate) fn invalid_metadata(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidMetadata { tag: tag.into(), message: message.into() }
    }

    /// Whether the caller can fall back to converting the base image alone.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MissingMetadata { .. } | Error::NoGainMap { .. } | Error::InvalidMetadata { .. }
        )
    }
}
