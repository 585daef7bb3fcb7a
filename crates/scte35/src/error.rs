use thiserror::Error;

/// Errors raised while decoding a cue.
///
/// Any of these means the signal is discarded by the binary path; callers that
/// still hold the playlist tag the cue came from retry with its attributes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("invalid table id: expected 0xFC, got {0:#04x}")]
    InvalidTableId(u8),

    #[error("section_syntax_indicator must be 0 for splice_info_section")]
    SectionSyntaxIndicatorSet,

    #[error("unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u8),

    #[error("encrypted splice_info_section (algorithm {algorithm})")]
    Encrypted { algorithm: u8 },

    #[error("unknown splice command type {0:#04x}")]
    UnknownCommand(u8),

    #[error("splice command {0:#04x} does not describe an ad break")]
    UnsupportedCommand(u8),

    #[error("malformed splice command: {0}")]
    MalformedCommand(String),

    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("unknown segmentation_upid_type {0:#04x}")]
    UnknownUpidType(u8),

    #[error("invalid UPID for type {upid_type:#04x}: {reason}")]
    InvalidUpid { upid_type: u8, reason: String },

    #[error("payload is neither hex nor base64: {0}")]
    InvalidPayloadEncoding(String),

    #[error("unrecognized cue tag: {0}")]
    UnrecognizedTag(String),

    #[error("invalid attribute {name}: {reason}")]
    InvalidAttribute { name: String, reason: String },
}

impl ParseError {
    pub(crate) fn short(expected: usize, actual: usize) -> Self {
        Self::InsufficientData { expected, actual }
    }

    pub(crate) fn attribute(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether a caller holding the originating tag should retry with its
    /// attributes instead of dropping the cue.
    pub fn allows_attribute_fallback(&self) -> bool {
        !matches!(
            self,
            ParseError::UnrecognizedTag(_) | ParseError::InvalidAttribute { .. }
        )
    }
}
