use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpliceError {
    #[error("ad playlist error: {reason}")]
    AdPlaylist { reason: String },

    #[error("invalid URL `{input}`: {source}")]
    InvalidUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },

    #[error("signing key rejected: {reason}")]
    SigningKey { reason: String },

    #[error("signed URI rejected: {reason}")]
    Signature { reason: String },
}

impl SpliceError {
    pub(crate) fn ad_playlist(reason: impl Into<String>) -> Self {
        Self::AdPlaylist {
            reason: reason.into(),
        }
    }

    pub(crate) fn signature(reason: impl Into<String>) -> Self {
        Self::Signature {
            reason: reason.into(),
        }
    }
}
