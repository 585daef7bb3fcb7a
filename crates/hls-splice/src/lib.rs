//! Live HLS media playlist conditioning.
//!
//! Everything here is a pure transform over playlist text: detect the real
//! segment duration, find the segment a break is anchored on, and either
//! splice the ad's own segments in (SSAI) or announce an interstitial
//! (SGAI). When a safe anchor is not in the window the input comes back
//! untouched.

pub mod duration;
pub mod error;
pub mod mode;
pub mod playlist;
pub mod sgai;
pub mod signer;
pub mod splice;
pub mod ssai;

pub use duration::{DEFAULT_DURATION_SAMPLE, compute_skip_count, detect_segment_duration};
pub use error::SpliceError;
pub use mode::{InsertionMode, select_mode, supports_interstitials};
pub use playlist::{Playlist, Segment, format_pdt, parse_pdt};
pub use sgai::{INTERSTITIAL_CLASS, insert_interstitial, interstitial_tag};
pub use signer::UriSigner;
pub use splice::{AdBreak, Conditioned, SkipReason, SpliceOutcome, SpliceReport};
pub use ssai::{AdPlaylist, AdSegment, splice_ad_break};

pub type Result<T> = std::result::Result<T, SpliceError>;
